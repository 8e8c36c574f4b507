//! One-shot put tool
//!
//! Writes a value to a channel of the in-process loopback database, and prints
//! the value before and after the write.

use clap::Parser;
use std::fs::File;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use threaded_put_ops::builder::EnumMode;
use threaded_put_ops::client::ClientProvider;
use threaded_put_ops::config::{PutConfig, DEFAULT_REQUEST};
use threaded_put_ops::error::{BuildError, PutError};
use threaded_put_ops::executor::ThreadExecutor;
use threaded_put_ops::loopback::LoopbackProvider;
use threaded_put_ops::tool;
use threaded_put_ops::value::{PVStructure, ScalarType, Structure};
use tracing::debug;
use tracing_subscriber::EnvFilter;


/// Write a value to a channel
#[derive(Parser, Debug)]
#[command(name = "pvput")]
struct Args {
    /// Wait time in seconds, specifies the timeout
    #[arg(short = 'w', value_name = "SEC", default_value_t = 3.0, allow_negative_numbers = true)]
    timeout: f64,

    /// Request, specifies what fields to put
    #[arg(short = 'r', value_name = "REQUEST", default_value = DEFAULT_REQUEST)]
    request: String,

    /// Quiet mode, print only error messages
    #[arg(short = 'q')]
    quiet: bool,

    /// Enable debug output
    #[arg(short = 'd')]
    debug: bool,

    /// Read values from a file, use '-' for stdin
    #[arg(short = 'f', value_name = "FILE")]
    file: Option<String>,

    /// Fetch the current value before building the new one
    #[arg(short = 'c')]
    get_current: bool,

    /// Enum values are always indices
    #[arg(short = 'n', conflicts_with = "string_enums")]
    number_enums: bool,

    /// Enum values are always choice names
    #[arg(short = 's')]
    string_enums: bool,

    /// Channel name
    pv: String,

    /// Values: <value>, <field>=<value>... or a JSON object
    values: Vec<String>,
}


fn main() -> ExitCode {
    let args = Args::parse();
    let config = PutConfig::default().with_debug(args.debug);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let enum_mode = if args.number_enums {
        EnumMode::Number
    } else if args.string_enums {
        EnumMode::String
    } else {
        EnumMode::Auto
    };
    let config = config.with_timeout_secs(args.timeout)
                       .with_request(args.request.clone())
                       .with_enum_mode(enum_mode)
                       .with_get_current(args.get_current)
                       .with_quiet(args.quiet);

    match run(&args, &config) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}


fn run(args: &Args, config: &PutConfig) -> Result<u8, PutError> {
    // Values on the command line take precedence over the input file
    let values = match args.file {
        Some(ref file) if args.values.is_empty() => {
            if file == "-" {
                tool::read_values(io::stdin().lock())?
            } else {
                let input = File::open(file).map_err(|e| {
                    PutError::Usage(format!("Failed to open file '{}': {}", file, e))
                })?;
                tool::read_values(input)?
            }
        }
        _ => args.values.clone(),
    };
    let builder = tool::classify_values(&values, config.enum_mode)?;
    config.pv_request()?;

    let executor = Arc::new(ThreadExecutor::new("pvput-callbacks")?);
    let loopback = Arc::new(demo_records(executor).map_err(|e| PutError::Usage(e.to_string()))?);
    let provider = ClientProvider::new(loopback.clone());
    debug!("Using provider {}", provider.name());
    let channel = provider.connect(&args.pv)?;

    if !config.quiet {
        print_value("Old", &args.pv, loopback.read(&args.pv));
    }

    let result = tool::put_and_wait(&channel, builder, config);
    if let Some(message) = tool::error_message(&result) {
        eprintln!("{}", message);
    }
    if matches!(result, Err(PutError::Timeout(_))) {
        return Ok(1);
    }

    if !config.quiet {
        print_value("New", &args.pv, loopback.read(&args.pv));
    }
    Ok(tool::exit_code(&result) as u8)
}


fn print_value(label: &str, name: &str, value: Option<PVStructure>) {
    if let Some(value) = value {
        println!("{} : {}\n{}", label, name, value);
    }
}


/// Records served by the tool's database
fn demo_records(executor: Arc<ThreadExecutor>) -> Result<LoopbackProvider, BuildError> {
    let provider = LoopbackProvider::new(executor);

    let mut double = PVStructure::new(&Structure::nt_scalar(ScalarType::Double));
    double.put_from("descriptor", "Analog setpoint")?;
    provider.add_record("double01", double);

    let mut long = PVStructure::new(&Structure::nt_scalar(ScalarType::Long));
    long.put_from("descriptor", "Counter")?;
    provider.add_record("long01", long);

    let mut string = PVStructure::new(&Structure::nt_scalar(ScalarType::String));
    string.put_from("descriptor", "Operator message")?;
    provider.add_record("string01", string);

    let mut enumeration = PVStructure::new(&Structure::nt_enum());
    enumeration.put_from("descriptor", "Mode selector")?;
    let choices = serde_json::json!(["Off", "On", "Fault"]);
    enumeration.assign_json(Some("value.choices"), &choices, &mut Default::default())?;
    provider.add_record("enum01", enumeration);

    Ok(provider)
}
