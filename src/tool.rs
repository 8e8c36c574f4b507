//! Command-line put tool logic
//!
//! Everything the `pvput` binary does besides parsing its flags and printing:
//! turning the value arguments into a builder, reading them from a stream when
//! they are not given on the command line, and running a single put to
//! completion or timeout.

use crate::builder::{EnumMode, FieldValueBuilder, JsonBuilder, ValueBuilder};
use crate::client::ClientChannel;
use crate::config::PutConfig;
use crate::error::PutError;
use crate::multithread::blocking::BlockingPut;
use crate::status::PutEvent;
use std::io::Read;
use tracing::debug;


/// Turn the value arguments of the tool into a value builder
///
/// A single argument starting with `{` is a JSON description of the whole
/// value. Otherwise every argument is a `field=value` pair, except that a
/// lone argument without `=` is taken as the value of the `value` field.
pub fn classify_values(values: &[String], enum_mode: EnumMode) -> Result<ValueBuilder, PutError> {
    let Some(first) = values.first() else {
        return Err(PutError::Usage("No values provided".to_owned()));
    };

    if first.starts_with('{') {
        if values.len() > 1 {
            return Err(PutError::Usage("Missing quotes around JSON?".to_owned()));
        }
        return Ok(ValueBuilder::Json(JsonBuilder::new(first.clone())));
    }

    let mut pairs = Vec::with_capacity(values.len());
    for value in values {
        match value.split_once('=') {
            Some((field, text)) => pairs.push((field.to_owned(), text.to_owned())),
            None if values.len() == 1 => pairs.push(("value".to_owned(), value.clone())),
            None => {
                return Err(PutError::Usage(format!("expected field=value got '{}'", value)));
            }
        }
    }
    Ok(ValueBuilder::Fields(FieldValueBuilder::new(pairs).with_enum_mode(enum_mode)))
}


/// Read whitespace-delimited values from a stream
pub fn read_values(mut input: impl Read) -> Result<Vec<String>, PutError> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;
    Ok(text.split_whitespace().map(str::to_owned).collect())
}


/// Write a value to a channel, waiting for completion at most the configured
/// timeout
///
/// On timeout, the operation is cancelled before returning.
pub fn put_and_wait(channel: &ClientChannel,
                    builder: ValueBuilder,
                    config: &PutConfig) -> Result<PutEvent, PutError> {
    let request = config.pv_request()?;
    let blocking = BlockingPut::new(builder);
    let op = channel.put(blocking.clone(), Some(&request), config.get_current)?;
    debug!("Started {}", op);
    let result = blocking.wait(config.timeout);
    drop(op);
    result
}


/// Message to be printed on stderr for the outcome of a put, if any
pub fn error_message(result: &Result<PutEvent, PutError>) -> Option<String> {
    match result {
        Ok(event) if event.is_success() => None,
        Ok(event) => Some(format!("Error: {}", event.message)),
        Err(PutError::Timeout(_)) => Some("Put timeout".to_owned()),
        Err(e) => Some(e.to_string()),
    }
}


/// Process exit code for the outcome of a put
pub fn exit_code(result: &Result<PutEvent, PutError>) -> i32 {
    match result {
        Ok(event) if event.is_success() => 0,
        _ => 1,
    }
}
