//! Put tool configuration
//!
//! Settings of a one-shot put, as driven from the command line. Everything has
//! a default, so that `PutConfig::default()` behaves like the tool invoked
//! without options.

use crate::builder::EnumMode;
use crate::error::PutError;
use crate::request::PvRequest;
use std::time::Duration;
use tracing::warn;


/// Default time to wait for the completion event
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default request descriptor, exposing the value field only
pub const DEFAULT_REQUEST: &str = "field(value)";


/// Settings of a one-shot put
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutConfig {
    /// How long to wait for the completion event
    pub timeout: Duration,

    /// Request descriptor, in textual form
    pub request: String,

    /// Interpretation of textual values aimed at enumerations
    pub enum_mode: EnumMode,

    /// Whether the current value is fetched before building
    pub get_current: bool,

    /// Only report errors
    pub quiet: bool,

    /// Enable debug output
    pub debug: bool,
}
//
impl Default for PutConfig {
    fn default() -> Self {
        PutConfig {
            timeout: DEFAULT_TIMEOUT,
            request: DEFAULT_REQUEST.to_owned(),
            enum_mode: EnumMode::Auto,
            get_current: false,
            quiet: false,
            debug: false,
        }
    }
}
//
impl PutConfig {
    /// Set the timeout in seconds, invalid values are ignored
    pub fn with_timeout_secs(mut self, seconds: f64) -> Self {
        if seconds.is_finite() && seconds > 0.0 {
            self.timeout = Duration::from_secs_f64(seconds);
        } else {
            warn!("'{}' is not a valid timeout value - ignored", seconds);
        }
        self
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = request.into();
        self
    }

    pub fn with_enum_mode(mut self, enum_mode: EnumMode) -> Self {
        self.enum_mode = enum_mode;
        self
    }

    pub fn with_get_current(mut self, get_current: bool) -> Self {
        self.get_current = get_current;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Parsed form of the request descriptor
    pub fn pv_request(&self) -> Result<PvRequest, PutError> {
        PvRequest::parse(&self.request)
    }

    /// Log filter directive matching the verbosity settings
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "warn"
        }
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    /// Check the defaults
    #[test]
    fn defaults() {
        let config = PutConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.pv_request().unwrap().fields(), ["value"]);
        assert_eq!(config.enum_mode, EnumMode::Auto);
        assert!(!config.get_current && !config.quiet && !config.debug);
        assert_eq!(config.log_filter(), "warn");
    }

    /// Invalid timeouts keep the previous value
    #[test]
    fn timeouts() {
        let config = PutConfig::default().with_timeout_secs(0.5);
        assert_eq!(config.timeout, Duration::from_millis(500));
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert_eq!(config.clone().with_timeout_secs(bad).timeout, Duration::from_millis(500));
        }
    }

    /// Check the setters
    #[test]
    fn setters() {
        let config = PutConfig::default()
            .with_request("field()")
            .with_enum_mode(EnumMode::String)
            .with_get_current(true)
            .with_quiet(true)
            .with_debug(true);
        assert!(config.pv_request().unwrap().fields().is_empty());
        assert_eq!(config.enum_mode, EnumMode::String);
        assert!(config.get_current && config.quiet);
        assert_eq!(config.log_filter(), "debug");
    }
}
