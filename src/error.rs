//! Error types
//!
//! Two families of errors exist. [`PutError`] is what client-facing calls
//! return when an operation cannot even be started, or when a caller gives up
//! waiting. [`BuildError`] is what a put value builder reports; these never
//! escape the coordinator, they are turned into a failed completion event.

use std::io;
use std::time::Duration;
use thiserror::Error;


/// Errors of the client-facing put interface
#[derive(Debug, Error)]
pub enum PutError {
    /// The channel handle does not refer to a live channel
    #[error("Dead Channel")]
    DeadChannel,

    /// No provider knows a channel with this name
    #[error("channel '{0}' not found")]
    ChannelNotFound(String),

    /// The request descriptor could not be understood
    #[error("failed to parse request string: {0}")]
    InvalidRequest(String),

    /// No completion event arrived before the caller's deadline
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The caller supplied an unusable combination of arguments
    #[error("{0}")]
    Usage(String),

    /// Reading put values from a file or stream failed
    #[error(transparent)]
    Io(#[from] io::Error),
}


/// Errors raised while building the value to be written
#[derive(Debug, Error)]
pub enum BuildError {
    /// The builder returned without providing a value
    #[error("No put value provided")]
    NoValue,

    /// The provided value does not have the structure reported at connect
    #[error("Provided put value with wrong type")]
    WrongType,

    /// A named field does not exist in the put structure
    #[error("{0} : Error: no such field")]
    NoSuchField(String),

    /// A textual value was aimed at a non-scalar field
    #[error("{0} : Error: need a scalar field")]
    NotScalar(String),

    /// A textual value could not be converted to the field type
    #[error("{field} : Error: can't convert '{value}' ({reason})")]
    Parse {
        field: String,
        value: String,
        reason: String,
    },

    /// A JSON document was malformed
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A JSON document did not fit the put structure
    #[error("JSON mismatch at '{field}': {reason}")]
    JsonShape {
        field: String,
        reason: String,
    },

    /// Application-specific builder failure
    #[error("{0}")]
    Custom(String),
}
