//! Error types for Xmlflow.
//!
//! All errors in Xmlflow are represented by the `XmlflowError` enum,
//! which provides specific variants for different error categories.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Xmlflow operations.
///
/// Errors surface when a mapping is loaded or compiled. Failures inside a single
/// tool or action during a run are logged and do not abort the walk.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum XmlflowError {
    /// Engine-level errors (runtime construction, shutdown).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML).
    #[error("{0}")]
    Convert(String),

    /// XML parsing errors.
    #[error("{0}")]
    Xml(String),

    /// Mapping definition errors (builder nodes, edges, schema).
    #[error("{0}")]
    Mapping(String),

    /// Tool definition or execution errors.
    #[error("{0}")]
    Tool(String),

    /// Action definition or execution errors.
    #[error("{0}")]
    Action(String),

    /// External fetch errors.
    #[error("{0}")]
    Fetch(String),

    /// Runtime execution errors.
    #[error("{0}")]
    Runtime(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl From<XmlflowError> for String {
    fn from(val: XmlflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for XmlflowError {
    fn from(error: std::io::Error) -> Self {
        XmlflowError::IoError(error.to_string())
    }
}

impl From<XmlflowError> for std::io::Error {
    fn from(val: XmlflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for XmlflowError {
    fn from(_: FromUtf8Error) -> Self {
        XmlflowError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for XmlflowError {
    fn from(error: serde_json::Error) -> Self {
        XmlflowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for XmlflowError {
    fn from(error: toml::de::Error) -> Self {
        XmlflowError::Config(error.to_string())
    }
}

impl From<regex::Error> for XmlflowError {
    fn from(error: regex::Error) -> Self {
        XmlflowError::Runtime(format!("invalid pattern: {}", error))
    }
}

impl From<globset::Error> for XmlflowError {
    fn from(error: globset::Error) -> Self {
        XmlflowError::Config(format!("invalid tag pattern: {}", error))
    }
}

impl From<quick_xml::Error> for XmlflowError {
    fn from(error: quick_xml::Error) -> Self {
        XmlflowError::Xml(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for XmlflowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        XmlflowError::Mapping(error.to_string())
    }
}
