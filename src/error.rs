//! Error handling for stpl.
//! Defines the error taxonomy shared by the translator, the runtime and the manager.

use std::io;
use thiserror::Error;

/// Custom error types for stpl operations.
///
/// Translation-time variants carry the 1-based source line that caused them.
#[derive(Error, Debug)]
pub enum Error {
    /// Represents errors that occur during file system operations
    #[error("IO error: {0}.")]
    IoError(#[from] io::Error),

    /// Malformed template structure found while translating
    #[error("Template syntax error: {message} (line {line}).")]
    SyntaxError { message: String, line: usize },

    /// A directive received an unusable argument while translating
    #[error("Template value error: {message} (line {line}).")]
    ValueError { message: String, line: usize },

    /// The inheritance graph of a template could not be built
    #[error("Template context error: {0}.")]
    ContextError(String),

    /// No source exists for the requested template name
    #[error("Template '{name}' not found.")]
    TemplateNotFoundError { name: String },

    /// An embedded statement failed while rendering
    #[error("Render error in {template} (line {line}): {message}.")]
    RenderError { template: String, line: usize, message: String },

    /// Represents errors raised by the expression engine outside of a render
    #[error("Expression error: {0}.")]
    MinijinjaError(#[from] minijinja::Error),

    /// Represents errors that occur during configuration parsing or processing
    #[error("Configuration error: {0}.")]
    ConfigError(String),

    /// Represents malformed JSON render contexts
    #[error("JSON error: {0}.")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn syntax<S: Into<String>>(message: S, line: usize) -> Self {
        Error::SyntaxError { message: message.into(), line }
    }

    pub(crate) fn value<S: Into<String>>(message: S, line: usize) -> Self {
        Error::ValueError { message: message.into(), line }
    }

    /// Source line the error points at, for translation and render errors.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::SyntaxError { line, .. }
            | Error::ValueError { line, .. }
            | Error::RenderError { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Convenience type alias for Results with stpl's Error as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Default error handler that prints the error and exits the program.
///
/// # Arguments
/// * `err` - The Error to handle
///
/// # Behavior
/// Prints the error message to stderr and exits with status code 1
pub fn default_error_handler(err: Error) {
    eprintln!("{err}");
    std::process::exit(1);
}
