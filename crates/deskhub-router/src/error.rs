//! Router error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("a subsystem is already registered for server type '{0}'")]
    DuplicateSubsystem(String),

    #[error("a request handler is already registered for app type '{0}'")]
    DuplicateHandler(String),

    #[error("provider already attached: {0}")]
    DuplicateProvider(String),
}
