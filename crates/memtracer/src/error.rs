use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerError {
    #[error("path separator must not be empty")]
    InvalidSeparator,
}
