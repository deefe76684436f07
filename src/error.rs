use thiserror::Error;

/// Every fallible operation in the shell reports one of these codes.
///
/// `Eof` and `Exit` are control flow rather than faults: `Eof` ends the
/// read loop on ctrl-d, `Exit` propagates the `exit` builtin out through
/// nested `source` calls.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellError {
    #[error("out of memory")]
    Oom,
    #[error("i/o error")]
    Io,
    #[error("assertion failed")]
    Assertion,
    #[error("unimplemented")]
    Unimplemented,
    #[error("bad value")]
    Value,
    #[error("end of input")]
    Eof,
    #[error("not found")]
    NotFound,
    #[error("exit requested")]
    Exit,
}

pub type Result<T> = std::result::Result<T, ShellError>;

impl From<std::io::Error> for ShellError {
    fn from(_: std::io::Error) -> Self {
        ShellError::Io
    }
}

impl From<std::collections::TryReserveError> for ShellError {
    fn from(_: std::collections::TryReserveError) -> Self {
        ShellError::Oom
    }
}
