use std::io;

use nix::errno::Errno;
use thiserror::Error;

use crate::api::Op;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("{operation} failed: {} (os error {code})", describe(.code))]
    SocketFailure { code: i32, operation: Op },
    #[error("socket handle is closed")]
    HandleClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

fn describe(code: &i32) -> &'static str {
    Errno::from_raw(*code).desc()
}

impl Error {
    /// The verbatim native error code, if this is a native failure.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::SocketFailure { code, .. } => Some(*code),
            Error::HandleClosed => None,
        }
    }

    pub fn operation(&self) -> Option<Op> {
        match self {
            Error::SocketFailure { operation, .. } => Some(*operation),
            Error::HandleClosed => None,
        }
    }

    pub fn is_handle_closed(&self) -> bool {
        matches!(self, Error::HandleClosed)
    }
}

/// Translates a native error code. Zero is success; anything else becomes a
/// `SocketFailure` carrying the code unchanged.
#[inline]
pub fn check(operation: Op, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(Error::SocketFailure { code, operation })
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::SocketFailure { code, .. } => io::Error::from_raw_os_error(code),
            Error::HandleClosed => io::Error::from_raw_os_error(libc::EBADF),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_success() {
        assert_eq!(check(Op::Bind, 0), Ok(()));
    }

    #[test]
    fn nonzero_keeps_code_and_operation() {
        let err = check(Op::Connect, libc::ECONNREFUSED).unwrap_err();
        assert_eq!(err.code(), Some(libc::ECONNREFUSED));
        assert_eq!(err.operation(), Some(Op::Connect));
        assert!(!err.is_handle_closed());
        assert!(err.to_string().starts_with("connect failed"));
    }

    #[test]
    fn io_conversion_preserves_raw_code() {
        let err = Error::SocketFailure {
            code: libc::EPIPE,
            operation: Op::Send,
        };
        assert_eq!(io::Error::from(err).raw_os_error(), Some(libc::EPIPE));
        assert_eq!(
            io::Error::from(Error::HandleClosed).raw_os_error(),
            Some(libc::EBADF)
        );
    }
}
