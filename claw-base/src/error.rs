// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system
// 4. A stable kind discriminant so callers can tell data errors apart from misuse

use backtrace_error::DynBacktraceError;
use std::borrow::Cow;
use tracing::error;

#[cfg(test)]
use test_log::test;

/// Failure classes surfaced to callers. Data errors from untrusted input
/// (malformed buffers, bad patches) and caller misuse (wrong-typed accessor,
/// bad index) are both recoverable; nothing here aborts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedHeader,
    TypeMismatch,
    OutOfBounds,
    InvalidEncoding,
    SchemaInvalid,
    PatchVersionMismatch,
    PatchTooLarge,
    PatchTooDeep,
    PatchMalformed,
    ReadShort,
    WriteShort,
    Other,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    #[allow(dead_code)]
    inner: DynBacktraceError,
}
pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl std::fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {
    fn description(&self) -> &str {
        &self.0
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Error {
        Error::new(err)
    }
}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
        Error::with_kind(ErrorKind::Other, err)
    }

    pub fn with_kind<E: std::error::Error + Send + Sync + 'static>(
        kind: ErrorKind,
        err: E,
    ) -> Error {
        error!(target: "claw", "{:?}: {:?}", kind, err);
        let inner = DynBacktraceError::from(err);
        Error { kind, inner }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(SimpleErr(msg.into()))
}

pub fn kerr(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::with_kind(kind, SimpleErr(msg.into()))
}

#[test]
fn test_error() {
    let e = kerr(ErrorKind::OutOfBounds, "index 9 past end of list");
    assert_eq!(e.kind(), ErrorKind::OutOfBounds);
    assert_eq!(err("test error").kind(), ErrorKind::Other);
}
