mod bitfield;
mod error;

pub use bitfield::PresenceBits;
pub use error::{err, kerr, Error, ErrorKind, Result};
