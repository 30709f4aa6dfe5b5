use claw_base::{kerr, ErrorKind, Result};
use std::io::{Read, Write};

// Thin adapters from std::io to the runtime's error kinds, used by the
// reader/writer marshal variants.

pub(crate) fn read_exact_short(r: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf)
        .map_err(|e| kerr(ErrorKind::ReadShort, format!("short read: {}", e)))
}

pub(crate) fn write_all_short(w: &mut impl Write, bytes: &[u8]) -> Result<()> {
    w.write_all(bytes)
        .map_err(|e| kerr(ErrorKind::WriteShort, format!("short write: {}", e)))
}
