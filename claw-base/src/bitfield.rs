use crate::error::{kerr, ErrorKind, Result};

#[cfg(test)]
use test_log::test;

/// Per-field presence bits, used to tell "explicitly set to zero" apart from
/// "never set". The encoded form packs seven value bits per byte and uses
/// bit 7 as a continuation marker, set on every byte except the last, so the
/// encoding is self-delimiting when scanned forward.
#[derive(Clone, Default, PartialEq, Eq, Debug, Hash)]
pub struct PresenceBits {
    words: Vec<u64>,
    len: usize,
}

impl PresenceBits {
    pub fn new(len: usize) -> Self {
        PresenceBits {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, i: usize, val: bool) {
        assert!(i < self.len, "presence bit index out of range");
        if val {
            self.words[i / 64] |= 1 << (i % 64);
        } else {
            self.words[i / 64] &= !(1 << (i % 64));
        }
    }

    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.len, "presence bit index out of range");
        (self.words[i / 64] & (1 << (i % 64))) != 0
    }

    pub fn clear_all(&mut self) {
        for w in self.words.iter_mut() {
            *w = 0;
        }
    }

    /// Encoded byte count, before any alignment padding the container adds.
    pub fn encoded_len(&self) -> usize {
        self.len.div_ceil(7).max(1)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let n = self.encoded_len();
        for b in 0..n {
            let mut byte = 0u8;
            for j in 0..7 {
                let i = b * 7 + j;
                if i < self.len && self.get(i) {
                    byte |= 1 << j;
                }
            }
            if b + 1 < n {
                byte |= 0x80;
            }
            out.push(byte);
        }
    }

    /// Decode `len` bits from the front of `bytes`. Trailing padding after
    /// the final (continuation-clear) byte is ignored.
    pub fn decode(bytes: &[u8], len: usize) -> Result<Self> {
        let mut bits = PresenceBits::new(len);
        let n = bits.encoded_len();
        if bytes.len() < n {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "presence bitfield shorter than field count requires",
            ));
        }
        for (b, &byte) in bytes.iter().enumerate().take(n) {
            let continues = byte & 0x80 != 0;
            if continues != (b + 1 < n) {
                return Err(kerr(
                    ErrorKind::InvalidEncoding,
                    "bad continuation bit in presence bitfield",
                ));
            }
            for j in 0..7 {
                let i = b * 7 + j;
                if i < len {
                    bits.set(i, byte & (1 << j) != 0);
                }
            }
        }
        Ok(bits)
    }
}

#[test]
fn test_continuation_bytes() {
    // 8 fields span two encoded bytes; only the first carries bit 7.
    let mut bits = PresenceBits::new(8);
    bits.set(0, true);
    bits.set(7, true);
    let mut out = Vec::new();
    bits.encode_into(&mut out);
    assert_eq!(out, vec![0x81, 0x01]);
}

#[test]
fn test_roundtrip() {
    let mut bits = PresenceBits::new(65);
    for i in (0..65).step_by(3) {
        bits.set(i, true);
    }
    let mut out = Vec::new();
    bits.encode_into(&mut out);
    assert_eq!(out.len(), bits.encoded_len());
    let back = PresenceBits::decode(&out, 65).unwrap();
    assert_eq!(back, bits);
}

#[test]
fn test_decode_rejects_bad_continuation() {
    let mut bits = PresenceBits::new(10);
    bits.set(9, true);
    let mut out = Vec::new();
    bits.encode_into(&mut out);
    out[1] |= 0x80;
    assert!(PresenceBits::decode(&out, 10).is_err());
}
