use claw_base::{kerr, ErrorKind, Result};
use std::sync::Arc;

/// Smallest allocation a growing segment makes.
const MIN_CAPACITY: usize = 64;

/// Round a byte count up to the next 8-byte boundary.
pub fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// A struct's contiguous wire buffer. Cheap to clone: views share the
/// backing allocation and detach with a copy on their first mutation, so
/// nested-struct reads never copy.
#[derive(Clone, Debug, Default)]
pub struct Segment {
    buf: Arc<Vec<u8>>,
    off: usize,
    len: usize,
}

impl Segment {
    pub fn new() -> Segment {
        Segment::default()
    }

    pub fn from_vec(v: Vec<u8>) -> Segment {
        let len = v.len();
        Segment {
            buf: Arc::new(v),
            off: 0,
            len,
        }
    }

    /// A view of `[start, start+len)` sharing this segment's allocation.
    pub fn view(&self, start: usize, len: usize) -> Result<Segment> {
        if start.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                "view range past end of segment",
            ));
        }
        Ok(Segment {
            buf: self.buf.clone(),
            off: self.off + start,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.off..self.off + self.len]
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        if offset.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                "slice range past end of segment",
            ));
        }
        Ok(&self.bytes()[offset..offset + len])
    }

    /// Exclusive access to the backing vector, detaching from any sharers
    /// first. Afterwards `off == 0` and the vector length equals `self.len`.
    fn detach(&mut self) -> &mut Vec<u8> {
        if self.off != 0 || self.len != self.buf.len() {
            let v = self.bytes().to_vec();
            self.buf = Arc::new(v);
            self.off = 0;
        }
        Arc::make_mut(&mut self.buf)
    }

    fn reserve_doubling(v: &mut Vec<u8>, additional: usize) {
        let need = v.len() + additional;
        if need > v.capacity() {
            let mut cap = v.capacity().max(MIN_CAPACITY);
            while cap < need {
                cap *= 2;
            }
            v.reserve_exact(cap - v.len());
        }
    }

    /// Shift `[offset..len)` right by `data.len()` and copy `data` into the
    /// gap.
    pub fn insert_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset > self.len {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                "insert offset past end of segment",
            ));
        }
        let v = self.detach();
        Segment::reserve_doubling(v, data.len());
        let old_len = v.len();
        v.resize(old_len + data.len(), 0);
        v.copy_within(offset..old_len, offset + data.len());
        v[offset..offset + data.len()].copy_from_slice(data);
        self.len = v.len();
        Ok(())
    }

    /// Shift `[offset+n..len)` left by `n` and truncate.
    pub fn remove_at(&mut self, offset: usize, n: usize) -> Result<()> {
        if offset.checked_add(n).map_or(true, |end| end > self.len) {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                "remove range past end of segment",
            ));
        }
        let v = self.detach();
        v.copy_within(offset + n.., offset);
        let new_len = v.len() - n;
        v.truncate(new_len);
        self.len = new_len;
        Ok(())
    }

    /// Replace `old_len` bytes at `offset` with `data` in one pass. When the
    /// sizes match this is a plain overwrite with no shifting.
    pub fn replace_at(&mut self, offset: usize, old_len: usize, data: &[u8]) -> Result<()> {
        if offset.checked_add(old_len).map_or(true, |end| end > self.len) {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                "replace range past end of segment",
            ));
        }
        let new_len = data.len();
        let v = self.detach();
        if new_len > old_len {
            let grow = new_len - old_len;
            Segment::reserve_doubling(v, grow);
            let end = v.len();
            v.resize(end + grow, 0);
            v.copy_within(offset + old_len..end, offset + new_len);
        } else if new_len < old_len {
            v.copy_within(offset + old_len.., offset + new_len);
            let shrunk = v.len() - (old_len - new_len);
            v.truncate(shrunk);
        }
        v[offset..offset + new_len].copy_from_slice(data);
        self.len = v.len();
        Ok(())
    }

    pub fn truncate(&mut self, new_len: usize) -> Result<()> {
        if new_len > self.len {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                "truncate length past end of segment",
            ));
        }
        let v = self.detach();
        v.truncate(new_len);
        self.len = new_len;
        Ok(())
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        if offset.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                "slice range past end of segment",
            ));
        }
        let v = self.detach();
        Ok(&mut v[offset..offset + len])
    }

    pub fn read_u16_at(&self, offset: usize) -> Result<u16> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32> {
        let b = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_at(&self, offset: usize) -> Result<u64> {
        let b = self.slice(offset, 8)?;
        let mut w = [0u8; 8];
        w.copy_from_slice(b);
        Ok(u64::from_le_bytes(w))
    }

    pub fn write_u16_at(&mut self, offset: usize, val: u16) -> Result<()> {
        self.bytes_mut(offset, 2)?.copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    pub fn write_u32_at(&mut self, offset: usize, val: u32) -> Result<()> {
        self.bytes_mut(offset, 4)?.copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    pub fn write_u64_at(&mut self, offset: usize, val: u64) -> Result<()> {
        self.bytes_mut(offset, 8)?.copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// Empty the segment, keeping the allocation when nothing else shares it.
    pub fn reset(&mut self) {
        self.len = 0;
        self.off = 0;
        match Arc::get_mut(&mut self.buf) {
            Some(v) => v.clear(),
            None => self.buf = Arc::new(Vec::new()),
        }
    }

    /// Take the backing vector for reuse (cleared), or a fresh one when the
    /// allocation is shared.
    pub fn take_buf(&mut self) -> Vec<u8> {
        let buf = std::mem::take(&mut self.buf);
        self.off = 0;
        self.len = 0;
        match Arc::try_unwrap(buf) {
            Ok(mut v) => {
                v.clear();
                v
            }
            Err(_) => Vec::new(),
        }
    }
}
