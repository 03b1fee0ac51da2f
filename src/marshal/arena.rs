//! Bump-allocated arena over the shared region's payload bytes. Grounded on
//! `IPCBuffer` in the reference implementation: an 8-byte-aligned cursor
//! that can write, read, and hand out scratch space, refusing to cross the
//! region boundary.

use super::MarshalError;

const ALIGNMENT: usize = 8;

fn pad(size: usize) -> usize {
    (size + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

/// A cursor over a byte slice, used both to write (overlay side, marshaling
/// a request) and to read (main side, un-marshaling it, and vice versa for
/// the response). `base` is always the start of the slice the cursor was
/// constructed over; pointer fixups are relative to that address, never to
/// the process-wide shared region base, so arena and region can be the same
/// allocation without an extra offset.
pub struct Arena<'a> {
    bytes: &'a mut [u8],
    cursor: usize,
}

impl<'a> Arena<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Arena { bytes, cursor: 0 }
    }

    pub fn base_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Reserves `size` bytes and returns their offset from `base_ptr`,
    /// advancing the cursor past the 8-byte-aligned end of the reservation.
    pub fn allocate(&mut self, size: usize) -> Result<usize, MarshalError> {
        let padded = pad(size);
        if self.cursor + padded > self.bytes.len() {
            return Err(MarshalError::ArenaOverflow {
                requested: size,
                remaining: self.bytes.len().saturating_sub(self.cursor),
            });
        }
        let offset = self.cursor;
        self.cursor += padded;
        Ok(offset)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, MarshalError> {
        let offset = self.allocate(data.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(offset)
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8], MarshalError> {
        if offset + len > self.bytes.len() {
            return Err(MarshalError::ArenaOverflow {
                requested: len,
                remaining: self.bytes.len().saturating_sub(offset),
            });
        }
        Ok(&self.bytes[offset..offset + len])
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[offset..offset + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_eight_byte_aligned() {
        let mut backing = vec![0u8; 64];
        let mut arena = Arena::new(&mut backing);
        let first = arena.allocate(3).unwrap();
        let second = arena.allocate(1).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 8);
    }

    #[test]
    fn overflow_is_reported_not_panicked() {
        let mut backing = vec![0u8; 8];
        let mut arena = Arena::new(&mut backing);
        assert!(arena.allocate(16).is_err());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut backing = vec![0u8; 32];
        let mut arena = Arena::new(&mut backing);
        let offset = arena.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(arena.read(offset, 4).unwrap(), &[1, 2, 3, 4]);
    }
}
