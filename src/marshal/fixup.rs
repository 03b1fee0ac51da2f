//! Bounded pointer-fixup table and the relativize/absolutize passes.
//! Grounded on `IPCHeader::addOffsetToPointer` / `makePointersRelative` /
//! `makePointersAbsolute` in the reference implementation.

use crate::protocol::{Header, FIXUP_TABLE_CAPACITY};

use super::MarshalError;

/// Tracks which byte offsets within an arena hold a pointer that needs
/// rewriting before the arena crosses the process boundary. Lives logically
/// alongside a `Header` (it mutates the header's `fixup_offsets` array
/// directly) so callers work with one object instead of threading both
/// through every marshal call.
pub struct FixupTable<'h> {
    header: &'h mut Header,
}

impl<'h> FixupTable<'h> {
    pub fn new(header: &'h mut Header) -> Self {
        FixupTable { header }
    }

    /// Records that the pointer-sized value at `offset` (measured from the
    /// arena base) needs rewriting. Returns `FixupTableFull` once the
    /// bounded table (capacity 128) is exhausted, matching the reference
    /// implementation's fatal-overflow policy.
    pub fn add(&mut self, offset: usize) -> Result<(), MarshalError> {
        let count = self.header.fixup_count as usize;
        if count >= FIXUP_TABLE_CAPACITY {
            return Err(MarshalError::FixupTableFull);
        }
        self.header.fixup_offsets[count] = offset as u64;
        self.header.fixup_count = (count + 1) as i32;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.header.fixup_count as usize
    }
}

/// Rewrites every recorded pointer-sized slot in `arena` from an absolute
/// address to `address - base` (preserving null), reading the fixup list
/// out of `header`. Called right before the arena is handed to the peer.
pub fn relativize(header: &Header, arena: &mut [u8], base: usize) {
    for i in 0..header.fixup_count as usize {
        let offset = header.fixup_offsets[i] as usize;
        rewrite_pointer_slot(arena, offset, |absolute| {
            if absolute == 0 {
                0
            } else {
                absolute - base
            }
        });
    }
}

/// Inverse of [`relativize`]: called by the peer immediately after it reads
/// the arena, before touching any record inside it.
pub fn absolutize(header: &Header, arena: &mut [u8], base: usize) {
    for i in 0..header.fixup_count as usize {
        let offset = header.fixup_offsets[i] as usize;
        rewrite_pointer_slot(arena, offset, |relative| {
            if relative == 0 {
                0
            } else {
                relative + base
            }
        });
    }
}

fn rewrite_pointer_slot(arena: &mut [u8], offset: usize, f: impl FnOnce(usize) -> usize) {
    let slot = &mut arena[offset..offset + std::mem::size_of::<usize>()];
    let current = usize::from_ne_bytes(slot.try_into().expect("pointer-sized slot"));
    let rewritten = f(current);
    slot.copy_from_slice(&rewritten.to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestKind;

    #[test]
    fn relativize_then_absolutize_is_identity() {
        let mut header = Header::new(RequestKind::CreateSession);
        let base = 0x1000;
        let absolute_value: usize = base + 24;

        let mut arena = vec![0u8; 64];
        arena[0..8].copy_from_slice(&absolute_value.to_ne_bytes());

        {
            let mut table = FixupTable::new(&mut header);
            table.add(0).unwrap();
        }

        relativize(&header, &mut arena, base);
        let relative = usize::from_ne_bytes(arena[0..8].try_into().unwrap());
        assert_eq!(relative, 24);

        absolutize(&header, &mut arena, base);
        let restored = usize::from_ne_bytes(arena[0..8].try_into().unwrap());
        assert_eq!(restored, absolute_value);
    }

    #[test]
    fn null_pointers_are_preserved() {
        let mut header = Header::new(RequestKind::CreateSession);
        let mut arena = vec![0u8; 16];
        {
            let mut table = FixupTable::new(&mut header);
            table.add(0).unwrap();
        }
        relativize(&header, &mut arena, 0x2000);
        assert_eq!(usize::from_ne_bytes(arena[0..8].try_into().unwrap()), 0);
    }

    #[test]
    fn table_rejects_overflow_past_capacity() {
        let mut header = Header::new(RequestKind::CreateSession);
        let mut table = FixupTable::new(&mut header);
        for i in 0..FIXUP_TABLE_CAPACITY {
            table.add(i).unwrap();
        }
        assert!(table.add(FIXUP_TABLE_CAPACITY).is_err());
    }
}
