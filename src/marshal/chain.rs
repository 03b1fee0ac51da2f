//! Serialization of self-describing record chains into an [`Arena`], and the
//! reverse on the receiving side. Grounded on `CopyXrStructChain` /
//! `CopyType` in the reference implementation: each record begins with a
//! `kind` discriminator and a `next` pointer, chains may be input
//! (copy-everything) or output (shape-only), and unknown kinds are skipped
//! rather than rejected so newer overlay builds stay compatible with older
//! main builds.

use super::arena::Arena;
use super::fixup::FixupTable;
use super::MarshalError;

/// Whether the marshaller copies full field values (the command will
/// consume this chain) or only the `kind` tag with zeroed payload (the
/// command will fill this chain and hand it back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    CopyEverything,
    ShapeOnly,
}

/// Canonical wire tags for the record kinds this engine understands, the
/// way `XrStructureType` values double as both discriminant and struct
/// identity in the reference implementation. A `kind` outside this set is
/// always reconstructed as `Record::Unknown` by `copy_out_chain`.
pub const KIND_REFERENCE_SPACE_CREATE_INFO: u32 = 1;
pub const KIND_SWAPCHAIN_CREATE_INFO: u32 = 2;
pub const KIND_COMPOSITION_LAYER_QUAD: u32 = 3;
pub const KIND_EVENT_DATA_SESSION_STATE_CHANGED: u32 = 4;
pub const KIND_GRAPHICS_BINDING_D3D11: u32 = 5;

/// One node of a record chain. `kind` identifies the concrete record type;
/// `Unknown` preserves unrecognized kinds' length so the cursor can skip
/// them without understanding their payload, and `GraphicsBinding` marks a
/// record that must never leave the process it originated in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    ReferenceSpaceCreateInfo { kind: u32, space_type: u32 },
    SwapchainCreateInfo { kind: u32, width: u32, height: u32, format: i64 },
    CompositionLayerQuad { kind: u32, placement: i32, swapchain: u64, space: u64 },
    EventDataSessionStateChanged { kind: u32, session: u64, state: u32, time: i64 },
    GraphicsBindingD3D11 { kind: u32 },
    Unknown { kind: u32, payload_len: usize },
}

impl Record {
    pub fn kind_tag(&self) -> u32 {
        match self {
            Record::ReferenceSpaceCreateInfo { kind, .. }
            | Record::SwapchainCreateInfo { kind, .. }
            | Record::CompositionLayerQuad { kind, .. }
            | Record::EventDataSessionStateChanged { kind, .. }
            | Record::GraphicsBindingD3D11 { kind }
            | Record::Unknown { kind, .. } => *kind,
        }
    }

    fn is_known(&self) -> bool {
        !matches!(self, Record::Unknown { .. })
    }

    fn is_graphics_binding(&self) -> bool {
        matches!(self, Record::GraphicsBindingD3D11 { .. })
    }
}

/// A chain is a `Vec` in process memory; on the wire it becomes a sequence
/// of `(kind, next-offset)`-prefixed records inside the arena. Graphics
/// binding records are dropped before anything is written, per §4.2.
pub fn marshal_chain(
    chain: &[Record],
    mode: CopyMode,
    arena: &mut Arena,
    fixups: &mut FixupTable,
) -> Result<usize, MarshalError> {
    let marshalable: Vec<&Record> = chain
        .iter()
        .filter(|r| r.is_known() && !r.is_graphics_binding())
        .collect();

    let mut next_offset: usize = 0; // null
    // Build tail-to-head so each record's `next` fixup points at the
    // already-written successor, mirroring how the reference implementation
    // walks and allocates the chain.
    for record in marshalable.iter().rev() {
        let offset = write_record(record, mode, arena)?;
        let next_field_offset = offset; // first field of every record is `kind`; `next` immediately follows
        if next_offset != 0 {
            fixups.add(next_field_offset + std::mem::size_of::<u32>())?;
        }
        let next_slot = arena.slice_mut(
            next_field_offset + std::mem::size_of::<u32>(),
            std::mem::size_of::<usize>(),
        );
        next_slot.copy_from_slice(&next_offset.to_ne_bytes());
        next_offset = offset;
    }

    Ok(next_offset)
}

fn write_record(record: &Record, mode: CopyMode, arena: &mut Arena) -> Result<usize, MarshalError> {
    let payload = encode_payload(record, mode);
    arena.write(&payload)
}

/// `copy-everything` writes real field values; `shape-only` writes just the
/// `kind` tag (plus a reserved `next` slot) with the remaining payload
/// zeroed, matching the reference implementation's output-record handling.
fn encode_payload(record: &Record, mode: CopyMode) -> Vec<u8> {
    let mut bytes = record.kind_tag().to_ne_bytes().to_vec();
    bytes.extend_from_slice(&0usize.to_ne_bytes()); // `next`, patched by caller

    if mode == CopyMode::ShapeOnly {
        return bytes;
    }

    match record {
        Record::ReferenceSpaceCreateInfo { space_type, .. } => {
            bytes.extend_from_slice(&space_type.to_ne_bytes());
        }
        Record::SwapchainCreateInfo { width, height, format, .. } => {
            bytes.extend_from_slice(&width.to_ne_bytes());
            bytes.extend_from_slice(&height.to_ne_bytes());
            bytes.extend_from_slice(&format.to_ne_bytes());
        }
        Record::CompositionLayerQuad { placement, swapchain, space, .. } => {
            bytes.extend_from_slice(&placement.to_ne_bytes());
            bytes.extend_from_slice(&swapchain.to_ne_bytes());
            bytes.extend_from_slice(&space.to_ne_bytes());
        }
        Record::EventDataSessionStateChanged { session, state, time, .. } => {
            bytes.extend_from_slice(&session.to_ne_bytes());
            bytes.extend_from_slice(&state.to_ne_bytes());
            bytes.extend_from_slice(&time.to_ne_bytes());
        }
        Record::GraphicsBindingD3D11 { .. } | Record::Unknown { .. } => {}
    }

    bytes
}

fn read_u32(arena: &Arena, offset: usize) -> u32 {
    u32::from_ne_bytes(arena.read(offset, 4).expect("field in range").try_into().unwrap())
}

fn read_i32(arena: &Arena, offset: usize) -> i32 {
    i32::from_ne_bytes(arena.read(offset, 4).expect("field in range").try_into().unwrap())
}

fn read_u64(arena: &Arena, offset: usize) -> u64 {
    u64::from_ne_bytes(arena.read(offset, 8).expect("field in range").try_into().unwrap())
}

fn read_i64(arena: &Arena, offset: usize) -> i64 {
    i64::from_ne_bytes(arena.read(offset, 8).expect("field in range").try_into().unwrap())
}

/// Reverses [`marshal_chain`] on the peer side. Unknown kinds in the source
/// never appear here (they were dropped during serialization), so this is a
/// straight walk of the linked list that was written, not a re-derivation
/// of the skip logic — the skip only ever happens once, at serialization
/// time, per §4.2's "skipped during serialization" policy. Known kinds are
/// reconstructed with their real field values so the chain round-trips
/// byte-for-byte, not just in length.
pub fn copy_out_chain(arena: &Arena, head_offset: usize, count_hint: usize) -> Vec<Record> {
    let mut out = Vec::with_capacity(count_hint);
    let mut offset = head_offset;
    while offset != 0 {
        let kind_bytes = arena.read(offset, std::mem::size_of::<u32>()).expect("chain offset in range");
        let kind = u32::from_ne_bytes(kind_bytes.try_into().unwrap());
        let next_bytes = arena
            .read(offset + std::mem::size_of::<u32>(), std::mem::size_of::<usize>())
            .expect("next offset in range");
        let next = usize::from_ne_bytes(next_bytes.try_into().unwrap());
        let fields = offset + std::mem::size_of::<u32>() + std::mem::size_of::<usize>();

        let record = match kind {
            KIND_REFERENCE_SPACE_CREATE_INFO => Record::ReferenceSpaceCreateInfo {
                kind,
                space_type: read_u32(arena, fields),
            },
            KIND_SWAPCHAIN_CREATE_INFO => Record::SwapchainCreateInfo {
                kind,
                width: read_u32(arena, fields),
                height: read_u32(arena, fields + 4),
                format: read_i64(arena, fields + 8),
            },
            KIND_COMPOSITION_LAYER_QUAD => Record::CompositionLayerQuad {
                kind,
                placement: read_i32(arena, fields),
                swapchain: read_u64(arena, fields + 4),
                space: read_u64(arena, fields + 12),
            },
            KIND_EVENT_DATA_SESSION_STATE_CHANGED => Record::EventDataSessionStateChanged {
                kind,
                session: read_u64(arena, fields),
                state: read_u32(arena, fields + 8),
                time: read_i64(arena, fields + 12),
            },
            KIND_GRAPHICS_BINDING_D3D11 => Record::GraphicsBindingD3D11 { kind },
            _ => Record::Unknown { kind, payload_len: 0 },
        };

        out.push(record);
        offset = next;
    }
    out
}
