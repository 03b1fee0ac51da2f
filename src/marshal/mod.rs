//! Chain marshaller (C2): deep-copy, linearize, and pointer-fixup of record
//! chains into the shared region's payload arena, and the reverse on the
//! peer side.

pub mod arena;
pub mod chain;
pub mod fixup;

pub use arena::Arena;
pub use chain::{
    copy_out_chain, marshal_chain, CopyMode, Record, KIND_COMPOSITION_LAYER_QUAD,
    KIND_EVENT_DATA_SESSION_STATE_CHANGED, KIND_GRAPHICS_BINDING_D3D11, KIND_REFERENCE_SPACE_CREATE_INFO,
    KIND_SWAPCHAIN_CREATE_INFO,
};
pub use fixup::{absolutize, relativize, FixupTable};

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy)]
pub enum MarshalError {
    #[error("arena overflow: requested {requested} bytes, {remaining} remaining")]
    ArenaOverflow { requested: usize, remaining: usize },
    #[error("fixup table exhausted (capacity {})", crate::protocol::FIXUP_TABLE_CAPACITY)]
    FixupTableFull,
    #[error("attempted to read a misaligned pointer slot")]
    UnalignedRead,
}
