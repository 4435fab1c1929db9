//! Error types for call arrangement.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use super::layout::Carrier;

/// Errors raised while arranging a call.
///
/// The engine enumerates a closed set of argument classes; a layout that
/// falls outside it is a caller contract violation and is reported with the
/// offending layout spelled out. Everything else that can go wrong belongs
/// to the callers (illegal layout construction) or to the downstream linker
/// (stub memory, trampoline generation).
#[derive(Error, Debug)]
pub enum ArrangeError {
    #[error("layout cannot be classified for the AArch64 C ABI: {0}")]
    UnsupportedLayout(String),

    #[error("carrier {carrier:?} cannot carry layout {layout}")]
    CarrierMismatch { carrier: Carrier, layout: String },

    #[error("stack argument of {size} bytes does not fit in an encoded slot")]
    StackSlotTooLarge { size: u64 },
}

/// Result type alias for arrangement operations.
pub type ArrangeResult<T> = Result<T, ArrangeError>;
