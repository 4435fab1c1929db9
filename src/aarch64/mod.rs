//! AArch64-specific components.
//!
//! This module contains all AArch64 specific code:
//! - Register handle tables and the AAPCS64 ABI descriptor
//! - Argument classification (integer, float, pointer, the struct classes)
//! - The call arranger with its Linux, macOS and Windows variants

pub mod call_arranger;
pub mod regs;
pub mod type_class;

pub use call_arranger::{
    Bindings, CallArranger, DowncallHandle, PlatformPolicy, TargetHandle, UpcallScope, UpcallStub,
};
pub use type_class::TypeClass;
