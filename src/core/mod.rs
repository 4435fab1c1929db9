//! Architecture-independent data model for call arrangement.
//!
//! # Key Components
//!
//! ## Layouts (`layout`)
//! - `MemoryLayout` trees describing C types with C size/alignment rules
//! - Managed-side `Carrier` kinds and the `MethodType` signature
//! - `FunctionDescriptor` pairing a return layout with argument layouts
//!
//! ## Storage (`storage`)
//! - `VMStorage` register handles and encoded stack slots
//! - `AbiDescriptor` register-bank tables consumed by the allocator
//!
//! ## Bindings (`binding`, `sequence`)
//! - The ten-op binding recipe alphabet and its builder
//! - `CallingSequence`, the immutable per-call product

pub mod binding;
pub mod error;
pub mod layout;
pub mod options;
pub mod sequence;
pub mod storage;

pub use binding::{Binding, BindingBuilder, UNBOUNDED_SIZE};
pub use error::{ArrangeError, ArrangeResult};
pub use layout::{Carrier, FunctionDescriptor, GroupKind, MemoryLayout, MethodType, ValueKind};
pub use options::LinkerOptions;
pub use sequence::{CallingSequence, CallingSequenceBuilder, Recipe};
pub use storage::{AbiDescriptor, RegBank, StorageKind, VMStorage};
