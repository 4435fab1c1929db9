//! aarch64-callseq - AArch64 C ABI call arrangement.
//!
//! This crate plans how a C function's arguments and return value cross the
//! AArch64 procedure-call boundary. Given an abstract signature (managed
//! carriers plus C memory layouts) it produces a [`CallingSequence`]: one
//! binding recipe per argument telling the downstream trampoline generator
//! how to move bytes between managed values and registers or stack slots,
//! following the AAPCS64 and its macOS and Windows variants.
//!
//! # Primary Usage
//!
//! ```
//! use aarch64_callseq::{CallArranger, Carrier, FunctionDescriptor, MemoryLayout, MethodType};
//!
//! // int32_t add(int32_t a, int32_t b)
//! let mt = MethodType::new(Some(Carrier::Int), vec![Carrier::Int, Carrier::Int]);
//! let desc = FunctionDescriptor::of(
//!     MemoryLayout::int32(),
//!     vec![MemoryLayout::int32(), MemoryLayout::int32()],
//! );
//!
//! let bindings = CallArranger::LINUX.get_bindings(&mt, &desc, false)?;
//! assert!(!bindings.is_in_memory_return);
//! assert_eq!(bindings.calling_sequence.argument_count(), 2);
//! # Ok::<(), aarch64_callseq::ArrangeError>(())
//! ```
//!
//! # Architecture
//!
//! - [`core`](crate::core) - Shared data model (layouts, carriers, storages,
//!   bindings)
//! - [`aarch64`] - Classification, storage allocation and the per-platform
//!   call arrangers
//!
//! Arrangement is purely functional at the method level: every call creates
//! its own calculators and nothing is cached, so the `LINUX` / `MACOS` /
//! `WINDOWS` arrangers can be shared freely across threads.

pub mod aarch64;
pub mod core;

pub use crate::core::binding::{Binding, BindingBuilder, UNBOUNDED_SIZE};
pub use crate::core::error::{ArrangeError, ArrangeResult};
pub use crate::core::layout::{
    Carrier, FunctionDescriptor, GroupKind, MemoryLayout, MethodType, ValueKind,
};
pub use crate::core::options::LinkerOptions;
pub use crate::core::sequence::{CallingSequence, CallingSequenceBuilder, Recipe};
pub use crate::core::storage::{AbiDescriptor, RegBank, StorageKind, VMStorage};

pub use crate::aarch64::call_arranger::{
    Bindings, CallArranger, DowncallHandle, PlatformPolicy, TargetHandle, UpcallScope, UpcallStub,
};
pub use crate::aarch64::type_class::TypeClass;
