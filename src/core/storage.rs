//! Storage handles and the per-platform ABI descriptor.
//!
//! A [`VMStorage`] names where one machine word of an argument lives: a
//! register in one of the two banks, or an encoded slot in the outgoing
//! stack frame. The [`AbiDescriptor`] collects the register-bank tables the
//! storage calculator draws from.

use std::fmt;

/// Register banks for argument passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegBank {
    /// General-purpose registers.
    Integer = 0,
    /// SIMD/FP registers.
    Vector = 1,
}

impl RegBank {
    /// Index into the 2-D storage tables of an [`AbiDescriptor`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The three storage kinds a binding can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Integer,
    Vector,
    Stack,
}

/// A register handle or an encoded stack slot.
///
/// Register handles are only ever constructed by the architecture register
/// tables; stack storages encode both the slot offset and the byte count the
/// callee will find there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VMStorage {
    Reg {
        bank: RegBank,
        index: u8,
        name: &'static str,
    },
    Stack {
        offset: u32,
        size: u16,
    },
}

impl VMStorage {
    pub const fn reg(bank: RegBank, index: u8, name: &'static str) -> Self {
        VMStorage::Reg { bank, index, name }
    }

    pub const fn stack(size: u16, offset: u32) -> Self {
        VMStorage::Stack { offset, size }
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            VMStorage::Reg {
                bank: RegBank::Integer,
                ..
            } => StorageKind::Integer,
            VMStorage::Reg {
                bank: RegBank::Vector,
                ..
            } => StorageKind::Vector,
            VMStorage::Stack { .. } => StorageKind::Stack,
        }
    }

    /// Bank of a register storage, `None` for stack slots.
    pub fn bank(&self) -> Option<RegBank> {
        match self {
            VMStorage::Reg { bank, .. } => Some(*bank),
            VMStorage::Stack { .. } => None,
        }
    }

    pub fn is_stack(&self) -> bool {
        matches!(self, VMStorage::Stack { .. })
    }

    /// True for SIMD/FP register storages.
    pub fn is_vector_reg(&self) -> bool {
        self.bank() == Some(RegBank::Vector)
    }
}

impl fmt::Display for VMStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VMStorage::Reg { name, .. } => write!(f, "{name}"),
            VMStorage::Stack { offset, size } => write!(f, "[sp + {offset}]{{{size}}}"),
        }
    }
}

/// Register-bank tables and stack rules for one platform.
///
/// `input_storage` feeds argument allocation, `output_storage` feeds return
/// allocation; both are indexed by [`RegBank::index`]. The volatile sets and
/// scratch registers are carried for the downstream trampoline generator and
/// play no part in arrangement itself.
#[derive(Debug)]
pub struct AbiDescriptor {
    pub input_storage: [&'static [VMStorage]; 2],
    pub output_storage: [&'static [VMStorage]; 2],
    pub volatile_storage: [&'static [VMStorage]; 2],
    pub stack_alignment: u64,
    pub shadow_space: u64,
    pub scratch1: VMStorage,
    pub scratch2: VMStorage,
}
