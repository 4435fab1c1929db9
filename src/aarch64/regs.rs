//! AArch64 register handles and the AAPCS64 ABI descriptor.
//!
//! The tables are derived from the AAPCS64, restricted to what is possible
//! when calling to or from C code: although x0-x7 and v0-v7 are all valid
//! return registers on paper, a C function can only produce results in
//! x0/x1 and v0-v3, so the output tables stop there.

use crate::core::storage::{AbiDescriptor, RegBank, VMStorage};

/// Registers a single argument may draw from one bank.
pub const MAX_REGISTER_ARGUMENTS: usize = 8;

/// Width of one outgoing stack slot in bytes.
pub const STACK_SLOT_SIZE: u64 = 8;

const fn x(index: u8, name: &'static str) -> VMStorage {
    VMStorage::reg(RegBank::Integer, index, name)
}

const fn v(index: u8, name: &'static str) -> VMStorage {
    VMStorage::reg(RegBank::Vector, index, name)
}

pub const X0: VMStorage = x(0, "x0");
pub const X1: VMStorage = x(1, "x1");
pub const X2: VMStorage = x(2, "x2");
pub const X3: VMStorage = x(3, "x3");
pub const X4: VMStorage = x(4, "x4");
pub const X5: VMStorage = x(5, "x5");
pub const X6: VMStorage = x(6, "x6");
pub const X7: VMStorage = x(7, "x7");
pub const X8: VMStorage = x(8, "x8");
pub const X9: VMStorage = x(9, "x9");
pub const X10: VMStorage = x(10, "x10");
pub const X11: VMStorage = x(11, "x11");
pub const X12: VMStorage = x(12, "x12");
pub const X13: VMStorage = x(13, "x13");
pub const X14: VMStorage = x(14, "x14");
pub const X15: VMStorage = x(15, "x15");

pub const V0: VMStorage = v(0, "v0");
pub const V1: VMStorage = v(1, "v1");
pub const V2: VMStorage = v(2, "v2");
pub const V3: VMStorage = v(3, "v3");
pub const V4: VMStorage = v(4, "v4");
pub const V5: VMStorage = v(5, "v5");
pub const V6: VMStorage = v(6, "v6");
pub const V7: VMStorage = v(7, "v7");
pub const V16: VMStorage = v(16, "v16");
pub const V17: VMStorage = v(17, "v17");
pub const V18: VMStorage = v(18, "v18");
pub const V19: VMStorage = v(19, "v19");
pub const V20: VMStorage = v(20, "v20");
pub const V21: VMStorage = v(21, "v21");
pub const V22: VMStorage = v(22, "v22");
pub const V23: VMStorage = v(23, "v23");
pub const V24: VMStorage = v(24, "v24");
pub const V25: VMStorage = v(25, "v25");
pub const V26: VMStorage = v(26, "v26");
pub const V27: VMStorage = v(27, "v27");
pub const V28: VMStorage = v(28, "v28");
pub const V29: VMStorage = v(29, "v29");
pub const V30: VMStorage = v(30, "v30");
pub const V31: VMStorage = v(31, "v31");

/// The register carrying the hidden pointer for in-memory returns. Reserved:
/// bank allocation never reaches it.
pub const INDIRECT_RESULT: VMStorage = X8;

static INTEGER_INPUT: [VMStorage; 9] = [X0, X1, X2, X3, X4, X5, X6, X7, INDIRECT_RESULT];
static VECTOR_INPUT: [VMStorage; 8] = [V0, V1, V2, V3, V4, V5, V6, V7];
static INTEGER_OUTPUT: [VMStorage; 2] = [X0, X1];
static VECTOR_OUTPUT: [VMStorage; 4] = [V0, V1, V2, V3];
static INTEGER_VOLATILE: [VMStorage; 7] = [X9, X10, X11, X12, X13, X14, X15];
static VECTOR_VOLATILE: [VMStorage; 16] = [
    V16, V17, V18, V19, V20, V21, V22, V23, V24, V25, V26, V27, V28, V29, V30, V31,
];

/// The AAPCS64 C ABI descriptor shared by Linux, macOS and Windows.
pub static C: AbiDescriptor = AbiDescriptor {
    input_storage: [&INTEGER_INPUT, &VECTOR_INPUT],
    output_storage: [&INTEGER_OUTPUT, &VECTOR_OUTPUT],
    volatile_storage: [&INTEGER_VOLATILE, &VECTOR_VOLATILE],
    // Stack is always 16 byte aligned on AArch64.
    stack_alignment: 16,
    // No shadow space.
    shadow_space: 0,
    scratch1: X9,
    scratch2: X10,
};

/// Encode an outgoing stack slot of `size` bytes at `offset`.
pub const fn stack_storage(size: u16, offset: u32) -> VMStorage {
    VMStorage::stack(size, offset)
}
