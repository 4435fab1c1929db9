//! Argument classification for the AArch64 C ABI.

use crate::core::error::{ArrangeError, ArrangeResult};
use crate::core::layout::{align_up, GroupKind, MemoryLayout, ValueKind};

/// The largest aggregate passed in registers by value; anything bigger is
/// copied by the caller and passed by pointer.
const MAX_AGGREGATE_REGS_SIZE: u64 = 16;

/// The number of leaves a homogeneous floating aggregate may have.
const MAX_HFA_LEAVES: usize = 4;

/// Argument classes of the AAPCS64, restricted to what C can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Integer,
    Float,
    Pointer,
    /// Aggregate of at most 16 bytes, passed in general-purpose registers.
    StructRegister,
    /// Homogeneous floating aggregate, passed in consecutive vector registers.
    StructHfa,
    /// Large aggregate; the caller materializes a copy and passes a pointer.
    StructReference,
}

/// One flattened float member of an HFA: its offset within the aggregate and
/// its byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HfaLeaf {
    pub offset: u64,
    pub size: u64,
}

impl TypeClass {
    /// Classify a layout, or report it as inexpressible in the C ABI.
    ///
    /// The classifier is pure and platform-independent; platform variants
    /// reinterpret the result at the call site where their ABI diverges.
    pub fn classify(layout: &MemoryLayout) -> ArrangeResult<TypeClass> {
        match layout {
            MemoryLayout::Value { kind, .. } => Ok(match kind {
                ValueKind::Integer => TypeClass::Integer,
                ValueKind::Float => TypeClass::Float,
                ValueKind::Pointer => TypeClass::Pointer,
            }),
            MemoryLayout::Group { .. } => {
                if hfa_leaves(layout).is_some() {
                    Ok(TypeClass::StructHfa)
                } else if layout.byte_size() <= MAX_AGGREGATE_REGS_SIZE {
                    Ok(TypeClass::StructRegister)
                } else {
                    Ok(TypeClass::StructReference)
                }
            }
            MemoryLayout::Sequence { .. } | MemoryLayout::Padding { .. } => {
                Err(ArrangeError::UnsupportedLayout(layout.to_string()))
            }
        }
    }
}

/// Flatten a group layout to its float leaves if it forms an HFA: one to
/// four leaf members, all floating point of the same width, reached through
/// arbitrarily nested groups and sequences. Padding members are skipped.
///
/// Returns the leaves with their real offsets inside the aggregate, ready
/// for the per-field allocation and binding paths. `None` when the layout is
/// not an HFA.
pub(crate) fn hfa_leaves(layout: &MemoryLayout) -> Option<Vec<HfaLeaf>> {
    if !layout.is_group() {
        return None;
    }
    let mut leaves = Vec::new();
    collect_float_leaves(layout, 0, &mut leaves)?;
    if leaves.is_empty() || leaves.len() > MAX_HFA_LEAVES {
        return None;
    }
    let width = leaves[0].size;
    leaves
        .iter()
        .all(|leaf| leaf.size == width)
        .then_some(leaves)
}

/// Walk `layout` at `base` collecting float leaves; `None` as soon as a
/// non-float leaf or a fifth leaf is seen.
fn collect_float_leaves(
    layout: &MemoryLayout,
    base: u64,
    leaves: &mut Vec<HfaLeaf>,
) -> Option<()> {
    match layout {
        MemoryLayout::Value {
            kind: ValueKind::Float,
            byte_size,
            ..
        } => {
            if leaves.len() == MAX_HFA_LEAVES {
                return None;
            }
            leaves.push(HfaLeaf {
                offset: base,
                size: *byte_size,
            });
            Some(())
        }
        MemoryLayout::Value { .. } => None,
        MemoryLayout::Group {
            kind, members, ..
        } => {
            let mut offset = 0u64;
            for member in members {
                if matches!(member, MemoryLayout::Padding { .. }) {
                    offset += member.byte_size();
                    continue;
                }
                offset = align_up(offset, member.byte_alignment());
                let member_base = match kind {
                    // Union members all start at the group's own offset.
                    GroupKind::Union => base,
                    GroupKind::Struct => base + offset,
                };
                collect_float_leaves(member, member_base, leaves)?;
                offset += member.byte_size();
            }
            Some(())
        }
        MemoryLayout::Sequence { element, count } => {
            for i in 0..*count {
                collect_float_leaves(element, base + i * element.byte_size(), leaves)?;
            }
            Some(())
        }
        MemoryLayout::Padding { .. } => Some(()),
    }
}
