//! End-to-end arrangement tests for the AArch64 call arranger.

use aarch64_callseq::aarch64::regs::{V0, V1, V2, X0, X1, X6, X7, X8};
use aarch64_callseq::{
    Binding, CallArranger, CallingSequence, Carrier, FunctionDescriptor, LinkerOptions,
    MemoryLayout, MethodType, TargetHandle, UpcallScope, VMStorage, UNBOUNDED_SIZE,
};

/// Storages written by a recipe, in order.
fn stores(bindings: &[Binding]) -> Vec<VMStorage> {
    bindings
        .iter()
        .filter_map(|op| match op {
            Binding::VmStore { storage, .. } => Some(*storage),
            _ => None,
        })
        .collect()
}

/// Storages read by a recipe, in order.
fn loads(bindings: &[Binding]) -> Vec<VMStorage> {
    bindings
        .iter()
        .filter_map(|op| match op {
            Binding::VmLoad { storage, .. } => Some(*storage),
            _ => None,
        })
        .collect()
}

/// Every storage touched by the whole sequence, arguments then return.
fn all_storages(cs: &CallingSequence) -> Vec<VMStorage> {
    let mut result = Vec::new();
    for recipe in cs.arguments() {
        result.extend(stores(&recipe.bindings));
        result.extend(loads(&recipe.bindings));
    }
    if let Some(ret) = cs.return_recipe() {
        result.extend(stores(&ret.bindings));
        result.extend(loads(&ret.bindings));
    }
    result
}

fn int_reg(index: u8) -> VMStorage {
    aarch64_callseq::aarch64::regs::C.input_storage[0][index as usize]
}

fn vec_reg(index: u8) -> VMStorage {
    aarch64_callseq::aarch64::regs::C.input_storage[1][index as usize]
}

#[test]
fn test_three_ints_returning_int() {
    let mt = MethodType::new(Some(Carrier::Int), vec![Carrier::Int; 3]);
    let desc = FunctionDescriptor::of(MemoryLayout::int32(), vec![MemoryLayout::int32(); 3]);

    let bindings = CallArranger::LINUX.get_bindings(&mt, &desc, false).unwrap();
    assert!(!bindings.is_in_memory_return);
    let cs = bindings.calling_sequence;

    for i in 0..3 {
        assert_eq!(
            cs.argument_bindings(i),
            &[Binding::VmStore {
                storage: int_reg(i as u8),
                ty: Carrier::Int
            }]
        );
    }
    // The return is boxed out of x0.
    assert_eq!(loads(&cs.return_recipe().unwrap().bindings), vec![X0]);
}

#[test]
fn test_ninth_double_spills_to_stack() {
    let mt = MethodType::new(None, vec![Carrier::Double; 9]);
    let desc = FunctionDescriptor::of_void(vec![MemoryLayout::float64(); 9]);

    let cs = CallArranger::LINUX
        .get_bindings(&mt, &desc, false)
        .unwrap()
        .calling_sequence;

    for i in 0..8 {
        assert_eq!(stores(cs.argument_bindings(i)), vec![vec_reg(i as u8)]);
    }
    // One 8-byte slot at offset 0; no register splitting.
    assert_eq!(
        stores(cs.argument_bindings(8)),
        vec![VMStorage::stack(8, 0)]
    );
}

#[test]
fn test_hfa3_in_vector_registers() {
    let hfa = MemoryLayout::struct_of(vec![MemoryLayout::float64(); 3]);
    let mt = MethodType::new(None, vec![Carrier::Segment]);
    let desc = FunctionDescriptor::of_void(vec![hfa]);

    let cs = CallArranger::LINUX
        .get_bindings(&mt, &desc, false)
        .unwrap()
        .calling_sequence;

    assert_eq!(
        cs.argument_bindings(0),
        &[
            Binding::Dup,
            Binding::BufferLoad {
                offset: 0,
                ty: Carrier::Double
            },
            Binding::VmStore {
                storage: V0,
                ty: Carrier::Double
            },
            Binding::Dup,
            Binding::BufferLoad {
                offset: 8,
                ty: Carrier::Double
            },
            Binding::VmStore {
                storage: V1,
                ty: Carrier::Double
            },
            Binding::BufferLoad {
                offset: 16,
                ty: Carrier::Double
            },
            Binding::VmStore {
                storage: V2,
                ty: Carrier::Double
            },
        ]
    );
}

#[test]
fn test_large_struct_is_copied_and_passed_by_pointer() {
    let layout = MemoryLayout::struct_of(vec![MemoryLayout::int64(); 3]);
    let mt = MethodType::new(None, vec![Carrier::Segment]);
    let desc = FunctionDescriptor::of_void(vec![layout.clone()]);

    let cs = CallArranger::LINUX
        .get_bindings(&mt, &desc, false)
        .unwrap()
        .calling_sequence;

    assert_eq!(
        cs.argument_bindings(0),
        &[
            Binding::Copy { layout },
            Binding::UnboxAddress,
            Binding::VmStore {
                storage: X0,
                ty: Carrier::Long
            },
        ]
    );
}

#[test]
fn test_sixteen_byte_struct_after_six_ints_takes_x6_x7() {
    let struct_layout = MemoryLayout::struct_of(vec![MemoryLayout::int64(); 2]);
    let mut params = vec![Carrier::Int; 6];
    params.push(Carrier::Segment);
    let mut layouts = vec![MemoryLayout::int32(); 6];
    layouts.push(struct_layout);

    let cs = CallArranger::LINUX
        .get_bindings(&MethodType::new(None, params), &FunctionDescriptor::of_void(layouts), false)
        .unwrap()
        .calling_sequence;

    assert_eq!(
        cs.argument_bindings(6),
        &[
            Binding::Dup,
            Binding::BufferLoad {
                offset: 0,
                ty: Carrier::Long
            },
            Binding::VmStore {
                storage: X6,
                ty: Carrier::Long
            },
            Binding::BufferLoad {
                offset: 8,
                ty: Carrier::Long
            },
            Binding::VmStore {
                storage: X7,
                ty: Carrier::Long
            },
        ]
    );
}

#[test]
fn test_sixteen_byte_struct_after_seven_ints_spills_whole() {
    let struct_layout = MemoryLayout::struct_of(vec![MemoryLayout::int64(); 2]);
    let mut params = vec![Carrier::Int; 7];
    params.push(Carrier::Segment);
    params.push(Carrier::Int);
    let mut layouts = vec![MemoryLayout::int32(); 7];
    layouts.push(struct_layout);
    layouts.push(MemoryLayout::int32());

    let cs = CallArranger::LINUX
        .get_bindings(&MethodType::new(None, params), &FunctionDescriptor::of_void(layouts), false)
        .unwrap()
        .calling_sequence;

    // x7 stays free but is never used: no splitting between registers and
    // stack, and the bank stays closed afterwards.
    assert_eq!(
        stores(cs.argument_bindings(7)),
        vec![VMStorage::stack(8, 0), VMStorage::stack(8, 8)]
    );
    assert!(!all_storages(&cs).contains(&X7));
    // The trailing int follows on the stack, past the spilled struct.
    assert_eq!(
        stores(cs.argument_bindings(8)),
        vec![VMStorage::stack(4, 16)]
    );
}

#[test]
fn test_macos_variadic_args_go_to_stack() {
    // printf(fmt, int, double) with the variadic section starting at 1.
    let mt = MethodType::new(
        Some(Carrier::Int),
        vec![Carrier::Address, Carrier::Int, Carrier::Double],
    );
    let desc = FunctionDescriptor::of(
        MemoryLayout::int32(),
        vec![
            MemoryLayout::pointer(),
            MemoryLayout::int32(),
            MemoryLayout::float64(),
        ],
    );
    let options = LinkerOptions::variadic(1);

    let cs = CallArranger::MACOS
        .get_bindings_with_options(&mt, &desc, false, &options)
        .unwrap()
        .calling_sequence;

    assert_eq!(stores(cs.argument_bindings(0)), vec![X0]);
    // Both variadic arguments land on the stack even though every register
    // is still free; the int occupies four bytes of its 8-byte slot, the
    // double the next 8-aligned slot.
    assert_eq!(
        stores(cs.argument_bindings(1)),
        vec![VMStorage::stack(4, 0)]
    );
    assert_eq!(
        stores(cs.argument_bindings(2)),
        vec![VMStorage::stack(8, 8)]
    );
}

#[test]
fn test_macos_spilled_struct_tail_is_padded() {
    // Eight longs exhaust the integer bank; the 12-byte struct spills to
    // offsets 0 and 8 and must pad out its slot so the following int cannot
    // pack into the struct's tail.
    let struct_layout = MemoryLayout::struct_of(vec![MemoryLayout::int32(); 3]);
    let mut params = vec![Carrier::Long; 8];
    params.push(Carrier::Segment);
    params.push(Carrier::Int);
    let mut layouts = vec![MemoryLayout::int64(); 8];
    layouts.push(struct_layout);
    layouts.push(MemoryLayout::int32());

    let cs = CallArranger::MACOS
        .get_bindings(&MethodType::new(None, params), &FunctionDescriptor::of_void(layouts), false)
        .unwrap()
        .calling_sequence;

    assert_eq!(
        cs.argument_bindings(8),
        &[
            Binding::Dup,
            Binding::BufferLoad {
                offset: 0,
                ty: Carrier::Long
            },
            Binding::VmStore {
                storage: VMStorage::stack(8, 0),
                ty: Carrier::Long
            },
            Binding::BufferLoad {
                offset: 8,
                ty: Carrier::Int
            },
            Binding::VmStore {
                storage: VMStorage::stack(4, 8),
                ty: Carrier::Int
            },
        ]
    );
    assert_eq!(
        stores(cs.argument_bindings(9)),
        vec![VMStorage::stack(4, 16)]
    );
}

#[test]
fn test_macos_hfa_fields_pack_on_stack() {
    // With the vector bank exhausted, an HFA of two floats occupies 8 packed
    // bytes, as if its fields had been allocated separately.
    let hfa = MemoryLayout::struct_of(vec![MemoryLayout::float32(); 2]);
    let mut params = vec![Carrier::Double; 8];
    params.push(Carrier::Segment);
    let mut layouts = vec![MemoryLayout::float64(); 8];
    layouts.push(hfa);

    let cs = CallArranger::MACOS
        .get_bindings(&MethodType::new(None, params), &FunctionDescriptor::of_void(layouts), false)
        .unwrap()
        .calling_sequence;

    assert_eq!(
        stores(cs.argument_bindings(8)),
        vec![VMStorage::stack(4, 0), VMStorage::stack(4, 4)]
    );
}

#[test]
fn test_windows_variadic_double_uses_integer_register() {
    let mt = MethodType::new(None, vec![Carrier::Int, Carrier::Double]);
    let desc = FunctionDescriptor::of_void(vec![MemoryLayout::int32(), MemoryLayout::float64()]);
    let options = LinkerOptions::variadic(1);

    let cs = CallArranger::WINDOWS
        .get_bindings_with_options(&mt, &desc, false, &options)
        .unwrap()
        .calling_sequence;

    assert_eq!(stores(cs.argument_bindings(0)), vec![X0]);
    assert_eq!(
        cs.argument_bindings(1),
        &[Binding::VmStore {
            storage: X1,
            ty: Carrier::Double
        }]
    );
}

#[test]
fn test_windows_variadic_struct_fits_remaining_registers() {
    // Five ints consumed, a 12-byte variadic struct needs two slices and
    // three registers remain: every slice fits, nothing spills.
    let struct_layout = MemoryLayout::struct_of(vec![MemoryLayout::int32(); 3]);
    let mut params = vec![Carrier::Int; 5];
    params.push(Carrier::Segment);
    let mut layouts = vec![MemoryLayout::int32(); 5];
    layouts.push(struct_layout);
    let options = LinkerOptions::variadic(5);

    let cs = CallArranger::WINDOWS
        .get_bindings_with_options(
            &MethodType::new(None, params),
            &FunctionDescriptor::of_void(layouts),
            false,
            &options,
        )
        .unwrap()
        .calling_sequence;

    assert_eq!(
        stores(cs.argument_bindings(5)),
        vec![int_reg(5), int_reg(6)]
    );
}

#[test]
fn test_windows_variadic_struct_spills_partially() {
    // A variadic HFA of three doubles is rerouted through the integer bank;
    // with six ints consumed two slices land in x6/x7 and the tail spills.
    let struct_layout = MemoryLayout::struct_of(vec![MemoryLayout::float64(); 3]);
    let mut params = vec![Carrier::Int; 6];
    params.push(Carrier::Segment);
    let mut layouts = vec![MemoryLayout::int32(); 6];
    layouts.push(struct_layout);
    let options = LinkerOptions::variadic(6);

    let cs = CallArranger::WINDOWS
        .get_bindings_with_options(
            &MethodType::new(None, params),
            &FunctionDescriptor::of_void(layouts),
            false,
            &options,
        )
        .unwrap()
        .calling_sequence;

    assert_eq!(
        cs.argument_bindings(6),
        &[
            Binding::Dup,
            Binding::BufferLoad {
                offset: 0,
                ty: Carrier::Long
            },
            Binding::VmStore {
                storage: X6,
                ty: Carrier::Long
            },
            Binding::Dup,
            Binding::BufferLoad {
                offset: 8,
                ty: Carrier::Long
            },
            Binding::VmStore {
                storage: X7,
                ty: Carrier::Long
            },
            Binding::BufferLoad {
                offset: 16,
                ty: Carrier::Long
            },
            Binding::VmStore {
                storage: VMStorage::stack(8, 0),
                ty: Carrier::Long
            },
        ]
    );
}

#[test]
fn test_windows_fixed_float_of_variadic_function_also_rerouted() {
    // The Windows rule applies to the whole argument list of a variadic
    // function, not just the variadic section.
    let mt = MethodType::new(None, vec![Carrier::Double, Carrier::Double]);
    let desc =
        FunctionDescriptor::of_void(vec![MemoryLayout::float64(), MemoryLayout::float64()]);
    let options = LinkerOptions::variadic(1);

    let cs = CallArranger::WINDOWS
        .get_bindings_with_options(&mt, &desc, false, &options)
        .unwrap()
        .calling_sequence;

    assert_eq!(stores(cs.argument_bindings(0)), vec![X0]);
    assert_eq!(stores(cs.argument_bindings(1)), vec![X1]);
}

#[test]
fn test_in_memory_return_reserves_x8() {
    let ret = MemoryLayout::struct_of(vec![MemoryLayout::int64(); 4]);
    let mt = MethodType::new(Some(Carrier::Segment), vec![Carrier::Int]);
    let desc = FunctionDescriptor::of(ret.clone(), vec![MemoryLayout::int32()]);

    let bindings = CallArranger::LINUX.get_bindings(&mt, &desc, false).unwrap();
    assert!(bindings.is_in_memory_return);
    let cs = bindings.calling_sequence;

    assert!(cs.has_indirect_result());
    // The synthetic pointer argument heads the list and is the only place
    // x8 ever appears; the observable return has no bindings.
    assert_eq!(
        cs.argument_bindings(0),
        &[
            Binding::UnboxAddress,
            Binding::VmStore {
                storage: X8,
                ty: Carrier::Long
            },
        ]
    );
    assert!(cs.return_recipe().is_none());
    let x8_uses = all_storages(&cs).iter().filter(|s| **s == X8).count();
    assert_eq!(x8_uses, 1);
    // The ordinary argument still starts the normal bank at x0.
    assert_eq!(stores(cs.argument_bindings(1)), vec![X0]);

    // The downcall handle owns allocation of the return buffer.
    let handle = CallArranger::LINUX
        .arrange_downcall(&mt, &desc, &LinkerOptions::empty())
        .unwrap();
    assert!(handle.returns_in_memory());
    assert_eq!(handle.return_buffer_layout(), Some(&ret));
}

#[test]
fn test_x8_never_appears_without_in_memory_return() {
    let mt = MethodType::new(Some(Carrier::Long), vec![Carrier::Long; 9]);
    let desc = FunctionDescriptor::of(MemoryLayout::int64(), vec![MemoryLayout::int64(); 9]);

    let cs = CallArranger::LINUX
        .get_bindings(&mt, &desc, false)
        .unwrap()
        .calling_sequence;

    assert!(!cs.has_indirect_result());
    assert!(!all_storages(&cs).contains(&X8));
    // Ninth long is on the stack, not in x8.
    assert_eq!(
        stores(cs.argument_bindings(8)),
        vec![VMStorage::stack(8, 0)]
    );
}

#[test]
fn test_upcall_swaps_calculator_directions() {
    let mt = MethodType::new(Some(Carrier::Int), vec![Carrier::Int]);
    let desc = FunctionDescriptor::of(MemoryLayout::int32(), vec![MemoryLayout::int32()]);

    let cs = CallArranger::LINUX
        .get_bindings(&mt, &desc, true)
        .unwrap()
        .calling_sequence;

    assert!(cs.for_upcall());
    // Arguments are boxed out of registers, the return is unboxed into x0.
    assert_eq!(
        cs.argument_bindings(0),
        &[Binding::VmLoad {
            storage: X0,
            ty: Carrier::Int
        }]
    );
    assert_eq!(
        cs.return_recipe().unwrap().bindings,
        vec![Binding::VmStore {
            storage: X0,
            ty: Carrier::Int
        }]
    );
}

#[test]
fn test_upcall_in_memory_return_discards_managed_return() {
    let ret = MemoryLayout::struct_of(vec![MemoryLayout::int64(); 4]);
    let mt = MethodType::new(Some(Carrier::Segment), vec![]);
    let desc = FunctionDescriptor::of(ret, vec![]);

    let scope = UpcallScope::new();
    let stub = CallArranger::LINUX
        .arrange_upcall(TargetHandle::new(0x4000), &mt, &desc, &scope)
        .unwrap();

    assert!(stub.discards_return());
    assert_eq!(stub.target().addr(), 0x4000);
    // The native caller's buffer pointer is boxed unchecked out of x8.
    assert_eq!(
        stub.calling_sequence().argument_bindings(0),
        &[
            Binding::VmLoad {
                storage: X8,
                ty: Carrier::Long
            },
            Binding::BoxAddressRaw {
                max_size: UNBOUNDED_SIZE
            },
        ]
    );
}

#[test]
fn test_pointer_return_boxes_with_pointee_bound() {
    let mt = MethodType::new(Some(Carrier::Address), vec![]);
    let desc = FunctionDescriptor::of(
        MemoryLayout::pointer_to(MemoryLayout::int32()),
        vec![],
    );

    let cs = CallArranger::LINUX
        .get_bindings(&mt, &desc, false)
        .unwrap()
        .calling_sequence;

    assert_eq!(
        cs.return_recipe().unwrap().bindings,
        vec![
            Binding::VmLoad {
                storage: X0,
                ty: Carrier::Long
            },
            Binding::BoxAddressRaw { max_size: 4 },
        ]
    );
}

#[test]
fn test_hfa_return_uses_vector_output_bank() {
    let hfa = MemoryLayout::struct_of(vec![MemoryLayout::float64(); 4]);
    let mt = MethodType::new(Some(Carrier::Segment), vec![]);
    let desc = FunctionDescriptor::of(hfa, vec![]);

    let bindings = CallArranger::LINUX.get_bindings(&mt, &desc, false).unwrap();
    // A 32-byte HFA still returns in registers, not in memory.
    assert!(!bindings.is_in_memory_return);
    let ret = bindings.calling_sequence.return_recipe().unwrap().bindings.clone();
    assert_eq!(loads(&ret), vec![V0, V1, V2, aarch64_callseq::aarch64::regs::V3]);
}

#[test]
fn test_unbox_box_storage_duality() {
    // The same signature arranged as downcall arguments (unbox) and upcall
    // arguments (box) must agree on every storage assignment.
    let hfa = MemoryLayout::struct_of(vec![MemoryLayout::float32(); 3]);
    let small = MemoryLayout::struct_of(vec![MemoryLayout::int64(), MemoryLayout::int8()]);
    let params = vec![
        Carrier::Int,
        Carrier::Double,
        Carrier::Segment,
        Carrier::Address,
        Carrier::Segment,
        Carrier::Long,
    ];
    let layouts = vec![
        MemoryLayout::int32(),
        MemoryLayout::float64(),
        hfa,
        MemoryLayout::pointer(),
        small,
        MemoryLayout::int64(),
    ];
    let mt = MethodType::new(None, params);
    let desc = FunctionDescriptor::of_void(layouts);

    let down = CallArranger::LINUX
        .get_bindings(&mt, &desc, false)
        .unwrap()
        .calling_sequence;
    let up = CallArranger::LINUX
        .get_bindings(&mt, &desc, true)
        .unwrap()
        .calling_sequence;

    for i in 0..mt.parameter_count() {
        assert_eq!(
            stores(down.argument_bindings(i)),
            loads(up.argument_bindings(i)),
            "argument {i} placed differently in the two directions"
        );
    }
}

#[test]
fn test_carrier_layout_mismatch_is_reported() {
    // A scalar argument mis-described with the buffer carrier is rejected,
    // in both directions, just like a struct behind a scalar carrier.
    let mt = MethodType::new(None, vec![Carrier::Segment]);
    let desc = FunctionDescriptor::of_void(vec![MemoryLayout::float64()]);
    for for_upcall in [false, true] {
        let err = CallArranger::LINUX.get_bindings(&mt, &desc, for_upcall);
        assert!(matches!(
            err,
            Err(aarch64_callseq::ArrangeError::CarrierMismatch { .. })
        ));
    }

    let mt = MethodType::new(None, vec![Carrier::Int]);
    let desc = FunctionDescriptor::of_void(vec![MemoryLayout::struct_of(vec![
        MemoryLayout::float32(),
        MemoryLayout::float32(),
    ])]);
    let err = CallArranger::LINUX.get_bindings(&mt, &desc, false);
    assert!(matches!(
        err,
        Err(aarch64_callseq::ArrangeError::CarrierMismatch { .. })
    ));
}

#[test]
fn test_stack_offsets_are_monotonic() {
    // Overflow both banks and interleave; every stack offset must be
    // non-decreasing in argument order.
    let mut params = Vec::new();
    let mut layouts = Vec::new();
    for _ in 0..10 {
        params.push(Carrier::Long);
        layouts.push(MemoryLayout::int64());
        params.push(Carrier::Double);
        layouts.push(MemoryLayout::float64());
    }
    let mt = MethodType::new(None, params);
    let desc = FunctionDescriptor::of_void(layouts);

    for arranger in [CallArranger::LINUX, CallArranger::MACOS, CallArranger::WINDOWS] {
        let cs = arranger.get_bindings(&mt, &desc, false).unwrap().calling_sequence;
        let mut last = 0u32;
        for recipe in cs.arguments() {
            for storage in stores(&recipe.bindings) {
                if let VMStorage::Stack { offset, .. } = storage {
                    assert!(offset >= last, "stack offset went backwards");
                    last = offset;
                }
            }
        }
    }
}
