//! AArch64 C ABI call arranger.
//!
//! This module turns a function signature (a [`MethodType`] plus a
//! [`FunctionDescriptor`]) into a [`CallingSequence`]: the deterministic plan
//! for how every argument and the return value crosses the AArch64
//! procedure-call boundary. The plan is what the downstream linker
//! materializes into a downcall or upcall trampoline; synthetic arguments
//! such as the pointer to an in-memory return buffer are taken care of here.
//!
//! There are minor differences between the ABIs implemented on Linux, macOS
//! and Windows, captured by a small [`PlatformPolicy`] record. Clients access
//! the variants through the provided constants [`CallArranger::LINUX`],
//! [`CallArranger::MACOS`] and [`CallArranger::WINDOWS`]; all three are
//! immutable and freely shared across threads, since every arrangement
//! creates its own calculators.

use bumpalo::{collections::Vec as BumpVec, Bump};

use crate::core::binding::{Binding, BindingBuilder, UNBOUNDED_SIZE};
use crate::core::error::{ArrangeError, ArrangeResult};
use crate::core::layout::{align_up, Carrier, FunctionDescriptor, MemoryLayout, MethodType};
use crate::core::options::LinkerOptions;
use crate::core::sequence::{CallingSequence, CallingSequenceBuilder};
use crate::core::storage::{AbiDescriptor, RegBank, VMStorage};

use super::regs::{self, INDIRECT_RESULT, MAX_REGISTER_ARGUMENTS, STACK_SLOT_SIZE};
use super::type_class::{self, HfaLeaf, TypeClass};

/// The four boolean policies in which the AArch64 platforms diverge from the
/// baseline AAPCS64, plus the call-site classification hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformPolicy {
    var_args_on_stack: bool,
    requires_sub_slot_stack_packing: bool,
    use_int_regs_for_variadic_fp_args: bool,
    spills_variadic_structs_partially: bool,
}

impl PlatformPolicy {
    /// Are variadic arguments assigned to registers as in the standard
    /// calling convention, or always passed on the stack?
    pub fn var_args_on_stack(&self) -> bool {
        self.var_args_on_stack
    }

    /// Does this ABI pack stack arguments to their own alignment rather than
    /// to full 8-byte slots?
    pub fn requires_sub_slot_stack_packing(&self) -> bool {
        self.requires_sub_slot_stack_packing
    }

    /// Are floating point arguments to variadic functions passed in general
    /// purpose registers instead of floating point registers?
    pub fn use_int_regs_for_variadic_fp_args(&self) -> bool {
        self.use_int_regs_for_variadic_fp_args
    }

    /// May a variadic struct occupy the remaining registers of a bank and
    /// spill only its tail to the stack?
    pub fn spills_variadic_structs_partially(&self) -> bool {
        self.spills_variadic_structs_partially
    }

    /// Classify an argument layout at the call site.
    ///
    /// Platforms that bar variadic floats from the vector bank route whole
    /// variadic HFAs the same way: slice-wise through the integer bank, like
    /// any other small aggregate. Everything else delegates to the canonical
    /// classifier; the variadic flag is otherwise dormant.
    pub fn classify_for_bindings(
        &self,
        layout: &MemoryLayout,
        for_variadic_function: bool,
    ) -> ArrangeResult<TypeClass> {
        let class = TypeClass::classify(layout)?;
        if for_variadic_function
            && self.use_int_regs_for_variadic_fp_args
            && class == TypeClass::StructHfa
        {
            return Ok(TypeClass::StructRegister);
        }
        Ok(class)
    }
}

/// The pair produced by an arrangement: the sealed sequence plus whether the
/// return travels through caller-allocated memory.
#[derive(Debug)]
pub struct Bindings {
    pub calling_sequence: CallingSequence,
    pub is_in_memory_return: bool,
}

/// Per-platform entry point wiring the classifier, the storage calculator
/// and the binding calculators together.
#[derive(Debug)]
pub struct CallArranger {
    name: &'static str,
    policy: PlatformPolicy,
    abi: &'static AbiDescriptor,
}

impl CallArranger {
    pub const LINUX: CallArranger = CallArranger {
        name: "linux",
        policy: PlatformPolicy {
            var_args_on_stack: false,
            requires_sub_slot_stack_packing: false,
            use_int_regs_for_variadic_fp_args: false,
            spills_variadic_structs_partially: false,
        },
        abi: &regs::C,
    };

    pub const MACOS: CallArranger = CallArranger {
        name: "macos",
        policy: PlatformPolicy {
            var_args_on_stack: true,
            requires_sub_slot_stack_packing: true,
            use_int_regs_for_variadic_fp_args: false,
            spills_variadic_structs_partially: false,
        },
        abi: &regs::C,
    };

    pub const WINDOWS: CallArranger = CallArranger {
        name: "windows",
        policy: PlatformPolicy {
            var_args_on_stack: false,
            requires_sub_slot_stack_packing: false,
            use_int_regs_for_variadic_fp_args: true,
            spills_variadic_structs_partially: true,
        },
        abi: &regs::C,
    };

    pub fn policy(&self) -> PlatformPolicy {
        self.policy
    }

    pub fn abi_descriptor(&self) -> &'static AbiDescriptor {
        self.abi
    }

    /// Arrange a call with no linker options.
    pub fn get_bindings(
        &self,
        mt: &MethodType,
        desc: &FunctionDescriptor,
        for_upcall: bool,
    ) -> ArrangeResult<Bindings> {
        self.get_bindings_with_options(mt, desc, for_upcall, &LinkerOptions::empty())
    }

    /// Arrange a call: classify the return to decide on an indirect-result
    /// prologue, then feed every argument through the direction-appropriate
    /// binding calculator in declaration order.
    pub fn get_bindings_with_options(
        &self,
        mt: &MethodType,
        desc: &FunctionDescriptor,
        for_upcall: bool,
        options: &LinkerOptions,
    ) -> ArrangeResult<Bindings> {
        assert_eq!(
            mt.parameter_count(),
            desc.argument_layouts().len(),
            "method type and descriptor disagree on arity"
        );
        log::debug!(
            "{}: arranging {} with {} argument(s)",
            self.name,
            if for_upcall { "upcall" } else { "downcall" },
            mt.parameter_count()
        );

        let for_variadic_function = options.is_variadic_function();
        let arena = Bump::new();
        if for_upcall {
            // Native caller into managed code: arguments are boxed into
            // managed values, the managed return is unboxed into registers.
            self.arrange(
                mt,
                desc,
                for_upcall,
                options,
                BoxBindingCalculator::new(self.abi, self.policy, true, &arena),
                UnboxBindingCalculator::new(self.abi, self.policy, false, for_variadic_function, &arena),
            )
        } else {
            self.arrange(
                mt,
                desc,
                for_upcall,
                options,
                UnboxBindingCalculator::new(self.abi, self.policy, true, for_variadic_function, &arena),
                BoxBindingCalculator::new(self.abi, self.policy, false, &arena),
            )
        }
    }

    fn arrange<'a>(
        &self,
        mt: &MethodType,
        desc: &FunctionDescriptor,
        for_upcall: bool,
        options: &LinkerOptions,
        mut arg_calc: impl BindingCalculator<'a>,
        mut ret_calc: impl BindingCalculator<'a>,
    ) -> ArrangeResult<Bindings> {
        let mut csb = CallingSequenceBuilder::new(self.abi, for_upcall, *options);

        let return_in_memory = Self::is_in_memory_return(desc.return_layout());
        if return_in_memory {
            let bindings = arg_calc.get_indirect_bindings();
            csb.add_indirect_result_bindings(Carrier::Segment, MemoryLayout::pointer(), bindings);
        } else if let Some(layout) = desc.return_layout() {
            let carrier = mt
                .return_carrier()
                .expect("descriptor has a return layout but the method type is void");
            let bindings = ret_calc.get_bindings(carrier, layout)?;
            csb.set_return_bindings(carrier, layout.clone(), bindings);
        }

        for (i, layout) in desc.argument_layouts().iter().enumerate() {
            let carrier = mt.parameters()[i];
            if self.policy.var_args_on_stack() && options.is_varargs_index(i) {
                arg_calc.storage_calculator().adjust_for_var_args();
            }
            let bindings = arg_calc.get_bindings(carrier, layout)?;
            csb.add_argument_bindings(carrier, layout.clone(), bindings);
        }

        Ok(Bindings {
            calling_sequence: csb.build(),
            is_in_memory_return: return_in_memory,
        })
    }

    fn is_in_memory_return(return_layout: Option<&MemoryLayout>) -> bool {
        return_layout.is_some_and(|layout| {
            layout.is_group()
                && TypeClass::classify(layout).ok() == Some(TypeClass::StructReference)
        })
    }

    /// Arrange a downcall and package the sequence for the trampoline
    /// factory. For in-memory returns the handle also names the layout whose
    /// buffer the call-time adapter must allocate and pass through x8.
    pub fn arrange_downcall(
        &self,
        mt: &MethodType,
        desc: &FunctionDescriptor,
        options: &LinkerOptions,
    ) -> ArrangeResult<DowncallHandle> {
        let bindings = self.get_bindings_with_options(mt, desc, false, options)?;
        let return_buffer_layout = if bindings.is_in_memory_return {
            desc.return_layout().cloned()
        } else {
            None
        };
        Ok(DowncallHandle {
            sequence: bindings.calling_sequence,
            return_buffer_layout,
        })
    }

    /// Arrange an upcall stub dispatching to `target`, tied to the lifetime
    /// of `scope`. When the native caller supplied a return buffer through
    /// x8, the managed target's return value is discarded: the sequence has
    /// no bindings for it.
    pub fn arrange_upcall<'scope>(
        &self,
        target: TargetHandle,
        mt: &MethodType,
        desc: &FunctionDescriptor,
        scope: &'scope UpcallScope,
    ) -> ArrangeResult<UpcallStub<'scope>> {
        let bindings = self.get_bindings(mt, desc, true)?;
        Ok(UpcallStub {
            target,
            discards_return: bindings.is_in_memory_return,
            sequence: bindings.calling_sequence,
            scope,
        })
    }
}

/// Opaque handle to the managed entry point an upcall stub dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetHandle(usize);

impl TargetHandle {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> usize {
        self.0
    }
}

/// Arrangement product for a downcall, consumed by the trampoline factory.
#[derive(Debug)]
pub struct DowncallHandle {
    sequence: CallingSequence,
    return_buffer_layout: Option<MemoryLayout>,
}

impl DowncallHandle {
    pub fn calling_sequence(&self) -> &CallingSequence {
        &self.sequence
    }

    pub fn returns_in_memory(&self) -> bool {
        self.return_buffer_layout.is_some()
    }

    /// Layout of the caller-allocated return buffer, for in-memory returns.
    pub fn return_buffer_layout(&self) -> Option<&MemoryLayout> {
        self.return_buffer_layout.as_ref()
    }
}

/// Lifetime scope for an upcall stub. The wrapped arena is where the stub
/// factory places the generated code and its metadata; dropping the scope
/// while native code can still call the stub is the caller's bug to avoid.
#[derive(Default)]
pub struct UpcallScope {
    arena: Bump,
}

impl std::fmt::Debug for UpcallScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpcallScope").finish_non_exhaustive()
    }
}

impl UpcallScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arena(&self) -> &Bump {
        &self.arena
    }
}

/// Arrangement product for an upcall, bound to its scope.
#[derive(Debug)]
pub struct UpcallStub<'scope> {
    target: TargetHandle,
    sequence: CallingSequence,
    discards_return: bool,
    scope: &'scope UpcallScope,
}

impl<'scope> UpcallStub<'scope> {
    pub fn target(&self) -> TargetHandle {
        self.target
    }

    pub fn calling_sequence(&self) -> &CallingSequence {
        &self.sequence
    }

    /// True when the managed return value is dropped because the native
    /// caller receives the result through its own buffer.
    pub fn discards_return(&self) -> bool {
        self.discards_return
    }

    pub fn scope(&self) -> &'scope UpcallScope {
        self.scope
    }
}

/// Stateful allocator of registers and stack slots, consumed left to right.
///
/// One instance exists per binding calculator and per arrangement; counters
/// always start at zero. Once a bank overflows for one argument it stays
/// closed for all subsequent arguments of that kind, so an argument is never
/// split between registers and stack (the Windows variadic-struct partial
/// spill being the one sanctioned exception).
struct StorageCalculator<'a> {
    abi: &'static AbiDescriptor,
    policy: PlatformPolicy,
    for_arguments: bool,
    for_variadic_function: bool,
    /// Sticky once the variadic section has begun.
    for_var_args: bool,
    n_regs: [usize; 2],
    stack_offset: u64,
    arena: &'a Bump,
}

impl<'a> StorageCalculator<'a> {
    fn new(
        abi: &'static AbiDescriptor,
        policy: PlatformPolicy,
        for_arguments: bool,
        for_variadic_function: bool,
        arena: &'a Bump,
    ) -> Self {
        Self {
            abi,
            policy,
            for_arguments,
            for_variadic_function,
            for_var_args: false,
            n_regs: [0, 0],
            stack_offset: 0,
            arena,
        }
    }

    fn align_stack(&mut self, alignment: u64) {
        self.stack_offset = align_up(self.stack_offset, alignment);
    }

    fn stack_alloc(&mut self, size: u64, alignment: u64) -> ArrangeResult<VMStorage> {
        debug_assert!(self.for_arguments, "no stack returns");
        let aligned_offset = align_up(self.stack_offset, alignment);
        let encoded_size =
            u16::try_from(size).map_err(|_| ArrangeError::StackSlotTooLarge { size })?;
        debug_assert!(aligned_offset <= u32::MAX as u64);
        let storage = regs::stack_storage(encoded_size, aligned_offset as u32);
        self.stack_offset = aligned_offset + size;
        Ok(storage)
    }

    fn stack_alloc_layout(&mut self, layout: &MemoryLayout) -> ArrangeResult<VMStorage> {
        let slot_alignment = if self.policy.requires_sub_slot_stack_packing() && !self.for_var_args
        {
            layout.byte_alignment()
        } else {
            layout.byte_alignment().max(STACK_SLOT_SIZE)
        };
        self.stack_alloc(layout.byte_size(), slot_alignment)
    }

    fn reg_alloc(&mut self, bank: RegBank, count: usize) -> Option<BumpVec<'a, VMStorage>> {
        let idx = bank.index();
        if self.n_regs[idx] + count <= MAX_REGISTER_ARGUMENTS {
            let source = if self.for_arguments {
                self.abi.input_storage[idx]
            } else {
                self.abi.output_storage[idx]
            };
            let mut result = BumpVec::with_capacity_in(count, self.arena);
            for _ in 0..count {
                result.push(source[self.n_regs[idx]]);
                self.n_regs[idx] += 1;
            }
            Some(result)
        } else {
            // Any further allocations of this kind must come from the stack.
            self.n_regs[idx] = MAX_REGISTER_ARGUMENTS;
            None
        }
    }

    fn required_registers(layout: &MemoryLayout) -> usize {
        (align_up(layout.byte_size(), STACK_SLOT_SIZE) / STACK_SLOT_SIZE) as usize
    }

    /// Allocate whatever registers remain for a struct that may spill its
    /// tail, up to the number the struct actually needs.
    fn reg_alloc_partial(
        &mut self,
        bank: RegBank,
        layout: &MemoryLayout,
    ) -> Option<BumpVec<'a, VMStorage>> {
        let available = MAX_REGISTER_ARGUMENTS - self.n_regs[bank.index()];
        if available == 0 {
            return None;
        }
        let request = Self::required_registers(layout).min(available);
        self.reg_alloc(bank, request)
    }

    fn reg_alloc_for_struct(
        &mut self,
        bank: RegBank,
        layout: &MemoryLayout,
    ) -> Option<BumpVec<'a, VMStorage>> {
        let spill_partially =
            self.for_variadic_function && self.policy.spills_variadic_structs_partially();
        if spill_partially {
            self.reg_alloc_partial(bank, layout)
        } else {
            self.reg_alloc(bank, Self::required_registers(layout))
        }
    }

    /// One register of `bank`, or one stack slot once the bank is closed.
    fn next_storage(&mut self, bank: RegBank, layout: &MemoryLayout) -> ArrangeResult<VMStorage> {
        let mut bank = bank;
        if bank == RegBank::Vector {
            let for_variadic_function_args = self.for_arguments && self.for_variadic_function;
            if for_variadic_function_args && self.policy.use_int_regs_for_variadic_fp_args() {
                bank = RegBank::Integer;
            }
        }
        match self.reg_alloc(bank, 1) {
            Some(regs) => Ok(regs[0]),
            None => self.stack_alloc_layout(layout),
        }
    }

    /// All of an HFA's vector registers, or its packed stack slots on the
    /// platforms that spill HFA fields individually, or `None` to signal the
    /// generic whole-struct spill.
    fn next_storage_for_hfa(
        &mut self,
        leaves: &[HfaLeaf],
    ) -> ArrangeResult<Option<BumpVec<'a, VMStorage>>> {
        match self.reg_alloc(RegBank::Vector, leaves.len()) {
            Some(regs) => Ok(Some(regs)),
            None if self.policy.requires_sub_slot_stack_packing() && !self.for_var_args => {
                // HFA arguments are spilled as if their individual fields had
                // been allocated separately rather than as if the struct had
                // been spilled as a whole.
                let mut slots = BumpVec::with_capacity_in(leaves.len(), self.arena);
                for leaf in leaves {
                    slots.push(self.stack_alloc(leaf.size, leaf.size)?);
                }
                Ok(Some(slots))
            }
            None => Ok(None),
        }
    }

    /// Close both register banks at the fixed/variadic boundary: this system
    /// passes all variadic parameters on the stack.
    fn adjust_for_var_args(&mut self) {
        if !self.for_var_args {
            log::trace!("variadic section begins; closing both register banks");
        }
        self.n_regs = [MAX_REGISTER_ARGUMENTS; 2];
        self.for_var_args = true;
    }
}

/// Per-argument recipe emitter; one concrete variant per data direction.
trait BindingCalculator<'a> {
    fn storage_calculator(&mut self) -> &mut StorageCalculator<'a>;

    /// Recipe for the synthetic indirect-result pointer argument.
    fn get_indirect_bindings(&mut self) -> Vec<Binding>;

    /// Recipe for one argument (or the return value) of `layout` carried by
    /// `carrier`.
    fn get_bindings(&mut self, carrier: Carrier, layout: &MemoryLayout)
        -> ArrangeResult<Vec<Binding>>;
}

fn ensure_buffer_carrier(carrier: Carrier, layout: &MemoryLayout) -> ArrangeResult<()> {
    if carrier.is_buffer() {
        Ok(())
    } else {
        Err(ArrangeError::CarrierMismatch {
            carrier,
            layout: layout.to_string(),
        })
    }
}

fn ensure_scalar_carrier(carrier: Carrier, layout: &MemoryLayout) -> ArrangeResult<()> {
    if carrier.is_buffer() {
        Err(ArrangeError::CarrierMismatch {
            carrier,
            layout: layout.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Spill a whole struct to the stack in 8-byte slices, unbox direction. A
/// struct that did not fit its register class is passed entirely on the
/// stack, never split between registers and stack.
fn spill_struct_unbox(
    storage: &mut StorageCalculator<'_>,
    bindings: &mut BindingBuilder,
    layout: &MemoryLayout,
) -> ArrangeResult<()> {
    spill_partial_struct_unbox(storage, bindings, layout, 0)
}

/// Spill the `offset..size` tail of a struct to the stack, unbox direction.
fn spill_partial_struct_unbox(
    storage: &mut StorageCalculator<'_>,
    bindings: &mut BindingBuilder,
    layout: &MemoryLayout,
    mut offset: u64,
) -> ArrangeResult<()> {
    let size = layout.byte_size();
    while offset < size {
        let copy = (size - offset).min(STACK_SLOT_SIZE);
        let slot = storage.stack_alloc(copy, STACK_SLOT_SIZE)?;
        if offset + STACK_SLOT_SIZE < size {
            bindings.dup();
        }
        let ty = Carrier::for_size(copy, false)?;
        bindings.buffer_load(offset, ty).vm_store(slot, ty);
        offset += STACK_SLOT_SIZE;
    }

    if storage.policy.requires_sub_slot_stack_packing() {
        // Pad to the next stack slot boundary instead of packing additional
        // arguments into the unused space.
        storage.align_stack(STACK_SLOT_SIZE);
    }
    Ok(())
}

/// Dual of [`spill_struct_unbox`]: fill a managed buffer from stack slots.
/// The buffer reference stays on the stack for the final consumer, so every
/// iteration dups it.
fn spill_struct_box(
    storage: &mut StorageCalculator<'_>,
    bindings: &mut BindingBuilder,
    layout: &MemoryLayout,
) -> ArrangeResult<()> {
    let size = layout.byte_size();
    let mut offset = 0;
    while offset < size {
        let copy = (size - offset).min(STACK_SLOT_SIZE);
        let slot = storage.stack_alloc(copy, STACK_SLOT_SIZE)?;
        let ty = Carrier::for_size(copy, false)?;
        bindings.dup().vm_load(slot, ty).buffer_store(offset, ty);
        offset += STACK_SLOT_SIZE;
    }

    if storage.policy.requires_sub_slot_stack_packing() {
        storage.align_stack(STACK_SLOT_SIZE);
    }
    Ok(())
}

/// Managed value into native storages: the argument side of a downcall and
/// the return side of an upcall.
struct UnboxBindingCalculator<'a> {
    storage: StorageCalculator<'a>,
    for_variadic_function: bool,
}

impl<'a> UnboxBindingCalculator<'a> {
    fn new(
        abi: &'static AbiDescriptor,
        policy: PlatformPolicy,
        for_arguments: bool,
        for_variadic_function: bool,
        arena: &'a Bump,
    ) -> Self {
        Self {
            storage: StorageCalculator::new(abi, policy, for_arguments, for_variadic_function, arena),
            for_variadic_function,
        }
    }
}

impl<'a> BindingCalculator<'a> for UnboxBindingCalculator<'a> {
    fn storage_calculator(&mut self) -> &mut StorageCalculator<'a> {
        &mut self.storage
    }

    fn get_indirect_bindings(&mut self) -> Vec<Binding> {
        let mut bindings = BindingBuilder::new();
        bindings
            .unbox_address()
            .vm_store(INDIRECT_RESULT, Carrier::Long);
        bindings.build()
    }

    fn get_bindings(
        &mut self,
        carrier: Carrier,
        layout: &MemoryLayout,
    ) -> ArrangeResult<Vec<Binding>> {
        let class = self
            .storage
            .policy
            .classify_for_bindings(layout, self.for_variadic_function)?;
        log::trace!("unbox {layout} as {class:?}");
        let mut bindings = BindingBuilder::new();
        match class {
            TypeClass::StructRegister => {
                ensure_buffer_carrier(carrier, layout)?;
                let size = layout.byte_size();
                match self.storage.reg_alloc_for_struct(RegBank::Integer, layout) {
                    Some(regs) => {
                        let mut offset = 0;
                        let mut reg_index = 0;
                        while offset < size && reg_index < regs.len() {
                            let copy = (size - offset).min(STACK_SLOT_SIZE);
                            let storage = regs[reg_index];
                            reg_index += 1;
                            let ty = Carrier::for_size(copy, false)?;
                            if offset + copy < size {
                                bindings.dup();
                            }
                            bindings.buffer_load(offset, ty).vm_store(storage, ty);
                            offset += copy;
                        }
                        if offset < size {
                            // Partial-spill tail: the slices that found no
                            // register continue on the stack.
                            spill_partial_struct_unbox(
                                &mut self.storage,
                                &mut bindings,
                                layout,
                                offset,
                            )?;
                        }
                    }
                    None => spill_struct_unbox(&mut self.storage, &mut bindings, layout)?,
                }
            }
            TypeClass::StructReference => {
                ensure_buffer_carrier(carrier, layout)?;
                bindings.copy(layout.clone()).unbox_address();
                let storage = self
                    .storage
                    .next_storage(RegBank::Integer, &MemoryLayout::pointer())?;
                bindings.vm_store(storage, Carrier::Long);
            }
            TypeClass::StructHfa => {
                ensure_buffer_carrier(carrier, layout)?;
                let leaves = type_class::hfa_leaves(layout)
                    .expect("HFA classification implies homogeneous float leaves");
                match self.storage.next_storage_for_hfa(&leaves)? {
                    Some(storages) => {
                        for (i, leaf) in leaves.iter().enumerate() {
                            let storage = storages[i];
                            let ty = Carrier::for_size(leaf.size, storage.is_vector_reg())?;
                            if i + 1 < leaves.len() {
                                bindings.dup();
                            }
                            bindings.buffer_load(leaf.offset, ty).vm_store(storage, ty);
                        }
                    }
                    None => spill_struct_unbox(&mut self.storage, &mut bindings, layout)?,
                }
            }
            TypeClass::Pointer => {
                bindings.unbox_address();
                let storage = self.storage.next_storage(RegBank::Integer, layout)?;
                bindings.vm_store(storage, Carrier::Long);
            }
            TypeClass::Integer => {
                ensure_scalar_carrier(carrier, layout)?;
                let storage = self.storage.next_storage(RegBank::Integer, layout)?;
                bindings.vm_store(storage, carrier);
            }
            TypeClass::Float => {
                ensure_scalar_carrier(carrier, layout)?;
                let storage = self.storage.next_storage(RegBank::Vector, layout)?;
                bindings.vm_store(storage, carrier);
            }
        }
        Ok(bindings.build())
    }
}

/// Native storages into a managed value: the return side of a downcall and
/// the argument side of an upcall. Upcalls never see variadic routing; the
/// variadic section is a caller-side decision.
struct BoxBindingCalculator<'a> {
    storage: StorageCalculator<'a>,
}

impl<'a> BoxBindingCalculator<'a> {
    fn new(
        abi: &'static AbiDescriptor,
        policy: PlatformPolicy,
        for_arguments: bool,
        arena: &'a Bump,
    ) -> Self {
        Self {
            storage: StorageCalculator::new(abi, policy, for_arguments, false, arena),
        }
    }
}

impl<'a> BindingCalculator<'a> for BoxBindingCalculator<'a> {
    fn storage_calculator(&mut self) -> &mut StorageCalculator<'a> {
        &mut self.storage
    }

    fn get_indirect_bindings(&mut self) -> Vec<Binding> {
        let mut bindings = BindingBuilder::new();
        bindings
            .vm_load(INDIRECT_RESULT, Carrier::Long)
            .box_address_raw(UNBOUNDED_SIZE);
        bindings.build()
    }

    fn get_bindings(
        &mut self,
        carrier: Carrier,
        layout: &MemoryLayout,
    ) -> ArrangeResult<Vec<Binding>> {
        let class = TypeClass::classify(layout)?;
        log::trace!("box {layout} as {class:?}");
        let mut bindings = BindingBuilder::new();
        match class {
            TypeClass::StructRegister => {
                ensure_buffer_carrier(carrier, layout)?;
                bindings.allocate(layout.clone());
                let size = layout.byte_size();
                match self.storage.reg_alloc_for_struct(RegBank::Integer, layout) {
                    Some(regs) => {
                        let mut offset = 0;
                        let mut reg_index = 0;
                        while offset < size {
                            let copy = (size - offset).min(STACK_SLOT_SIZE);
                            let storage = regs[reg_index];
                            reg_index += 1;
                            let ty = Carrier::for_size(copy, storage.is_vector_reg())?;
                            bindings.dup().vm_load(storage, ty).buffer_store(offset, ty);
                            offset += copy;
                        }
                    }
                    None => spill_struct_box(&mut self.storage, &mut bindings, layout)?,
                }
            }
            TypeClass::StructReference => {
                ensure_buffer_carrier(carrier, layout)?;
                let storage = self
                    .storage
                    .next_storage(RegBank::Integer, &MemoryLayout::pointer())?;
                bindings
                    .vm_load(storage, Carrier::Long)
                    .box_address(layout.clone());
            }
            TypeClass::StructHfa => {
                ensure_buffer_carrier(carrier, layout)?;
                bindings.allocate(layout.clone());
                let leaves = type_class::hfa_leaves(layout)
                    .expect("HFA classification implies homogeneous float leaves");
                match self.storage.next_storage_for_hfa(&leaves)? {
                    Some(storages) => {
                        for (i, leaf) in leaves.iter().enumerate() {
                            let storage = storages[i];
                            let ty = Carrier::for_size(leaf.size, storage.is_vector_reg())?;
                            bindings
                                .dup()
                                .vm_load(storage, ty)
                                .buffer_store(leaf.offset, ty);
                        }
                    }
                    None => spill_struct_box(&mut self.storage, &mut bindings, layout)?,
                }
            }
            TypeClass::Pointer => {
                let storage = self.storage.next_storage(RegBank::Integer, layout)?;
                bindings
                    .vm_load(storage, Carrier::Long)
                    .box_address_raw(layout.pointee_size());
            }
            TypeClass::Integer => {
                ensure_scalar_carrier(carrier, layout)?;
                let storage = self.storage.next_storage(RegBank::Integer, layout)?;
                bindings.vm_load(storage, carrier);
            }
            TypeClass::Float => {
                ensure_scalar_carrier(carrier, layout)?;
                let storage = self.storage.next_storage(RegBank::Vector, layout)?;
                bindings.vm_load(storage, carrier);
            }
        }
        Ok(bindings.build())
    }
}
