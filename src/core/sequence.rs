//! Calling sequences: the arranger's immutable product.
//!
//! A [`CallingSequence`] holds one binding recipe per argument (plus the
//! optional return recipe) together with the carriers and layouts they were
//! derived from. It is built once through [`CallingSequenceBuilder`] and
//! never mutated afterwards; sharing it across threads is safe.

use super::binding::Binding;
use super::layout::{Carrier, MemoryLayout};
use super::options::LinkerOptions;
use super::storage::AbiDescriptor;

/// One argument (or the return value) with its binding recipe.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub carrier: Carrier,
    pub layout: MemoryLayout,
    pub bindings: Vec<Binding>,
}

/// The sealed product of one arrangement.
#[derive(Debug)]
pub struct CallingSequence {
    abi: &'static AbiDescriptor,
    for_upcall: bool,
    options: LinkerOptions,
    arguments: Vec<Recipe>,
    return_recipe: Option<Recipe>,
    has_indirect_result: bool,
}

impl CallingSequence {
    /// Per-argument recipes in declaration order. When the sequence carries
    /// an indirect-result prologue, the synthetic pointer argument is at
    /// index 0.
    pub fn arguments(&self) -> &[Recipe] {
        &self.arguments
    }

    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    pub fn argument_bindings(&self, index: usize) -> &[Binding] {
        &self.arguments[index].bindings
    }

    pub fn return_recipe(&self) -> Option<&Recipe> {
        self.return_recipe.as_ref()
    }

    /// True when the sequence begins with the hidden indirect-result pointer
    /// argument.
    pub fn has_indirect_result(&self) -> bool {
        self.has_indirect_result
    }

    pub fn for_upcall(&self) -> bool {
        self.for_upcall
    }

    pub fn options(&self) -> LinkerOptions {
        self.options
    }

    pub fn abi(&self) -> &'static AbiDescriptor {
        self.abi
    }
}

/// Builder handed to the binding calculators by the arranger facade.
#[derive(Debug)]
pub struct CallingSequenceBuilder {
    abi: &'static AbiDescriptor,
    for_upcall: bool,
    options: LinkerOptions,
    arguments: Vec<Recipe>,
    return_recipe: Option<Recipe>,
    has_indirect_result: bool,
}

impl CallingSequenceBuilder {
    pub fn new(abi: &'static AbiDescriptor, for_upcall: bool, options: LinkerOptions) -> Self {
        Self {
            abi,
            for_upcall,
            options,
            arguments: Vec::new(),
            return_recipe: None,
            has_indirect_result: false,
        }
    }

    /// Append the recipe for the next argument in declaration order.
    pub fn add_argument_bindings(
        &mut self,
        carrier: Carrier,
        layout: MemoryLayout,
        bindings: Vec<Binding>,
    ) {
        verify_recipe(&bindings, !self.for_upcall);
        self.arguments.push(Recipe {
            carrier,
            layout,
            bindings,
        });
    }

    /// Append the synthetic indirect-result pointer argument and mark the
    /// prologue. Must precede every ordinary argument.
    pub fn add_indirect_result_bindings(
        &mut self,
        carrier: Carrier,
        layout: MemoryLayout,
        bindings: Vec<Binding>,
    ) {
        debug_assert!(self.arguments.is_empty(), "indirect result must come first");
        debug_assert!(!self.has_indirect_result);
        self.add_argument_bindings(carrier, layout, bindings);
        self.has_indirect_result = true;
    }

    pub fn set_return_bindings(
        &mut self,
        carrier: Carrier,
        layout: MemoryLayout,
        bindings: Vec<Binding>,
    ) {
        verify_recipe(&bindings, self.for_upcall);
        debug_assert!(self.return_recipe.is_none());
        self.return_recipe = Some(Recipe {
            carrier,
            layout,
            bindings,
        });
    }

    /// Seal the sequence.
    pub fn build(self) -> CallingSequence {
        CallingSequence {
            abi: self.abi,
            for_upcall: self.for_upcall,
            options: self.options,
            arguments: self.arguments,
            return_recipe: self.return_recipe,
            has_indirect_result: self.has_indirect_result,
        }
    }
}

/// Debug check that a recipe is well formed under the executor's operand
/// stack model. Unbox recipes start with the managed value on the stack and
/// must consume it; box recipes start empty and must leave exactly the
/// produced value.
fn verify_recipe(bindings: &[Binding], unbox: bool) {
    if cfg!(debug_assertions) {
        let mut depth: i64 = if unbox { 1 } else { 0 };
        for op in bindings {
            let (required, delta) = match op {
                Binding::Dup => (1, 1),
                Binding::VmStore { .. } => (1, -1),
                Binding::VmLoad { .. } => (0, 1),
                Binding::BufferLoad { .. } => (1, 0),
                Binding::BufferStore { .. } => (2, -2),
                Binding::Allocate { .. } => (0, 1),
                Binding::Copy { .. } => (1, 0),
                Binding::UnboxAddress => (1, 0),
                Binding::BoxAddress { .. } => (1, 0),
                Binding::BoxAddressRaw { .. } => (1, 0),
            };
            debug_assert!(depth >= required, "recipe underflows at {op:?}");
            depth += delta;
        }
        let expected = if unbox { 0 } else { 1 };
        debug_assert!(
            depth == expected,
            "recipe ends at depth {depth}, expected {expected}"
        );
    }
}
