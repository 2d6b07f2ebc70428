use std::fmt;

use super::{ArgumentDirection, FunctionId, TypeMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(u32);

impl TemplateId {
    pub(crate) fn new(index: usize) -> Self {
        TemplateId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateArgument {
    pub name: String,
    pub direction: ArgumentDirection,
}

/// One valid argument-type assignment of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    pub types: TypeMap,
    /// Concrete record answering the permutation, once resolved.
    pub function: Option<FunctionId>,
}

/// A family of permutations sharing a name and an argument list.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) name: String,
    pub(crate) arguments: Vec<TemplateArgument>,
    pub(crate) permutations: Vec<Permutation>,
    /// Permutations contributed by registered functions, live or not.
    pub(crate) registered: Vec<Permutation>,
    pub(crate) factory: Option<usize>,
    pub(crate) types_generation: u64,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[TemplateArgument] {
        &self.arguments
    }

    pub fn permutations(&self) -> &[Permutation] {
        &self.permutations
    }

    pub fn is_factory(&self) -> bool {
        self.factory.is_some()
    }

    pub fn find_permutation(&self, types: &TypeMap) -> Option<&Permutation> {
        self.permutations.iter().find(|permutation| &permutation.types == types)
    }

    /// Registry generation the permutation set was last computed against.
    pub fn types_generation(&self) -> u64 {
        self.types_generation
    }
}
