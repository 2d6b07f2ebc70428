use std::fmt;
use std::sync::Arc;

use crate::registry::{TypeCategory, TypeIndex, TypeRegistry};

use super::{ArgumentDirection, NativeFunction, TypeMap};

/// The set of types a dispatch argument accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentTypes {
    Fixed(TypeIndex),
    Categories(Vec<TypeCategory>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchArgument {
    pub name: String,
    pub direction: ArgumentDirection,
    pub types: ArgumentTypes,
}

impl DispatchArgument {
    pub fn new(name: impl Into<String>, direction: ArgumentDirection, types: ArgumentTypes) -> Self {
        Self {
            name: name.into(),
            direction,
            types,
        }
    }

    pub fn accepts(&self, registry: &TypeRegistry, type_index: TypeIndex) -> bool {
        match &self.types {
            ArgumentTypes::Fixed(fixed) => *fixed == type_index,
            ArgumentTypes::Categories(categories) => categories
                .iter()
                .any(|category| registry.is_type_in_category(type_index, *category)),
        }
    }
}

/// A polymorphic operation whose native entry point depends on the resolved
/// argument types.
pub trait DispatchFactory: fmt::Debug + Send + Sync {
    fn factory_name(&self) -> &str;

    fn arguments(&self) -> Vec<DispatchArgument>;

    /// Argument whose candidate types drive permutation enumeration.
    fn primary_argument(&self) -> Option<String> {
        self.arguments()
            .into_iter()
            .find(|argument| matches!(argument.types, ArgumentTypes::Categories(_)))
            .map(|argument| argument.name)
    }

    /// Singletons answer every permutation with one instance; otherwise
    /// [`DispatchFactory::instantiate`] is called once per permutation.
    fn is_singleton(&self) -> bool {
        true
    }

    fn instantiate(&self, _types: &TypeMap) -> Option<Arc<dyn DispatchFactory>> {
        None
    }

    /// Completes a type map from one argument's type. Must be a pure
    /// function of its inputs; `None` when the type is not supported.
    fn propagate_argument_type(
        &self,
        argument: &str,
        type_index: TypeIndex,
        registry: &TypeRegistry,
    ) -> Option<TypeMap>;

    fn get_dispatch_function(&self, types: &TypeMap, registry: &TypeRegistry) -> Option<NativeFunction>;

    /// Name bound to the operand at `index` when the instruction carries
    /// `total` operands. Operands past the declared arguments repeat the
    /// last argument name with a positional suffix.
    fn argument_name_for_operand_index(&self, index: usize, total: usize) -> Option<String> {
        let arguments = self.arguments();
        if let Some(argument) = arguments.get(index) {
            return Some(argument.name.clone());
        }
        if index < total {
            return arguments
                .last()
                .map(|argument| format!("{}_{}", argument.name, index + 1 - arguments.len()));
        }
        None
    }
}
