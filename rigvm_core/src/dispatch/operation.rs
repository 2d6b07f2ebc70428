use std::sync::Arc;

use crate::error::RigVmResult;
use crate::memory::Value;
use crate::registry::{TypeCategory, TypeIndex, TypeRegistry};
use crate::vm::{Invocation, SoftError};

use super::{ArgumentDirection, ArgumentTypes, DispatchArgument, DispatchFactory, NativeFunction, TypeMap};

/// Built-in polymorphic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Lossless numeric widening: uint8 → int32, int32 → int64, float → double.
    Widen,
    /// int32 → any registered enum; out-of-range values fall back to the
    /// first variant.
    IntToEnum,
    ArrayNum,
    ArrayGetAtIndex,
    ArraySetAtIndex,
    ArrayAdd,
}

const WIDENINGS: [(TypeIndex, TypeIndex); 3] = [
    (TypeIndex::UINT8, TypeIndex::INT32),
    (TypeIndex::INT32, TypeIndex::INT64),
    (TypeIndex::FLOAT, TypeIndex::DOUBLE),
];

fn single(name: &str, direction: ArgumentDirection, index: TypeIndex) -> DispatchArgument {
    DispatchArgument::new(name, direction, ArgumentTypes::Fixed(index))
}

fn any_array(name: &str, direction: ArgumentDirection) -> DispatchArgument {
    DispatchArgument::new(
        name,
        direction,
        ArgumentTypes::Categories(vec![TypeCategory::ArrayAnyValue, TypeCategory::ArrayArrayAnyValue]),
    )
}

fn any_element(name: &str, direction: ArgumentDirection) -> DispatchArgument {
    DispatchArgument::new(
        name,
        direction,
        ArgumentTypes::Categories(vec![TypeCategory::SingleAnyValue, TypeCategory::ArrayAnyValue]),
    )
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Widen,
        Operation::IntToEnum,
        Operation::ArrayNum,
        Operation::ArrayGetAtIndex,
        Operation::ArraySetAtIndex,
        Operation::ArrayAdd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Widen => "Widen",
            Operation::IntToEnum => "IntToEnum",
            Operation::ArrayNum => "ArrayNum",
            Operation::ArrayGetAtIndex => "ArrayGetAtIndex",
            Operation::ArraySetAtIndex => "ArraySetAtIndex",
            Operation::ArrayAdd => "ArrayAdd",
        }
    }

    fn array_map(registry: &TypeRegistry, array: TypeIndex) -> Option<TypeMap> {
        if !registry.is_array_type(array) {
            return None;
        }
        let element = registry.get_base_type_of(array);
        Some(TypeMap::from([
            ("Array".to_string(), array),
            ("Element".to_string(), element),
            ("Index".to_string(), TypeIndex::INT32),
        ]))
    }
}

impl DispatchFactory for Operation {
    fn factory_name(&self) -> &str {
        self.name()
    }

    fn arguments(&self) -> Vec<DispatchArgument> {
        use ArgumentDirection::*;
        match self {
            Operation::Widen => vec![
                DispatchArgument::new("Value", Input, ArgumentTypes::Categories(vec![TypeCategory::SingleNumericValue])),
                DispatchArgument::new("Result", Output, ArgumentTypes::Categories(vec![TypeCategory::SingleNumericValue])),
            ],
            Operation::IntToEnum => vec![
                single("Value", Input, TypeIndex::INT32),
                DispatchArgument::new("Result", Output, ArgumentTypes::Categories(vec![TypeCategory::SingleEnumValue])),
            ],
            Operation::ArrayNum => vec![any_array("Array", Input), single("Num", Output, TypeIndex::INT32)],
            Operation::ArrayGetAtIndex => vec![
                any_array("Array", Input),
                single("Index", Input, TypeIndex::INT32),
                any_element("Element", Output),
            ],
            Operation::ArraySetAtIndex => vec![
                any_array("Array", InputOutput),
                single("Index", Input, TypeIndex::INT32),
                any_element("Element", Input),
            ],
            Operation::ArrayAdd => vec![
                any_array("Array", InputOutput),
                any_element("Element", Input),
                single("Index", Output, TypeIndex::INT32),
            ],
        }
    }

    fn primary_argument(&self) -> Option<String> {
        let name = match self {
            Operation::Widen => "Value",
            Operation::IntToEnum => "Result",
            _ => "Array",
        };
        Some(name.to_string())
    }

    fn is_singleton(&self) -> bool {
        !matches!(self, Operation::IntToEnum)
    }

    fn instantiate(&self, types: &TypeMap) -> Option<Arc<dyn DispatchFactory>> {
        Some(Arc::new(BoundOperation {
            operation: *self,
            types: types.clone(),
        }))
    }

    fn propagate_argument_type(
        &self,
        argument: &str,
        type_index: TypeIndex,
        registry: &TypeRegistry,
    ) -> Option<TypeMap> {
        match (self, argument) {
            (Operation::Widen, "Value") => WIDENINGS
                .iter()
                .find(|(from, _)| *from == type_index)
                .map(|(from, to)| TypeMap::from([("Value".to_string(), *from), ("Result".to_string(), *to)])),
            (Operation::Widen, "Result") => WIDENINGS
                .iter()
                .find(|(_, to)| *to == type_index)
                .map(|(from, to)| TypeMap::from([("Value".to_string(), *from), ("Result".to_string(), *to)])),
            (Operation::IntToEnum, "Result") => registry.enum_variants(type_index).map(|_| {
                TypeMap::from([
                    ("Value".to_string(), TypeIndex::INT32),
                    ("Result".to_string(), type_index),
                ])
            }),
            (Operation::ArrayNum, "Array") => registry.is_array_type(type_index).then(|| {
                TypeMap::from([
                    ("Array".to_string(), type_index),
                    ("Num".to_string(), TypeIndex::INT32),
                ])
            }),
            (Operation::ArrayGetAtIndex | Operation::ArraySetAtIndex | Operation::ArrayAdd, "Array") => {
                Operation::array_map(registry, type_index)
            }
            (Operation::ArrayGetAtIndex | Operation::ArraySetAtIndex | Operation::ArrayAdd, "Element") => {
                Operation::array_map(registry, registry.get_array_type_of(type_index))
            }
            _ => None,
        }
    }

    fn get_dispatch_function(&self, types: &TypeMap, registry: &TypeRegistry) -> Option<NativeFunction> {
        match self {
            Operation::Widen => {
                let value = *types.get("Value")?;
                let result = *types.get("Result")?;
                match (value, result) {
                    (TypeIndex::UINT8, TypeIndex::INT32) => Some(widen_to_int32 as NativeFunction),
                    (TypeIndex::INT32, TypeIndex::INT64) => Some(widen_to_int64 as NativeFunction),
                    (TypeIndex::FLOAT, TypeIndex::DOUBLE) => Some(widen_to_double as NativeFunction),
                    _ => None,
                }
            }
            Operation::IntToEnum => {
                registry.enum_variants(*types.get("Result")?)?;
                Some(int_to_enum as NativeFunction)
            }
            Operation::ArrayNum => registry
                .is_array_type(*types.get("Array")?)
                .then_some(array_num as NativeFunction),
            Operation::ArrayGetAtIndex | Operation::ArraySetAtIndex | Operation::ArrayAdd => {
                let expected = Operation::array_map(registry, *types.get("Array")?)?;
                if &expected != types {
                    return None;
                }
                Some(match self {
                    Operation::ArrayGetAtIndex => array_get_at_index as NativeFunction,
                    Operation::ArraySetAtIndex => array_set_at_index as NativeFunction,
                    _ => array_add as NativeFunction,
                })
            }
        }
    }
}

/// Per-permutation instance of a non-singleton operation.
#[derive(Debug, Clone)]
pub struct BoundOperation {
    operation: Operation,
    types: TypeMap,
}

impl BoundOperation {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn types(&self) -> &TypeMap {
        &self.types
    }
}

impl DispatchFactory for BoundOperation {
    fn factory_name(&self) -> &str {
        self.operation.name()
    }

    fn arguments(&self) -> Vec<DispatchArgument> {
        self.operation.arguments()
    }

    fn primary_argument(&self) -> Option<String> {
        self.operation.primary_argument()
    }

    fn is_singleton(&self) -> bool {
        true
    }

    fn propagate_argument_type(
        &self,
        argument: &str,
        type_index: TypeIndex,
        registry: &TypeRegistry,
    ) -> Option<TypeMap> {
        self.operation.propagate_argument_type(argument, type_index, registry)
    }

    fn get_dispatch_function(&self, types: &TypeMap, registry: &TypeRegistry) -> Option<NativeFunction> {
        if types != &self.types {
            return None;
        }
        self.operation.get_dispatch_function(types, registry)
    }
}

fn widen_to_int32(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let value = invocation.int32(0)?;
    invocation.set(1, Value::Int32(value))
}

fn widen_to_int64(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let value = invocation.int64(0)?;
    invocation.set(1, Value::Int64(value))
}

fn widen_to_double(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let value = invocation.double(0)?;
    invocation.set(1, Value::Double(value))
}

fn int_to_enum(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let value = invocation.int32(0)?;
    let variants = invocation
        .registry()
        .enum_variants(invocation.type_of(1))
        .map(|variants| variants.len())
        .unwrap_or(0);
    let ordinal = if value >= 0 && (value as usize) < variants {
        value as u8
    } else {
        invocation.report(SoftError::InvalidEnumValue {
            value: i64::from(value),
            variants,
        });
        0
    };
    invocation.set(1, Value::Enum(ordinal))
}

fn array_num(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let len = invocation.array(0)?.len();
    invocation.set(1, Value::Int32(len as i32))
}

fn array_get_at_index(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let index = invocation.int32(1)?;
    let (element, len) = {
        let array = invocation.array(0)?;
        let element = usize::try_from(index).ok().and_then(|i| array.get(i)).cloned();
        (element, array.len())
    };
    let element = match element {
        Some(element) => element,
        None => {
            invocation.report(SoftError::IndexOutOfRange {
                index: i64::from(index),
                len,
            });
            invocation.default_for(2)?
        }
    };
    invocation.set(2, element)
}

fn array_set_at_index(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let index = invocation.int32(1)?;
    let element = invocation.value(2)?.clone();
    let len = {
        let array = invocation.array_mut(0)?;
        if let Some(slot) = usize::try_from(index).ok().and_then(|i| array.get_mut(i)) {
            *slot = element;
            return Ok(());
        }
        array.len()
    };
    invocation.report(SoftError::IndexOutOfRange {
        index: i64::from(index),
        len,
    });
    Ok(())
}

fn array_add(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let element = invocation.value(1)?.clone();
    let index = {
        let array = invocation.array_mut(0)?;
        array.push(element);
        array.len() - 1
    };
    invocation.set(2, Value::Int32(index as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeDescriptor;

    #[test]
    fn widen_propagates_one_to_one() {
        let registry = TypeRegistry::new();
        let from_value = Operation::Widen
            .propagate_argument_type("Value", TypeIndex::INT32, &registry)
            .unwrap();
        assert_eq!(from_value["Result"], TypeIndex::INT64);
        let from_result = Operation::Widen
            .propagate_argument_type("Result", TypeIndex::INT32, &registry)
            .unwrap();
        assert_eq!(from_result["Value"], TypeIndex::UINT8);
        assert!(Operation::Widen
            .propagate_argument_type("Value", TypeIndex::DOUBLE, &registry)
            .is_none());
    }

    #[test]
    fn propagation_is_deterministic() {
        let registry = TypeRegistry::new();
        for operation in Operation::ALL {
            for argument in operation.arguments() {
                for raw in 0..registry.index_bound() as u32 {
                    let index = TypeIndex::from_raw(raw);
                    let first = operation.propagate_argument_type(&argument.name, index, &registry);
                    let second = operation.propagate_argument_type(&argument.name, index, &registry);
                    assert_eq!(first, second);
                }
            }
        }
    }

    #[test]
    fn array_element_maps_back_to_array() {
        let registry = TypeRegistry::new();
        let map = Operation::ArrayGetAtIndex
            .propagate_argument_type("Element", TypeIndex::FLOAT, &registry)
            .unwrap();
        assert_eq!(map["Array"], TypeIndex::FLOAT_ARRAY);
        assert_eq!(map["Index"], TypeIndex::INT32);
    }

    #[test]
    fn int_to_enum_needs_an_enum() {
        let registry = TypeRegistry::new();
        assert!(Operation::IntToEnum
            .propagate_argument_type("Result", TypeIndex::INT32, &registry)
            .is_none());
        let axis = registry.find_or_add_type(&TypeDescriptor::enumeration("Axis", ["X", "Y"]));
        let map = Operation::IntToEnum
            .propagate_argument_type("Result", axis, &registry)
            .unwrap();
        assert!(Operation::IntToEnum.get_dispatch_function(&map, &registry).is_some());
        assert!(!Operation::IntToEnum.is_singleton());
    }
}
