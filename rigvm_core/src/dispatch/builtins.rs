use std::sync::Arc;

use tracing::info;

use crate::error::RigVmResult;
use crate::memory::Value;
use crate::registry::TypeIndex;
use crate::vm::{Invocation, SoftError};

use super::{DispatchRegistry, FunctionDescriptor, FunctionMetadata, MetadataTable, NativeFunction, Operation};

macro_rules! binary_native {
    ($name:ident, $getter:ident, $variant:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $name(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
            let $a = invocation.$getter(0)?;
            let $b = invocation.$getter(1)?;
            invocation.set(2, Value::$variant($body))
        }
    };
}

binary_native!(add_int32, int32, Int32, |a, b| a.wrapping_add(b));
binary_native!(add_int64, int64, Int64, |a, b| a.wrapping_add(b));
binary_native!(add_float, float, Float, |a, b| a + b);
binary_native!(add_double, double, Double, |a, b| a + b);
binary_native!(subtract_int32, int32, Int32, |a, b| a.wrapping_sub(b));
binary_native!(subtract_int64, int64, Int64, |a, b| a.wrapping_sub(b));
binary_native!(subtract_float, float, Float, |a, b| a - b);
binary_native!(subtract_double, double, Double, |a, b| a - b);
binary_native!(multiply_int32, int32, Int32, |a, b| a.wrapping_mul(b));
binary_native!(multiply_int64, int64, Int64, |a, b| a.wrapping_mul(b));
binary_native!(multiply_float, float, Float, |a, b| a * b);
binary_native!(multiply_double, double, Double, |a, b| a * b);
binary_native!(divide_float, float, Float, |a, b| a / b);
binary_native!(divide_double, double, Double, |a, b| a / b);
binary_native!(less_int32, int32, Bool, |a, b| a < b);
binary_native!(less_int64, int64, Bool, |a, b| a < b);
binary_native!(less_float, float, Bool, |a, b| a < b);
binary_native!(less_double, double, Bool, |a, b| a < b);
binary_native!(greater_int32, int32, Bool, |a, b| a > b);
binary_native!(greater_int64, int64, Bool, |a, b| a > b);
binary_native!(greater_float, float, Bool, |a, b| a > b);
binary_native!(greater_double, double, Bool, |a, b| a > b);
binary_native!(and_bool, bool, Bool, |a, b| a && b);
binary_native!(or_bool, bool, Bool, |a, b| a || b);

fn divide_int32(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let a = invocation.int32(0)?;
    let b = invocation.int32(1)?;
    let result = match a.checked_div(b) {
        Some(result) => result,
        None if b == 0 => {
            invocation.report(SoftError::DivisionByZero);
            0
        }
        None => a.wrapping_div(b),
    };
    invocation.set(2, Value::Int32(result))
}

fn divide_int64(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let a = invocation.int64(0)?;
    let b = invocation.int64(1)?;
    let result = match a.checked_div(b) {
        Some(result) => result,
        None if b == 0 => {
            invocation.report(SoftError::DivisionByZero);
            0
        }
        None => a.wrapping_div(b),
    };
    invocation.set(2, Value::Int64(result))
}

fn not_bool(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let value = invocation.bool(0)?;
    invocation.set(1, Value::Bool(!value))
}

fn log_value(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let instruction = invocation.instruction_index();
    let slice = invocation.slice_index();
    let value = invocation.value(0)?;
    info!(instruction, slice, %value, "log");
    Ok(())
}

const NUMERIC: [(&str, TypeIndex); 4] = [
    ("Int32", TypeIndex::INT32),
    ("Int64", TypeIndex::INT64),
    ("Float", TypeIndex::FLOAT),
    ("Double", TypeIndex::DOUBLE),
];

fn register_binary(
    dispatch: &DispatchRegistry,
    template: &str,
    natives: [NativeFunction; 4],
    boolean_result: bool,
) -> RigVmResult<()> {
    for ((suffix, type_index), native) in NUMERIC.into_iter().zip(natives) {
        let result = if boolean_result { TypeIndex::BOOL } else { type_index };
        dispatch.register_function(
            FunctionDescriptor::new(format!("{template}{suffix}"), native)
                .with_template(template)
                .input("A", type_index)
                .input("B", type_index)
                .output("Result", result),
        )?;
    }
    Ok(())
}

/// Installs the arithmetic, comparison and logic templates, `Log`, and every
/// built-in [`Operation`] factory.
pub fn register_builtins(dispatch: &DispatchRegistry) -> RigVmResult<()> {
    register_binary(dispatch, "Add", [add_int32, add_int64, add_float, add_double], false)?;
    register_binary(
        dispatch,
        "Subtract",
        [subtract_int32, subtract_int64, subtract_float, subtract_double],
        false,
    )?;
    register_binary(
        dispatch,
        "Multiply",
        [multiply_int32, multiply_int64, multiply_float, multiply_double],
        false,
    )?;
    register_binary(
        dispatch,
        "Divide",
        [divide_int32, divide_int64, divide_float, divide_double],
        false,
    )?;
    register_binary(dispatch, "Less", [less_int32, less_int64, less_float, less_double], true)?;
    register_binary(
        dispatch,
        "Greater",
        [greater_int32, greater_int64, greater_float, greater_double],
        true,
    )?;

    dispatch.register_function(
        FunctionDescriptor::new("NotBool", not_bool)
            .with_template("Not")
            .input("Value", TypeIndex::BOOL)
            .output("Result", TypeIndex::BOOL),
    )?;
    for (template, native) in [("And", and_bool as NativeFunction), ("Or", or_bool as NativeFunction)] {
        dispatch.register_function(
            FunctionDescriptor::new(format!("{template}Bool"), native)
                .with_template(template)
                .input("A", TypeIndex::BOOL)
                .input("B", TypeIndex::BOOL)
                .output("Result", TypeIndex::BOOL),
        )?;
    }
    dispatch.register_function(FunctionDescriptor::new("Log", log_value).input("Value", TypeIndex::WILDCARD))?;

    for operation in Operation::ALL {
        dispatch.register_dispatch_factory(Arc::new(operation))?;
    }
    Ok(())
}

/// Display data for everything [`register_builtins`] installs.
pub fn builtin_metadata() -> MetadataTable {
    let mut table = MetadataTable::new();
    let rows = [
        ("Add", "Math", "A + B"),
        ("Subtract", "Math", "A - B"),
        ("Multiply", "Math", "A * B"),
        ("Divide", "Math", "A / B; integer division by zero yields 0"),
        ("Less", "Compare", "A < B"),
        ("Greater", "Compare", "A > B"),
        ("Not", "Logic", "Negates a bool"),
        ("And", "Logic", "A and B"),
        ("Or", "Logic", "A or B"),
        ("Log", "Debug", "Writes the value to the log"),
        ("Widen", "Math", "Lossless numeric widening"),
        ("IntToEnum", "Convert", "Maps an int32 onto an enum variant"),
        ("ArrayNum", "Array", "Number of elements"),
        ("ArrayGetAtIndex", "Array", "Reads one element"),
        ("ArraySetAtIndex", "Array", "Writes one element"),
        ("ArrayAdd", "Array", "Appends an element and returns its index"),
    ];
    for (name, category, tooltip) in rows {
        table.insert(name, FunctionMetadata::new(name, category, tooltip));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TypeMap;
    use crate::registry::TypeRegistry;

    #[test]
    fn builtins_register_once() {
        let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).unwrap();
        assert!(dispatch.find_function("AddInt32").is_some());
        assert!(dispatch.find_function("Log").is_some());
        assert_eq!(dispatch.permutations("Add").len(), 4);
        assert!(register_builtins(&dispatch).is_err());
    }

    #[test]
    fn widen_enumerates_three_permutations() {
        let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).unwrap();
        let permutations = dispatch.permutations("Widen");
        assert_eq!(permutations.len(), 3);
        let expected = TypeMap::from([
            ("Value".to_string(), TypeIndex::FLOAT),
            ("Result".to_string(), TypeIndex::DOUBLE),
        ]);
        assert!(permutations.contains(&expected));
        let record = dispatch.resolve("Widen", &expected).unwrap();
        assert_eq!(record.name(), "Widen::Result:double,Value:float");
        assert_eq!(record.factory(), Some("Widen"));
    }

    #[test]
    fn metadata_covers_every_template() {
        let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new())).unwrap();
        let metadata = builtin_metadata();
        for template in dispatch.templates() {
            assert!(metadata.get(template.name()).is_some(), "{}", template.name());
        }
    }
}
