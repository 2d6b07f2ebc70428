use std::sync::Arc;

use rigvm_core::{
    ByteCode, DispatchRegistry, FunctionDescriptor, Invocation, Operand, Program, RigVm, RigVmResult, TypeIndex,
    TypeRegistry, Value, VmOptions,
};

fn clamp(invocation: &mut Invocation<'_>) -> RigVmResult<()> {
    let value = invocation.double(0)?;
    let low = invocation.double(1)?;
    let high = invocation.double(2)?;
    invocation.set(3, Value::Double(value.clamp(low, high)))
}

/// Builds a program without the assembler and runs it against a host native.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dispatch = DispatchRegistry::with_builtins(Arc::new(TypeRegistry::new()))?;
    dispatch.register_function(
        FunctionDescriptor::new("Clamp", clamp)
            .input("Value", TypeIndex::DOUBLE)
            .input("Low", TypeIndex::DOUBLE)
            .input("High", TypeIndex::DOUBLE)
            .output("Result", TypeIndex::DOUBLE),
    )?;

    let mut code = ByteCode::new();
    code.add_entry("update")?;
    let mut program = Program::new(ByteCode::new());
    let low = program.literals.add("low", "double", Some(Value::Double(0.0)));
    let high = program.literals.add("high", "double", Some(Value::Double(1.0)));
    let input = program.externals.add("input", "double", None);
    let output = program.work.add("output", "double", None);
    let clamp_index = program.add_function("Clamp")?;
    code.add_execute_op(
        clamp_index,
        &[
            Operand::external(input),
            Operand::literal(low),
            Operand::literal(high),
            Operand::work(output),
        ],
        &[],
    )?;
    program.byte_code = code;

    let mut vm = RigVm::new(Arc::new(program), &dispatch, VmOptions::default())?;
    for sample in [-0.5, 0.25, 3.0] {
        vm.set_external("input", Value::Double(sample))?;
        vm.execute("update")?;
        println!("clamp({sample}) = {:?}", vm.work("output"));
    }
    Ok(())
}
