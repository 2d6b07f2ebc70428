//! Registry setup and program loading shared by the subcommands.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use rigvm_core::asm::parse_value;
use rigvm_core::vm::PACKAGE_MAGIC;
use rigvm_core::{assemble, DispatchRegistry, Program, RigVm, TypeDescriptor, TypeRegistry};
use tracing::debug;

use crate::config::Config;

/// Fresh type and dispatch registries with the built-ins and every enum the
/// config declares.
pub fn build_dispatch(config: &Config) -> Result<Arc<DispatchRegistry>> {
    let types = Arc::new(TypeRegistry::new());
    for declared in &config.enums {
        let path = declared
            .path
            .clone()
            .unwrap_or_else(|| format!("/{}", declared.name));
        let index = types.find_or_add_type(
            &TypeDescriptor::enumeration(declared.name.clone(), declared.variants.iter().cloned()).with_path(path),
        );
        if !index.is_valid() {
            bail!("enum '{}' could not be registered", declared.name);
        }
        debug!(name = %declared.name, %index, "registered configured enum");
    }
    DispatchRegistry::with_builtins(types).map_err(|err| anyhow!("installing built-ins: {err}"))
}

/// Reads a package (`RVPK` magic) or assembles a source file.
pub fn load_program(path: &Path, dispatch: &DispatchRegistry) -> Result<Program> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.starts_with(PACKAGE_MAGIC) {
        return Program::load(&bytes).with_context(|| format!("failed to load package {}", path.display()));
    }
    let source = String::from_utf8(bytes).with_context(|| format!("{} is neither a package nor text", path.display()))?;
    assemble(&source, dispatch).with_context(|| format!("failed to assemble {}", path.display()))
}

/// Applies `name=value` overrides to external registers, parsing each value
/// against the register's declared type.
pub fn apply_externals(vm: &mut RigVm, dispatch: &DispatchRegistry, assignments: &[String]) -> Result<()> {
    for assignment in assignments {
        let (name, text) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{assignment}'"))?;
        let register = vm
            .program()
            .externals
            .find(name)
            .and_then(|index| vm.program().externals.get(index))
            .ok_or_else(|| anyhow!("no external register named '{name}'"))?;
        let type_index = dispatch.types().get_type_index_by_name(&register.type_name);
        let value = parse_value(text, type_index, dispatch.types())
            .map_err(|message| anyhow!("value for '{name}': {message}"))?;
        vm.set_external(name, value)?;
    }
    Ok(())
}
