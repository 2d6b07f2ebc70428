//! Function, template and dispatch registry.
//!
//! Plain functions are registered once and may join a template as one
//! permutation. Dispatch factories own a template whose permutations are
//! enumerated from the type registry and recomputed whenever it changes.
//! Resolution turns a template plus a type map into a concrete
//! [`FunctionRecord`] and happens before execution, never inside the loop.

mod builtins;
mod factory;
mod function;
mod metadata;
mod operation;
mod template;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::arena::{Arena, ArenaHandle};
use crate::error::{RigVmError, RigVmResult};
use crate::registry::{RegistryEvent, RegistryLock, SubscriptionId, TypeIndex, TypeRegistry};

pub use builtins::{builtin_metadata, register_builtins};
pub use factory::{ArgumentTypes, DispatchArgument, DispatchFactory};
pub use function::{
    ArgumentDirection, FunctionArgument, FunctionDescriptor, FunctionId, FunctionRecord, NativeFunction,
};
pub use metadata::{FunctionMetadata, MetadataTable};
pub use operation::{BoundOperation, Operation};
pub use template::{Permutation, Template, TemplateArgument, TemplateId};

/// Argument name → type assignment.
pub type TypeMap = BTreeMap<String, TypeIndex>;

/// Renders a type map as `Arg:type,Arg:type`.
pub fn describe_type_map(types: &TypeMap, registry: &TypeRegistry) -> String {
    types
        .iter()
        .map(|(argument, index)| format!("{argument}:{}", registry.type_name(*index)))
        .collect::<Vec<_>>()
        .join(",")
}

struct FactoryEntry {
    factory: Arc<dyn DispatchFactory>,
    template: TemplateId,
    instances: HashMap<TypeMap, Arc<dyn DispatchFactory>>,
}

#[derive(Default)]
struct DispatchState {
    functions: Arena<Arc<FunctionRecord>>,
    function_names: HashMap<String, FunctionId>,
    templates: Vec<Template>,
    template_names: HashMap<String, TemplateId>,
    factories: Vec<FactoryEntry>,
}

impl DispatchState {
    fn function(&self, id: FunctionId) -> Option<&Arc<FunctionRecord>> {
        self.functions.get(ArenaHandle::new(id.index()))
    }

    fn template_mut(&mut self, name: &str) -> Option<&mut Template> {
        let id = *self.template_names.get(name)?;
        self.templates.get_mut(id.index())
    }

    fn add_template(&mut self, template: Template) -> TemplateId {
        let id = TemplateId::new(self.templates.len());
        self.template_names.insert(template.name.clone(), id);
        self.templates.push(template);
        id
    }

    fn publish(&mut self, mut record: FunctionRecord) -> Arc<FunctionRecord> {
        let id = FunctionId::new(self.functions.next_handle().index());
        record.id = id;
        let record = Arc::new(record);
        self.functions.allocate(Arc::clone(&record));
        self.function_names.insert(record.name.clone(), id);
        record
    }

    /// Whether any template was computed against an older type registry.
    fn is_stale(&self, generation: u64) -> bool {
        self.templates.iter().any(|template| template.types_generation != generation)
    }

    fn recompute(&mut self, registry: &TypeRegistry) {
        let generation = registry.generation();
        for index in 0..self.templates.len() {
            let permutations = match self.templates[index].factory {
                Some(factory) => {
                    let factory = Arc::clone(&self.factories[factory].factory);
                    let previous = &self.templates[index].permutations;
                    enumerate_permutations(factory.as_ref(), registry)
                        .into_iter()
                        .map(|types| {
                            let function = previous
                                .iter()
                                .find(|existing| existing.types == types)
                                .and_then(|existing| existing.function);
                            Permutation { types, function }
                        })
                        .collect()
                }
                None => self.templates[index]
                    .registered
                    .iter()
                    .filter(|permutation| {
                        permutation
                            .types
                            .values()
                            .all(|type_index| registry.get_type(*type_index).is_some())
                    })
                    .cloned()
                    .collect(),
            };
            let template = &mut self.templates[index];
            template.permutations = permutations;
            template.types_generation = generation;
        }
    }
}

/// Every complete, accepted type map the factory produces from the
/// candidate types of its primary argument.
fn enumerate_permutations(factory: &dyn DispatchFactory, registry: &TypeRegistry) -> Vec<TypeMap> {
    let arguments = factory.arguments();
    let Some(primary) = factory.primary_argument() else {
        return Vec::new();
    };
    let Some(primary_argument) = arguments.iter().find(|argument| argument.name == primary) else {
        return Vec::new();
    };
    let mut candidates: Vec<TypeIndex> = match &primary_argument.types {
        ArgumentTypes::Fixed(index) => vec![*index],
        ArgumentTypes::Categories(categories) => categories
            .iter()
            .flat_map(|category| registry.get_types_for_category(*category))
            .collect(),
    };
    candidates.sort();
    candidates.dedup();

    let mut permutations = Vec::new();
    for candidate in candidates {
        let Some(types) = factory.propagate_argument_type(&primary, candidate, registry) else {
            continue;
        };
        let complete = arguments.iter().all(|argument| {
            types
                .get(&argument.name)
                .map(|index| argument.accepts(registry, *index))
                .unwrap_or(false)
        });
        if complete && !permutations.contains(&types) {
            permutations.push(types);
        }
    }
    permutations
}

pub struct DispatchRegistry {
    types: Arc<TypeRegistry>,
    state: RegistryLock<DispatchState>,
    dirty: AtomicBool,
    subscription: SubscriptionId,
}

impl DispatchRegistry {
    /// Creates an empty registry bound to `types`; templates follow every
    /// change the type registry announces.
    pub fn new(types: Arc<TypeRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<DispatchRegistry>| {
            let weak = weak.clone();
            let subscription = types.subscribe(Arc::new(move |event: &RegistryEvent| {
                if let Some(dispatch) = weak.upgrade() {
                    dispatch.on_registry_event(event);
                }
            }));
            Self {
                types,
                state: RegistryLock::new(DispatchState::default()),
                dirty: AtomicBool::new(false),
                subscription,
            }
        })
    }

    /// Registry with the built-in functions and operations installed.
    pub fn with_builtins(types: Arc<TypeRegistry>) -> RigVmResult<Arc<Self>> {
        let registry = Self::new(types);
        register_builtins(&registry)?;
        Ok(registry)
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    fn on_registry_event(&self, event: &RegistryEvent) {
        debug!(?event, "recomputing templates");
        if self.state.is_write_locked_by_current_thread() {
            self.dirty.store(true, Ordering::Release);
            return;
        }
        self.state.write().recompute(&self.types);
    }

    /// Recomputes templates when an event was deferred or when any template
    /// lags the registry generation.
    fn refresh(&self) {
        let dirty = self.dirty.swap(false, Ordering::AcqRel);
        let stale = dirty || self.state.read().is_stale(self.types.generation());
        if stale {
            self.state.write().recompute(&self.types);
        }
    }

    pub fn register_function(&self, descriptor: FunctionDescriptor) -> RigVmResult<FunctionId> {
        let generation = self.types.generation();
        for argument in &descriptor.arguments {
            if self.types.get_type(argument.type_index).is_none() {
                return Err(RigVmError::UnknownType(argument.type_index.to_string()));
            }
        }
        let mut state = self.state.write();
        if state.function_names.contains_key(&descriptor.name) {
            return Err(RigVmError::DuplicateFunction(descriptor.name));
        }
        if let Some(template_name) = &descriptor.template {
            let template_arguments: Vec<TemplateArgument> = descriptor
                .arguments
                .iter()
                .map(|argument| TemplateArgument {
                    name: argument.name.clone(),
                    direction: argument.direction,
                })
                .collect();
            match state.template_mut(template_name) {
                Some(template) => {
                    if template.factory.is_some() || template.arguments != template_arguments {
                        return Err(RigVmError::TemplateMismatch {
                            template: template_name.clone(),
                            function: descriptor.name,
                        });
                    }
                }
                None => {
                    state.add_template(Template {
                        name: template_name.clone(),
                        arguments: template_arguments,
                        permutations: Vec::new(),
                        registered: Vec::new(),
                        factory: None,
                        types_generation: generation,
                    });
                }
            }
        }

        let record = state.publish(FunctionRecord {
            id: FunctionId::new(0),
            name: descriptor.name,
            struct_name: descriptor.struct_name,
            template: descriptor.template,
            factory: None,
            arguments: descriptor.arguments,
            function: descriptor.function,
        });
        if let Some(template_name) = record.template.clone() {
            let types: TypeMap = record
                .arguments
                .iter()
                .map(|argument| (argument.name.clone(), argument.type_index))
                .collect();
            if let Some(template) = state.template_mut(&template_name) {
                if template.registered.iter().any(|existing| existing.types == types) {
                    warn!(template = %template_name, function = %record.name, "permutation registered twice");
                }
                let permutation = Permutation {
                    types,
                    function: Some(record.id),
                };
                template.registered.push(permutation.clone());
                template.permutations.push(permutation);
            }
        }
        debug!(function = %record.name, id = %record.id, "registered function");
        Ok(record.id)
    }

    pub fn register_dispatch_factory(&self, factory: Arc<dyn DispatchFactory>) -> RigVmResult<TemplateId> {
        let name = factory.factory_name().to_string();
        let arguments = factory
            .arguments()
            .into_iter()
            .map(|argument| TemplateArgument {
                name: argument.name,
                direction: argument.direction,
            })
            .collect();
        // Stamped before enumerating so a type added meanwhile marks the
        // template stale.
        let generation = self.types.generation();
        let permutations = enumerate_permutations(factory.as_ref(), &self.types)
            .into_iter()
            .map(|types| Permutation {
                types,
                function: None,
            })
            .collect();
        let mut state = self.state.write();
        if state.template_names.contains_key(&name) {
            return Err(RigVmError::DuplicateTemplate(name));
        }
        let factory_index = state.factories.len();
        let template = state.add_template(Template {
            name: name.clone(),
            arguments,
            permutations,
            registered: Vec::new(),
            factory: Some(factory_index),
            types_generation: generation,
        });
        state.factories.push(FactoryEntry {
            factory,
            template,
            instances: HashMap::new(),
        });
        debug!(factory = %name, "registered dispatch factory");
        Ok(template)
    }

    /// Resolves `template` for `types` to a concrete function record,
    /// publishing it on first use.
    pub fn resolve(&self, template_name: &str, types: &TypeMap) -> RigVmResult<Arc<FunctionRecord>> {
        self.refresh();
        let mut state = self.state.write();
        let template_id = *state
            .template_names
            .get(template_name)
            .ok_or_else(|| RigVmError::UnknownTemplate(template_name.to_string()))?;
        let unsupported = || RigVmError::UnsupportedPermutation {
            template: template_name.to_string(),
            permutation: describe_type_map(types, &self.types),
        };
        let template = &state.templates[template_id.index()];
        let permutation = template.find_permutation(types).ok_or_else(unsupported)?;
        if let Some(function) = permutation.function {
            if let Some(record) = state.function(function) {
                return Ok(Arc::clone(record));
            }
        }
        let factory_index = template.factory.ok_or_else(unsupported)?;

        let entry = &mut state.factories[factory_index];
        let instance = if entry.factory.is_singleton() {
            Arc::clone(&entry.factory)
        } else {
            let base = Arc::clone(&entry.factory);
            Arc::clone(
                entry
                    .instances
                    .entry(types.clone())
                    .or_insert_with(|| base.instantiate(types).unwrap_or(base)),
            )
        };
        let function = instance
            .get_dispatch_function(types, &self.types)
            .ok_or_else(unsupported)?;
        let arguments = instance
            .arguments()
            .into_iter()
            .map(|argument| {
                let type_index = types.get(&argument.name).copied().unwrap_or(TypeIndex::INVALID);
                FunctionArgument {
                    name: argument.name,
                    type_index,
                    direction: argument.direction,
                }
            })
            .collect();
        let name = format!("{template_name}::{}", describe_type_map(types, &self.types));
        let record = match state.function_names.get(&name).copied() {
            Some(existing) => state.function(existing).cloned().ok_or_else(unsupported)?,
            None => state.publish(FunctionRecord {
                id: FunctionId::new(0),
                name,
                struct_name: None,
                template: Some(template_name.to_string()),
                factory: Some(template_name.to_string()),
                arguments,
                function,
            }),
        };
        if let Some(permutation) = state.templates[template_id.index()]
            .permutations
            .iter_mut()
            .find(|permutation| &permutation.types == types)
        {
            permutation.function = Some(record.id);
        }
        debug!(function = %record.name, "resolved dispatch");
        Ok(record)
    }

    /// Looks a function up by name. Names of dispatch permutations
    /// (`Template::Arg:type,...`) that are not yet published in this registry
    /// are resolved again from their type names.
    pub fn find_or_resolve_function(&self, name: &str) -> RigVmResult<Arc<FunctionRecord>> {
        if let Some(record) = self.find_function(name) {
            return Ok(record);
        }
        let (template, permutation) = name
            .split_once("::")
            .ok_or_else(|| RigVmError::UnknownFunction(name.to_string()))?;
        let mut types = TypeMap::new();
        for pair in permutation.split(',') {
            let (argument, type_name) = pair
                .split_once(':')
                .ok_or_else(|| RigVmError::UnknownFunction(name.to_string()))?;
            let index = self.types.get_type_index_by_name(type_name);
            if !index.is_valid() {
                return Err(RigVmError::UnknownType(type_name.to_string()));
            }
            types.insert(argument.to_string(), index);
        }
        self.resolve(template, &types)
    }

    /// Completes a type map for `template` from one argument's type.
    pub fn propagate_argument_type(
        &self,
        template_name: &str,
        argument: &str,
        type_index: TypeIndex,
    ) -> RigVmResult<TypeMap> {
        self.refresh();
        let state = self.state.read();
        let template_id = state
            .template_names
            .get(template_name)
            .ok_or_else(|| RigVmError::UnknownTemplate(template_name.to_string()))?;
        let template = &state.templates[template_id.index()];
        if !template.arguments.iter().any(|existing| existing.name == argument) {
            return Err(RigVmError::UnknownArgument {
                template: template_name.to_string(),
                argument: argument.to_string(),
            });
        }
        let unsupported = || RigVmError::UnsupportedPermutation {
            template: template_name.to_string(),
            permutation: format!("{argument}:{}", self.types.type_name(type_index)),
        };
        match template.factory {
            Some(factory) => state.factories[factory]
                .factory
                .propagate_argument_type(argument, type_index, &self.types)
                .ok_or_else(unsupported),
            None => template
                .permutations
                .iter()
                .find(|permutation| permutation.types.get(argument) == Some(&type_index))
                .map(|permutation| permutation.types.clone())
                .ok_or_else(unsupported),
        }
    }

    /// Name a native sees for operand `index` of an Execute carrying
    /// `total` operands.
    pub fn get_argument_name_for_operand_index(
        &self,
        function: &FunctionRecord,
        index: usize,
        total: usize,
    ) -> Option<String> {
        if let Some(factory_name) = function.factory() {
            let state = self.state.read();
            let template = state.template_names.get(factory_name)?;
            let factory = state.templates[template.index()].factory?;
            return state.factories[factory]
                .factory
                .argument_name_for_operand_index(index, total);
        }
        function.arguments.get(index).map(|argument| argument.name.clone())
    }

    pub fn find_function(&self, name: &str) -> Option<Arc<FunctionRecord>> {
        let state = self.state.read();
        let id = state.function_names.get(name)?;
        state.function(*id).cloned()
    }

    pub fn function(&self, id: FunctionId) -> Option<Arc<FunctionRecord>> {
        self.state.read().function(id).cloned()
    }

    pub fn functions(&self) -> Vec<Arc<FunctionRecord>> {
        self.state
            .read()
            .functions
            .iter()
            .map(|(_, record)| Arc::clone(record))
            .collect()
    }

    pub fn function_count(&self) -> usize {
        self.state.read().functions.len()
    }

    pub fn find_template(&self, name: &str) -> Option<TemplateId> {
        self.state.read().template_names.get(name).copied()
    }

    /// Snapshot of a template.
    pub fn template(&self, name: &str) -> Option<Template> {
        self.refresh();
        let state = self.state.read();
        let id = state.template_names.get(name)?;
        state.templates.get(id.index()).cloned()
    }

    pub fn templates(&self) -> Vec<Template> {
        self.refresh();
        self.state.read().templates.clone()
    }

    pub fn permutations(&self, name: &str) -> Vec<TypeMap> {
        self.template(name)
            .map(|template| {
                template
                    .permutations
                    .into_iter()
                    .map(|permutation| permutation.types)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether every argument type of `function` is still registered.
    pub fn is_function_valid(&self, function: &FunctionRecord) -> bool {
        function
            .arguments
            .iter()
            .all(|argument| self.types.get_type(argument.type_index).is_some())
    }

    /// Permutation instances created for a non-singleton factory.
    pub fn factory_instance_count(&self, name: &str) -> usize {
        let state = self.state.read();
        state
            .factories
            .iter()
            .find(|entry| state.templates[entry.template.index()].name == name)
            .map(|entry| entry.instances.len())
            .unwrap_or(0)
    }
}

impl Drop for DispatchRegistry {
    fn drop(&mut self) {
        self.types.unsubscribe(self.subscription);
    }
}
