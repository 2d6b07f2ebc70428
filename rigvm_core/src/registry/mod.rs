//! Process-wide type registry.
//!
//! Types get a stable [`TypeIndex`] on first registration. Every non-array
//! type is registered together with its array and array-of-array forms, and
//! the three records are published in one write critical section so a
//! concurrent reader never sees a record whose cross-links point nowhere.

mod events;
mod lock;
mod types;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::arena::{Arena, ArenaHandle};
use crate::memory::Value;

pub use events::{RegistryEvent, RegistryHook, SubscriptionId};
pub use lock::{RegistryLock, RegistryReadGuard, RegistryWriteGuard};
pub use types::{HostType, TypeCategory, TypeDescriptor, TypeIndex, TypeKind, TypeRecord};

use events::EventBus;

/// Array nesting deeper than this is rejected.
pub const MAX_ARRAY_DEPTH: usize = 2;

pub struct TypeRegistry {
    state: RegistryLock<TypeState>,
    events: EventBus,
    generation: AtomicU64,
    epoch: AtomicU64,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct TypeState {
    records: Arena<Arc<TypeRecord>>,
    by_name: HashMap<String, TypeIndex>,
    by_category: BTreeMap<TypeCategory, Vec<TypeIndex>>,
    allowed_structs: HashSet<String>,
    allowed_objects: HashSet<String>,
}

fn handle(index: TypeIndex) -> ArenaHandle<Arc<TypeRecord>> {
    ArenaHandle::new(index.index())
}

fn to_index(handle: ArenaHandle<Arc<TypeRecord>>) -> TypeIndex {
    TypeIndex::from_raw(handle.index() as u32)
}

impl TypeState {
    fn seeded() -> Self {
        let mut state = TypeState::default();
        let mut added = Vec::new();
        for descriptor in builtin_descriptors() {
            state.find_or_add_type(&descriptor, &mut added);
        }
        state
    }

    fn get(&self, index: TypeIndex) -> Option<&Arc<TypeRecord>> {
        if !index.is_valid() {
            return None;
        }
        self.records.get(handle(index))
    }

    fn is_supported(&self, descriptor: &TypeDescriptor) -> Result<(), String> {
        if descriptor.array_depth() > MAX_ARRAY_DEPTH {
            return Err(format!(
                "arrays may nest at most {MAX_ARRAY_DEPTH} levels"
            ));
        }
        let inner = descriptor.innermost();
        match inner.kind() {
            TypeKind::Map => Err("map types are not supported".to_string()),
            TypeKind::Execute if descriptor.is_array() => {
                Err("the execute context has no array form".to_string())
            }
            TypeKind::Enum { variants } if variants.is_empty() => {
                Err("enums need at least one variant".to_string())
            }
            TypeKind::Enum { variants } if variants.len() > u8::MAX as usize + 1 => {
                Err("enums are limited to 256 variants".to_string())
            }
            TypeKind::Struct if inner.host().is_none() => {
                Err("struct types need a host capability".to_string())
            }
            TypeKind::Struct if !self.allowed_structs.contains(inner.name()) => {
                Err("struct type is not on the allow-list".to_string())
            }
            TypeKind::Object if !self.allowed_objects.contains(inner.name()) => {
                Err("object type is not on the allow-list".to_string())
            }
            _ => Ok(()),
        }
    }

    fn find_or_add_type(&mut self, descriptor: &TypeDescriptor, added: &mut Vec<TypeIndex>) -> TypeIndex {
        if let Some(index) = self.by_name.get(descriptor.name()) {
            return *index;
        }
        if let Err(reason) = self.is_supported(descriptor) {
            warn!(type_name = descriptor.name(), %reason, "rejected type registration");
            return TypeIndex::INVALID;
        }
        if let Some(element) = descriptor.element() {
            // Registering the element publishes this array form as well.
            let element_index = self.find_or_add_type(element, added);
            if !element_index.is_valid() {
                return TypeIndex::INVALID;
            }
            return self
                .by_name
                .get(descriptor.name())
                .copied()
                .unwrap_or(TypeIndex::INVALID);
        }

        let base = to_index(self.records.next_handle());
        if matches!(descriptor.kind(), TypeKind::Execute) {
            self.publish(TypeRecord::new(descriptor.clone(), TypeIndex::INVALID, TypeIndex::INVALID));
            added.push(base);
            debug!(type_name = descriptor.name(), index = %base, "registered type");
            return base;
        }

        let array_descriptor = TypeDescriptor::array_of(descriptor);
        let nested_descriptor = TypeDescriptor::array_of(&array_descriptor);
        let array = TypeIndex::from_raw(base.raw() + 1);
        let nested = TypeIndex::from_raw(base.raw() + 2);
        self.publish(TypeRecord::new(descriptor.clone(), TypeIndex::INVALID, array));
        self.publish(TypeRecord::new(array_descriptor, base, nested));
        self.publish(TypeRecord::new(nested_descriptor, array, TypeIndex::INVALID));
        added.extend([base, array, nested]);
        debug!(type_name = descriptor.name(), index = %base, "registered type");
        base
    }

    fn publish(&mut self, record: TypeRecord) {
        let categories = TypeCategory::of(record.descriptor());
        let name = record.name().to_string();
        let index = to_index(self.records.allocate(Arc::new(record)));
        self.by_name.insert(name, index);
        for category in categories {
            self.by_category.entry(category).or_default().push(index);
        }
    }

    fn unpublish(&mut self, index: TypeIndex) {
        if let Some(record) = self.records.remove(handle(index)) {
            self.by_name.remove(record.name());
            for indices in self.by_category.values_mut() {
                indices.retain(|existing| *existing != index);
            }
        }
    }

    fn indices_for_path(&self, path: &str) -> Vec<TypeIndex> {
        self.records
            .iter()
            .filter(|(_, record)| record.path() == Some(path))
            .map(|(handle, _)| to_index(handle))
            .collect()
    }

    fn array_depth(&self, index: TypeIndex) -> Option<usize> {
        self.get(index).map(|record| record.descriptor().array_depth())
    }

    fn can_match_types(&self, a: TypeIndex, b: TypeIndex, allow_widening: bool) -> bool {
        let (Some(source), Some(target)) = (self.get(a), self.get(b)) else {
            return false;
        };
        if a == b {
            return true;
        }
        if source.is_execute() || target.is_execute() {
            return false;
        }
        if source.is_wildcard() || target.is_wildcard() {
            return self.array_depth(a) == self.array_depth(b);
        }
        if source.is_array() != target.is_array() {
            return false;
        }
        if source.is_array() {
            return self.can_match_types(source.base_type_index(), target.base_type_index(), allow_widening);
        }
        let (from, to) = (source.kind(), target.kind());
        match (from.numeric_rank(), to.numeric_rank()) {
            (Some(from_rank), Some(to_rank)) => {
                if from.is_integer() == to.is_integer() {
                    from_rank <= to_rank
                } else {
                    allow_widening && from.is_integer() && to.is_floating()
                }
            }
            _ => false,
        }
    }
}

fn builtin_descriptors() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::execute(),
        TypeDescriptor::wildcard(),
        TypeDescriptor::bool(),
        TypeDescriptor::int32(),
        TypeDescriptor::int64(),
        TypeDescriptor::uint8(),
        TypeDescriptor::float(),
        TypeDescriptor::double(),
        TypeDescriptor::name_type(),
        TypeDescriptor::string(),
    ]
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Creates a registry with the built-in types already registered.
    pub fn new() -> Self {
        Self {
            state: RegistryLock::new(TypeState::seeded()),
            events: EventBus::default(),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    /// Registers `descriptor` unless a type of that name exists. Returns
    /// [`TypeIndex::INVALID`] for unsupported kinds.
    pub fn find_or_add_type(&self, descriptor: &TypeDescriptor) -> TypeIndex {
        let mut added = Vec::new();
        let index = {
            let mut state = self.state.write();
            state.find_or_add_type(descriptor, &mut added)
        };
        if !added.is_empty() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.events.broadcast(&RegistryEvent::TypesAdded { indices: added });
        }
        index
    }

    pub fn get_type(&self, index: TypeIndex) -> Option<Arc<TypeRecord>> {
        self.state.read().get(index).cloned()
    }

    pub fn get_type_index_by_name(&self, name: &str) -> TypeIndex {
        self.state
            .read()
            .by_name
            .get(name)
            .copied()
            .unwrap_or(TypeIndex::INVALID)
    }

    pub fn type_name(&self, index: TypeIndex) -> String {
        self.get_type(index)
            .map(|record| record.name().to_string())
            .unwrap_or_else(|| index.to_string())
    }

    pub fn is_array_type(&self, index: TypeIndex) -> bool {
        self.state
            .read()
            .get(index)
            .map(|record| record.is_array())
            .unwrap_or(false)
    }

    pub fn get_array_type_of(&self, index: TypeIndex) -> TypeIndex {
        self.state
            .read()
            .get(index)
            .map(|record| record.array_type_index())
            .unwrap_or(TypeIndex::INVALID)
    }

    pub fn get_base_type_of(&self, index: TypeIndex) -> TypeIndex {
        self.state
            .read()
            .get(index)
            .map(|record| record.base_type_index())
            .unwrap_or(TypeIndex::INVALID)
    }

    pub fn is_execute_type(&self, index: TypeIndex) -> bool {
        self.state
            .read()
            .get(index)
            .map(|record| record.is_execute())
            .unwrap_or(false)
    }

    pub fn is_wildcard_type(&self, index: TypeIndex) -> bool {
        self.state
            .read()
            .get(index)
            .map(|record| record.is_wildcard())
            .unwrap_or(false)
    }

    /// Whether a value of type `a` may flow into a slot of type `b`.
    pub fn can_match_types(&self, a: TypeIndex, b: TypeIndex, allow_widening: bool) -> bool {
        self.state.read().can_match_types(a, b, allow_widening)
    }

    pub fn get_types_for_category(&self, category: TypeCategory) -> Vec<TypeIndex> {
        self.state
            .read()
            .by_category
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_type_in_category(&self, index: TypeIndex, category: TypeCategory) -> bool {
        self.state
            .read()
            .by_category
            .get(&category)
            .map(|indices| indices.contains(&index))
            .unwrap_or(false)
    }

    /// Allows the given struct types and registers them.
    pub fn register_struct_types(&self, descriptors: &[TypeDescriptor]) -> Vec<TypeIndex> {
        {
            let mut state = self.state.write();
            for descriptor in descriptors {
                state.allowed_structs.insert(descriptor.innermost().name().to_string());
            }
        }
        descriptors
            .iter()
            .map(|descriptor| self.find_or_add_type(descriptor))
            .collect()
    }

    /// Allows the given object classes and registers them.
    pub fn register_object_types(&self, descriptors: &[TypeDescriptor]) -> Vec<TypeIndex> {
        {
            let mut state = self.state.write();
            for descriptor in descriptors {
                state.allowed_objects.insert(descriptor.innermost().name().to_string());
            }
        }
        descriptors
            .iter()
            .map(|descriptor| self.find_or_add_type(descriptor))
            .collect()
    }

    /// Removes every type keyed under `path` together with its array forms.
    /// The indices are tombstoned and never handed out again in this epoch.
    pub fn remove_type(&self, path: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            let mut removed = Vec::new();
            for index in state.indices_for_path(path) {
                let mut current = index;
                while current.is_valid() && !removed.contains(&current) {
                    let next = state
                        .get(current)
                        .map(|record| record.array_type_index())
                        .unwrap_or(TypeIndex::INVALID);
                    removed.push(current);
                    current = next;
                }
            }
            for index in &removed {
                state.unpublish(*index);
            }
            removed
        };
        if removed.is_empty() {
            return false;
        }
        debug!(path, count = removed.len(), "removed types");
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.events.broadcast(&RegistryEvent::TypesRemoved {
            path: path.to_string(),
            indices: removed,
        });
        true
    }

    /// Re-keys every type registered under `old_path`. Indices are kept.
    pub fn rename_path(&self, old_path: &str, new_path: &str) -> bool {
        let renamed = {
            let mut state = self.state.write();
            let indices = state.indices_for_path(old_path);
            for index in &indices {
                if let Some(slot) = state.records.get_mut(handle(*index)) {
                    let descriptor = slot.descriptor().renamed_path(new_path);
                    *slot = Arc::new(slot.with_descriptor(descriptor));
                }
            }
            indices
        };
        if renamed.is_empty() {
            return false;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.events.broadcast(&RegistryEvent::PathRenamed {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
            indices: renamed,
        });
        true
    }

    /// Drops every registered type and starts a new epoch with only the
    /// built-ins. Indices handed out before the reset are meaningless after.
    pub fn reset(&self) {
        let epoch = {
            let mut state = self.state.write();
            *state = TypeState::seeded();
            self.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.events.broadcast(&RegistryEvent::Reset { epoch });
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound (exclusive) of every index issued in this epoch.
    pub fn index_bound(&self) -> usize {
        self.state.read().records.capacity_used()
    }

    pub fn lock_count(&self) -> i32 {
        self.state.lock_count()
    }

    pub fn subscribe(&self, hook: RegistryHook) -> SubscriptionId {
        self.events.subscribe(hook)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn default_value(&self, index: TypeIndex) -> Option<Value> {
        let record = self.get_type(index)?;
        let value = match record.kind() {
            TypeKind::Execute => Value::Execute,
            TypeKind::Wildcard | TypeKind::Map => return None,
            TypeKind::Bool => Value::Bool(false),
            TypeKind::Int32 => Value::Int32(0),
            TypeKind::Int64 => Value::Int64(0),
            TypeKind::UInt8 => Value::UInt8(0),
            TypeKind::Float => Value::Float(0.0),
            TypeKind::Double => Value::Double(0.0),
            TypeKind::Name => Value::Name(String::new()),
            TypeKind::String => Value::String(String::new()),
            TypeKind::Enum { .. } => Value::Enum(0),
            TypeKind::Struct => record
                .descriptor()
                .host()
                .map(|host| host.default_value())
                .unwrap_or(Value::Struct(Vec::new())),
            TypeKind::Object => Value::Object(None),
            TypeKind::Array(_) => Value::Array(Vec::new()),
        };
        Some(value)
    }

    /// Equality honouring the host capability of struct types.
    pub fn values_equal(&self, index: TypeIndex, a: &Value, b: &Value) -> bool {
        match self.get_type(index).as_deref().and_then(|r| r.descriptor().host().cloned()) {
            Some(host) => host.equals(a, b),
            None => a == b,
        }
    }

    pub fn copy_value(&self, index: TypeIndex, value: &Value) -> Value {
        match self.get_type(index).as_deref().and_then(|r| r.descriptor().host().cloned()) {
            Some(host) => host.copy(value),
            None => value.clone(),
        }
    }

    pub fn hash_value(&self, index: TypeIndex, value: &Value) -> u32 {
        match self.get_type(index).as_deref().and_then(|r| r.descriptor().host().cloned()) {
            Some(host) => host.hash_value(value),
            None => {
                let mut bytes = Vec::new();
                value.encode_canonical(&mut bytes);
                types::digest_u32(&bytes)
            }
        }
    }

    /// Approximate in-memory footprint of one value of the type.
    pub fn size_of(&self, index: TypeIndex) -> usize {
        let Some(record) = self.get_type(index) else {
            return 0;
        };
        match record.kind() {
            TypeKind::Execute | TypeKind::Wildcard | TypeKind::Map => 0,
            TypeKind::Bool | TypeKind::UInt8 | TypeKind::Enum { .. } => 1,
            TypeKind::Int32 | TypeKind::Float => 4,
            TypeKind::Int64 | TypeKind::Double | TypeKind::Object => 8,
            TypeKind::Name | TypeKind::String | TypeKind::Array(_) => 24,
            TypeKind::Struct => record
                .descriptor()
                .host()
                .map(|host| host.size())
                .unwrap_or(0),
        }
    }

    pub fn enum_variants(&self, index: TypeIndex) -> Option<Vec<String>> {
        match self.get_type(index)?.kind() {
            TypeKind::Enum { variants } => Some(variants.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug)]
    struct Transform;

    impl HostType for Transform {
        fn size(&self) -> usize {
            48
        }

        fn alignment(&self) -> usize {
            16
        }

        fn default_value(&self) -> Value {
            Value::Struct(vec![Value::Float(0.0), Value::Float(0.0), Value::Float(1.0)])
        }
    }

    #[test]
    fn builtin_indices_are_constants() {
        let registry = TypeRegistry::new();
        let expect = [
            (TypeIndex::EXECUTE, "execute"),
            (TypeIndex::WILDCARD, "wildcard"),
            (TypeIndex::WILDCARD_ARRAY, "array<wildcard>"),
            (TypeIndex::BOOL, "bool"),
            (TypeIndex::BOOL_ARRAY, "array<bool>"),
            (TypeIndex::INT32, "int32"),
            (TypeIndex::INT32_ARRAY, "array<int32>"),
            (TypeIndex::INT64, "int64"),
            (TypeIndex::INT64_ARRAY, "array<int64>"),
            (TypeIndex::UINT8, "uint8"),
            (TypeIndex::UINT8_ARRAY, "array<uint8>"),
            (TypeIndex::FLOAT, "float"),
            (TypeIndex::FLOAT_ARRAY, "array<float>"),
            (TypeIndex::DOUBLE, "double"),
            (TypeIndex::DOUBLE_ARRAY, "array<double>"),
            (TypeIndex::NAME, "name"),
            (TypeIndex::NAME_ARRAY, "array<name>"),
            (TypeIndex::STRING, "string"),
            (TypeIndex::STRING_ARRAY, "array<string>"),
        ];
        for (index, name) in expect {
            assert_eq!(registry.type_name(index), name);
            assert_eq!(registry.get_type_index_by_name(name), index);
        }
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = TypeRegistry::new();
        let axis = TypeDescriptor::enumeration("Axis", ["X", "Y", "Z"]);
        let first = registry.find_or_add_type(&axis);
        let generation = registry.generation();
        let second = registry.find_or_add_type(&axis);
        assert_eq!(first, second);
        assert_eq!(registry.generation(), generation);
    }

    #[test]
    fn array_links_are_consistent() {
        let registry = TypeRegistry::new();
        let float_array = registry.get_array_type_of(TypeIndex::FLOAT);
        assert_eq!(float_array, TypeIndex::FLOAT_ARRAY);
        assert_eq!(registry.get_base_type_of(float_array), TypeIndex::FLOAT);
        let nested = registry.get_array_type_of(float_array);
        assert!(registry.is_array_type(nested));
        assert_eq!(registry.get_base_type_of(nested), float_array);
        assert!(!registry.get_array_type_of(nested).is_valid());
    }

    #[test]
    fn registering_an_array_registers_its_element() {
        let registry = TypeRegistry::new();
        let axis = TypeDescriptor::enumeration("Axis", ["X"]);
        let array = registry.find_or_add_type(&TypeDescriptor::array_of(&axis));
        assert!(array.is_valid());
        let base = registry.get_base_type_of(array);
        assert_eq!(registry.type_name(base), "Axis");
    }

    #[test]
    fn unsupported_kinds_are_rejected() {
        let registry = TypeRegistry::new();
        let map = TypeDescriptor::map(&TypeDescriptor::name_type(), &TypeDescriptor::float());
        assert_eq!(registry.find_or_add_type(&map), TypeIndex::INVALID);
        let deep = TypeDescriptor::array_of(&TypeDescriptor::array_of(&TypeDescriptor::array_of(
            &TypeDescriptor::float(),
        )));
        assert_eq!(registry.find_or_add_type(&deep), TypeIndex::INVALID);
        let empty = TypeDescriptor::enumeration("Nothing", Vec::<String>::new());
        assert_eq!(registry.find_or_add_type(&empty), TypeIndex::INVALID);
        assert_eq!(
            registry.find_or_add_type(&TypeDescriptor::object("Actor")),
            TypeIndex::INVALID
        );
    }

    #[test]
    fn allow_lists_gate_structs_and_objects() {
        let registry = TypeRegistry::new();
        let transform = TypeDescriptor::structure("Transform", Arc::new(Transform));
        assert_eq!(registry.find_or_add_type(&transform), TypeIndex::INVALID);
        let indices = registry.register_struct_types(&[transform]);
        assert!(indices[0].is_valid());
        assert_eq!(
            registry.default_value(indices[0]),
            Some(Value::Struct(vec![Value::Float(0.0), Value::Float(0.0), Value::Float(1.0)]))
        );
        assert_eq!(registry.size_of(indices[0]), 48);
        let actor = registry.register_object_types(&[TypeDescriptor::object("Actor")]);
        assert!(registry.is_type_in_category(actor[0], TypeCategory::SingleObjectValue));
    }

    #[test]
    fn compatibility_rules() {
        let registry = TypeRegistry::new();
        assert!(registry.can_match_types(TypeIndex::UINT8, TypeIndex::INT64, false));
        assert!(registry.can_match_types(TypeIndex::FLOAT, TypeIndex::DOUBLE, false));
        assert!(!registry.can_match_types(TypeIndex::DOUBLE, TypeIndex::FLOAT, true));
        assert!(!registry.can_match_types(TypeIndex::INT32, TypeIndex::FLOAT, false));
        assert!(registry.can_match_types(TypeIndex::INT32, TypeIndex::FLOAT, true));
        assert!(!registry.can_match_types(TypeIndex::FLOAT, TypeIndex::INT32, true));
        assert!(registry.can_match_types(TypeIndex::WILDCARD, TypeIndex::STRING, false));
        assert!(!registry.can_match_types(TypeIndex::WILDCARD, TypeIndex::STRING_ARRAY, false));
        assert!(registry.can_match_types(TypeIndex::WILDCARD_ARRAY, TypeIndex::FLOAT_ARRAY, false));
        assert!(registry.can_match_types(TypeIndex::INT32_ARRAY, TypeIndex::INT64_ARRAY, false));
        assert!(!registry.can_match_types(TypeIndex::EXECUTE, TypeIndex::WILDCARD, true));
        assert!(!registry.can_match_types(TypeIndex::BOOL, TypeIndex::INT32, true));
    }

    #[test]
    fn removal_tombstones_indices_and_notifies() {
        let registry = TypeRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = registry.subscribe(Arc::new(move |event: &RegistryEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        let gait = TypeDescriptor::enumeration("Gait", ["Walk", "Run"]).with_path("/Game/Gait");
        let index = registry.find_or_add_type(&gait);
        let array = registry.get_array_type_of(index);
        assert!(registry.remove_type("/Game/Gait"));
        assert!(registry.get_type(index).is_none());
        assert!(registry.get_type(array).is_none());
        assert!(!registry.get_type_index_by_name("Gait").is_valid());
        assert!(!registry
            .get_types_for_category(TypeCategory::SingleEnumValue)
            .contains(&index));

        let again = registry.find_or_add_type(&gait);
        assert_ne!(again, index);
        assert!(again.raw() > array.raw());

        assert!(registry.unsubscribe(id));
        let events = seen.lock().unwrap();
        assert!(matches!(events[0], RegistryEvent::TypesAdded { .. }));
        assert!(matches!(&events[1], RegistryEvent::TypesRemoved { indices, .. } if indices.len() == 3));
    }

    #[test]
    fn rename_keeps_indices() {
        let registry = TypeRegistry::new();
        let gait = TypeDescriptor::enumeration("Gait", ["Walk"]).with_path("/Old");
        let index = registry.find_or_add_type(&gait);
        assert!(registry.rename_path("/Old", "/New"));
        assert_eq!(registry.get_type(index).unwrap().path(), Some("/New"));
        assert!(!registry.remove_type("/Old"));
        assert!(registry.remove_type("/New"));
    }

    #[test]
    fn reset_starts_new_epoch() {
        let registry = TypeRegistry::new();
        let before = registry.len();
        registry.find_or_add_type(&TypeDescriptor::enumeration("Axis", ["X"]));
        assert_eq!(registry.len(), before + 3);
        registry.reset();
        assert_eq!(registry.epoch(), 1);
        assert_eq!(registry.len(), before);
        assert!(!registry.get_type_index_by_name("Axis").is_valid());
    }

    #[test]
    fn hook_may_call_back_into_registry() {
        let registry = Arc::new(TypeRegistry::new());
        let weak = Arc::downgrade(&registry);
        let observed = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&observed);
        registry.subscribe(Arc::new(move |_event: &RegistryEvent| {
            if let Some(registry) = weak.upgrade() {
                *sink.lock().unwrap() = registry.len();
            }
        }));
        registry.find_or_add_type(&TypeDescriptor::enumeration("Axis", ["X"]));
        assert_eq!(*observed.lock().unwrap(), registry.len());
    }
}
