use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::memory::Value;

/// Stable integer identity of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeIndex(u32);

impl TypeIndex {
    pub const INVALID: TypeIndex = TypeIndex(u32::MAX);

    // Built-ins are seeded in a fixed order: base type, array, array-of-array.
    // The execute context has no array forms.
    pub const EXECUTE: TypeIndex = TypeIndex(0);
    pub const WILDCARD: TypeIndex = TypeIndex(1);
    pub const WILDCARD_ARRAY: TypeIndex = TypeIndex(2);
    pub const BOOL: TypeIndex = TypeIndex(4);
    pub const BOOL_ARRAY: TypeIndex = TypeIndex(5);
    pub const INT32: TypeIndex = TypeIndex(7);
    pub const INT32_ARRAY: TypeIndex = TypeIndex(8);
    pub const INT64: TypeIndex = TypeIndex(10);
    pub const INT64_ARRAY: TypeIndex = TypeIndex(11);
    pub const UINT8: TypeIndex = TypeIndex(13);
    pub const UINT8_ARRAY: TypeIndex = TypeIndex(14);
    pub const FLOAT: TypeIndex = TypeIndex(16);
    pub const FLOAT_ARRAY: TypeIndex = TypeIndex(17);
    pub const DOUBLE: TypeIndex = TypeIndex(19);
    pub const DOUBLE_ARRAY: TypeIndex = TypeIndex(20);
    pub const NAME: TypeIndex = TypeIndex(22);
    pub const NAME_ARRAY: TypeIndex = TypeIndex(23);
    pub const STRING: TypeIndex = TypeIndex(25);
    pub const STRING_ARRAY: TypeIndex = TypeIndex(26);

    pub const fn from_raw(raw: u32) -> Self {
        TypeIndex(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_valid(self) -> bool {
        self != TypeIndex::INVALID
    }
}

impl Default for TypeIndex {
    fn default() -> Self {
        TypeIndex::INVALID
    }
}

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#invalid")
        }
    }
}

/// Capabilities the host reflection system provides for struct types the VM
/// cannot introspect on its own.
pub trait HostType: fmt::Debug + Send + Sync {
    fn size(&self) -> usize;

    fn alignment(&self) -> usize;

    fn default_value(&self) -> Value;

    fn equals(&self, a: &Value, b: &Value) -> bool {
        a == b
    }

    fn hash_value(&self, value: &Value) -> u32 {
        let mut bytes = Vec::new();
        value.encode_canonical(&mut bytes);
        digest_u32(&bytes)
    }

    fn copy(&self, source: &Value) -> Value {
        source.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Execute,
    Wildcard,
    Bool,
    Int32,
    Int64,
    UInt8,
    Float,
    Double,
    Name,
    String,
    Enum { variants: Vec<String> },
    Struct,
    Object,
    Map,
    Array(Box<TypeDescriptor>),
}

impl TypeKind {
    pub fn is_integer(&self) -> bool {
        matches!(self, TypeKind::Int32 | TypeKind::Int64 | TypeKind::UInt8)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, TypeKind::Float | TypeKind::Double)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_floating()
    }

    pub fn is_simple(&self) -> bool {
        self.is_numeric()
            || matches!(self, TypeKind::Bool | TypeKind::Name | TypeKind::String)
    }

    /// Position on the lossless widening ladder of the kind's numeric family.
    pub(crate) fn numeric_rank(&self) -> Option<u8> {
        match self {
            TypeKind::UInt8 | TypeKind::Float => Some(0),
            TypeKind::Int32 | TypeKind::Double => Some(1),
            TypeKind::Int64 => Some(2),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            TypeKind::Execute => 0,
            TypeKind::Wildcard => 1,
            TypeKind::Bool => 2,
            TypeKind::Int32 => 3,
            TypeKind::Int64 => 4,
            TypeKind::UInt8 => 5,
            TypeKind::Float => 6,
            TypeKind::Double => 7,
            TypeKind::Name => 8,
            TypeKind::String => 9,
            TypeKind::Enum { .. } => 10,
            TypeKind::Struct => 11,
            TypeKind::Object => 12,
            TypeKind::Map => 13,
            TypeKind::Array(_) => 14,
        }
    }
}

/// Everything the registry needs to know to register a type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
    path: Option<String>,
    host: Option<Arc<dyn HostType>>,
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind && self.path == other.path
    }
}

impl TypeDescriptor {
    fn primitive(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            path: None,
            host: None,
        }
    }

    pub fn execute() -> Self {
        Self::primitive("execute", TypeKind::Execute)
    }

    pub fn wildcard() -> Self {
        Self::primitive("wildcard", TypeKind::Wildcard)
    }

    pub fn bool() -> Self {
        Self::primitive("bool", TypeKind::Bool)
    }

    pub fn int32() -> Self {
        Self::primitive("int32", TypeKind::Int32)
    }

    pub fn int64() -> Self {
        Self::primitive("int64", TypeKind::Int64)
    }

    pub fn uint8() -> Self {
        Self::primitive("uint8", TypeKind::UInt8)
    }

    pub fn float() -> Self {
        Self::primitive("float", TypeKind::Float)
    }

    pub fn double() -> Self {
        Self::primitive("double", TypeKind::Double)
    }

    pub fn name_type() -> Self {
        Self::primitive("name", TypeKind::Name)
    }

    pub fn string() -> Self {
        Self::primitive("string", TypeKind::String)
    }

    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: TypeKind::Enum {
                variants: variants.into_iter().map(Into::into).collect(),
            },
            path: None,
            host: None,
        }
    }

    pub fn structure(name: impl Into<String>, host: Arc<dyn HostType>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Struct,
            path: None,
            host: Some(host),
        }
    }

    pub fn object(class_name: impl Into<String>) -> Self {
        Self {
            name: class_name.into(),
            kind: TypeKind::Object,
            path: None,
            host: None,
        }
    }

    pub fn map(key: &TypeDescriptor, value: &TypeDescriptor) -> Self {
        Self {
            name: format!("map<{},{}>", key.name, value.name),
            kind: TypeKind::Map,
            path: None,
            host: None,
        }
    }

    pub fn array_of(element: &TypeDescriptor) -> Self {
        Self {
            name: format!("array<{}>", element.name),
            kind: TypeKind::Array(Box::new(element.clone())),
            path: element.path.clone(),
            host: None,
        }
    }

    /// Keys the type under an external path so it can later be removed or
    /// renamed as a group.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn host(&self) -> Option<&Arc<dyn HostType>> {
        self.host.as_ref()
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array(_))
    }

    pub fn element(&self) -> Option<&TypeDescriptor> {
        match &self.kind {
            TypeKind::Array(element) => Some(element),
            _ => None,
        }
    }

    pub fn array_depth(&self) -> usize {
        match &self.kind {
            TypeKind::Array(element) => 1 + element.array_depth(),
            _ => 0,
        }
    }

    /// The innermost non-array descriptor.
    pub fn innermost(&self) -> &TypeDescriptor {
        match &self.kind {
            TypeKind::Array(element) => element.innermost(),
            _ => self,
        }
    }

    pub(crate) fn renamed_path(&self, path: &str) -> Self {
        let mut copy = self.clone();
        copy.path = Some(path.to_string());
        if let TypeKind::Array(element) = &copy.kind {
            copy.kind = TypeKind::Array(Box::new(element.renamed_path(path)));
        }
        copy
    }

    pub(crate) fn structural_hash(&self) -> u32 {
        let mut bytes = Vec::new();
        self.write_structure(&mut bytes);
        digest_u32(&bytes)
    }

    fn write_structure(&self, out: &mut Vec<u8>) {
        out.push(self.kind.tag());
        out.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        match &self.kind {
            TypeKind::Enum { variants } => {
                out.extend_from_slice(&(variants.len() as u32).to_le_bytes());
                for variant in variants {
                    out.extend_from_slice(&(variant.len() as u32).to_le_bytes());
                    out.extend_from_slice(variant.as_bytes());
                }
            }
            TypeKind::Array(element) => element.write_structure(out),
            _ => {}
        }
    }
}

pub(crate) fn digest_u32(bytes: &[u8]) -> u32 {
    let digest = Sha256::digest(bytes);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// One registry entry. Records are immutable once published.
#[derive(Debug, Clone)]
pub struct TypeRecord {
    descriptor: TypeDescriptor,
    base_type_index: TypeIndex,
    array_type_index: TypeIndex,
    hash: u32,
}

impl TypeRecord {
    pub(crate) fn new(
        descriptor: TypeDescriptor,
        base_type_index: TypeIndex,
        array_type_index: TypeIndex,
    ) -> Self {
        let hash = descriptor.structural_hash();
        Self {
            descriptor,
            base_type_index,
            array_type_index,
            hash,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> &TypeKind {
        self.descriptor.kind()
    }

    pub fn path(&self) -> Option<&str> {
        self.descriptor.path()
    }

    pub fn is_array(&self) -> bool {
        self.descriptor.is_array()
    }

    pub fn is_execute(&self) -> bool {
        matches!(self.descriptor.kind(), TypeKind::Execute)
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.descriptor.innermost().kind(), TypeKind::Wildcard)
    }

    /// Element type for arrays, [`TypeIndex::INVALID`] otherwise.
    pub fn base_type_index(&self) -> TypeIndex {
        self.base_type_index
    }

    /// The array-of-this type, [`TypeIndex::INVALID`] if none exists.
    pub fn array_type_index(&self) -> TypeIndex {
        self.array_type_index
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub(crate) fn with_descriptor(&self, descriptor: TypeDescriptor) -> Self {
        Self::new(descriptor, self.base_type_index, self.array_type_index)
    }
}

/// Coarse type classes dispatch factories declare their arguments in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeCategory {
    Execute,
    SingleAnyValue,
    ArrayAnyValue,
    ArrayArrayAnyValue,
    SingleSimpleValue,
    ArraySimpleValue,
    SingleNumericValue,
    SingleEnumValue,
    ArrayEnumValue,
    SingleStructValue,
    ArrayStructValue,
    SingleObjectValue,
    ArrayObjectValue,
}

impl TypeCategory {
    pub const ALL: [TypeCategory; 13] = [
        TypeCategory::Execute,
        TypeCategory::SingleAnyValue,
        TypeCategory::ArrayAnyValue,
        TypeCategory::ArrayArrayAnyValue,
        TypeCategory::SingleSimpleValue,
        TypeCategory::ArraySimpleValue,
        TypeCategory::SingleNumericValue,
        TypeCategory::SingleEnumValue,
        TypeCategory::ArrayEnumValue,
        TypeCategory::SingleStructValue,
        TypeCategory::ArrayStructValue,
        TypeCategory::SingleObjectValue,
        TypeCategory::ArrayObjectValue,
    ];

    /// Categories a descriptor belongs to. Wildcards belong to none.
    pub fn of(descriptor: &TypeDescriptor) -> Vec<TypeCategory> {
        let inner = descriptor.innermost().kind();
        if matches!(inner, TypeKind::Wildcard | TypeKind::Map) {
            return Vec::new();
        }
        if matches!(inner, TypeKind::Execute) {
            return vec![TypeCategory::Execute];
        }
        let mut categories = Vec::new();
        match descriptor.array_depth() {
            0 => {
                categories.push(TypeCategory::SingleAnyValue);
                if inner.is_simple() {
                    categories.push(TypeCategory::SingleSimpleValue);
                }
                if inner.is_numeric() {
                    categories.push(TypeCategory::SingleNumericValue);
                }
                match inner {
                    TypeKind::Enum { .. } => categories.push(TypeCategory::SingleEnumValue),
                    TypeKind::Struct => categories.push(TypeCategory::SingleStructValue),
                    TypeKind::Object => categories.push(TypeCategory::SingleObjectValue),
                    _ => {}
                }
            }
            1 => {
                categories.push(TypeCategory::ArrayAnyValue);
                if inner.is_simple() {
                    categories.push(TypeCategory::ArraySimpleValue);
                }
                match inner {
                    TypeKind::Enum { .. } => categories.push(TypeCategory::ArrayEnumValue),
                    TypeKind::Struct => categories.push(TypeCategory::ArrayStructValue),
                    TypeKind::Object => categories.push(TypeCategory::ArrayObjectValue),
                    _ => {}
                }
            }
            _ => categories.push(TypeCategory::ArrayArrayAnyValue),
        }
        categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_names_nest() {
        let float = TypeDescriptor::float();
        let array = TypeDescriptor::array_of(&float);
        let nested = TypeDescriptor::array_of(&array);
        assert_eq!(array.name(), "array<float>");
        assert_eq!(nested.name(), "array<array<float>>");
        assert_eq!(nested.array_depth(), 2);
        assert_eq!(nested.innermost(), &float);
    }

    #[test]
    fn categories_follow_depth_and_kind() {
        let float = TypeDescriptor::float();
        assert!(TypeCategory::of(&float).contains(&TypeCategory::SingleNumericValue));
        let array = TypeDescriptor::array_of(&float);
        assert_eq!(
            TypeCategory::of(&array),
            vec![TypeCategory::ArrayAnyValue, TypeCategory::ArraySimpleValue]
        );
        assert!(TypeCategory::of(&TypeDescriptor::wildcard()).is_empty());
        let axis = TypeDescriptor::enumeration("Axis", ["X", "Y"]);
        assert!(TypeCategory::of(&axis).contains(&TypeCategory::SingleEnumValue));
    }

    #[test]
    fn structural_hash_depends_on_variants() {
        let a = TypeDescriptor::enumeration("Axis", ["X", "Y"]);
        let b = TypeDescriptor::enumeration("Axis", ["X", "Y", "Z"]);
        assert_ne!(a.structural_hash(), b.structural_hash());
        assert_eq!(a.structural_hash(), a.clone().structural_hash());
    }
}
