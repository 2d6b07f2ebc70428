use std::collections::HashMap;

use serde::Serialize;

/// Presentation data for a function or template. Never consulted during
/// resolution or execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionMetadata {
    pub display_name: String,
    pub category: String,
    pub tooltip: String,
}

impl FunctionMetadata {
    pub fn new(display_name: impl Into<String>, category: impl Into<String>, tooltip: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            category: category.into(),
            tooltip: tooltip.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    entries: HashMap<String, FunctionMetadata>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, metadata: FunctionMetadata) -> Option<FunctionMetadata> {
        self.entries.insert(name.into(), metadata)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionMetadata> {
        self.entries.get(name)
    }

    /// Looks up `name`, falling back to its template for resolved
    /// permutation records named `Template::...`.
    pub fn lookup(&self, name: &str) -> Option<&FunctionMetadata> {
        self.get(name)
            .or_else(|| name.split_once("::").and_then(|(template, _)| self.get(template)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FunctionMetadata)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(name, meta)| (name.as_str(), meta)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }
}
