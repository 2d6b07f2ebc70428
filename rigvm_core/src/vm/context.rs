use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::bytecode::Operand;

/// Recoverable execution failure. The interpreter substitutes a fallback
/// value and keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum SoftError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("{value} is not a valid enum ordinal ({variants} variants)")]
    InvalidEnumValue { value: i64, variants: usize },
    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("no branch labelled '{0}'")]
    UnknownBranch(String),
    #[error("nesting depth {depth} exceeded")]
    DepthExceeded { depth: usize },
    #[error("slice {index} outside block of {count}")]
    SliceOutOfRange { index: i64, count: i64 },
}

/// A soft error together with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub instruction: usize,
    pub slice: usize,
    pub error: SoftError,
}

pub type DiagnosticHook = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Per-run interpreter state that is not register memory.
#[derive(Default)]
pub struct ExecuteContext {
    slices: Vec<usize>,
    traits: Vec<Operand>,
    depth: usize,
    diagnostics: Vec<Diagnostic>,
    dropped: usize,
    max_diagnostics: usize,
    hook: Option<DiagnosticHook>,
}

impl ExecuteContext {
    pub fn new(max_diagnostics: usize) -> Self {
        Self {
            max_diagnostics,
            ..Self::default()
        }
    }

    pub(crate) fn set_hook(&mut self, hook: Option<DiagnosticHook>) {
        self.hook = hook;
    }

    pub(crate) fn begin_run(&mut self) {
        self.slices.clear();
        self.traits.clear();
        self.depth = 0;
        self.diagnostics.clear();
        self.dropped = 0;
    }

    /// Slice addressed by sliced registers; 0 outside any block.
    pub fn slice_index(&self) -> usize {
        self.slices.last().copied().unwrap_or(0)
    }

    pub fn slice_depth(&self) -> usize {
        self.slices.len()
    }

    pub(crate) fn push_slice(&mut self, slice: usize) {
        self.slices.push(slice);
    }

    pub(crate) fn pop_slice(&mut self) -> Option<usize> {
        self.slices.pop()
    }

    pub(crate) fn truncate_slices(&mut self, depth: usize) {
        self.slices.truncate(depth);
    }

    pub fn traits(&self) -> &[Operand] {
        &self.traits
    }

    pub(crate) fn set_traits(&mut self, traits: Vec<Operand>) {
        self.traits = traits;
    }

    pub(crate) fn take_traits(&mut self) -> Vec<Operand> {
        std::mem::take(&mut self.traits)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn report(&mut self, instruction: usize, error: SoftError) {
        let diagnostic = Diagnostic {
            instruction,
            slice: self.slice_index(),
            error,
        };
        warn!(instruction, slice = diagnostic.slice, error = %diagnostic.error, "soft execution error");
        if let Some(hook) = &self.hook {
            hook(&diagnostic);
        }
        if self.diagnostics.len() < self.max_diagnostics {
            self.diagnostics.push(diagnostic);
        } else {
            self.dropped += 1;
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub(crate) fn take_diagnostics(&mut self) -> (Vec<Diagnostic>, usize) {
        (std::mem::take(&mut self.diagnostics), std::mem::take(&mut self.dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn diagnostics_are_capped_but_counted() {
        let mut context = ExecuteContext::new(1);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        context.set_hook(Some(Arc::new(move |_: &Diagnostic| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        context.report(3, SoftError::DivisionByZero);
        context.report(4, SoftError::UnknownBranch("left".into()));
        let (kept, dropped) = context.take_diagnostics();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].instruction, 3);
        assert_eq!(dropped, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn slice_defaults_to_zero() {
        let mut context = ExecuteContext::new(8);
        assert_eq!(context.slice_index(), 0);
        context.push_slice(2);
        context.push_slice(5);
        assert_eq!(context.slice_index(), 5);
        context.truncate_slices(1);
        assert_eq!(context.slice_index(), 2);
    }
}
