//=====================================================
// File: vm/profiling.rs
//=====================================================
// Goal: Per-run timing and frequency data for the interpreter
// Objective: Count executed opcodes and native calls without changing
//            execution semantics
//=====================================================

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::bytecode::Opcode;

/// Timing and frequency data for a single [`super::RigVm`] run.
#[derive(Clone, Debug, Default)]
pub struct ExecutionProfile {
    start: Option<Instant>,
    pub total_duration: Option<Duration>,
    pub opcodes: BTreeMap<&'static str, u64>,
    pub hot_functions: HotFunctionTable,
}

impl ExecutionProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) {
        self.start = Some(Instant::now());
        self.total_duration = None;
    }

    pub fn end(&mut self) {
        if let Some(started) = self.start.take() {
            self.total_duration = Some(started.elapsed());
        }
    }

    pub fn record_opcode(&mut self, opcode: Opcode) {
        *self.opcodes.entry(opcode.name()).or_insert(0) += 1;
    }

    pub fn record_function(&mut self, name: &str) -> u64 {
        self.hot_functions.record_call(name)
    }

    pub fn instructions(&self) -> u64 {
        self.opcodes.values().sum()
    }

    pub fn summary(&self) -> ProfileSummary {
        let mut hot: Vec<(String, u64)> = self
            .hot_functions
            .snapshot()
            .into_iter()
            .filter(|(name, _)| self.hot_functions.is_hot(name))
            .collect();
        hot.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ProfileSummary {
            duration_micros: self.total_duration.map(|duration| duration.as_micros() as u64),
            instructions: self.instructions(),
            opcodes: self
                .opcodes
                .iter()
                .map(|(name, count)| ((*name).to_string(), *count))
                .collect(),
            hot_functions: hot,
        }
    }
}

/// Serializable view of a profile, used by the CLI's JSON output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub duration_micros: Option<u64>,
    pub instructions: u64,
    pub opcodes: BTreeMap<String, u64>,
    pub hot_functions: Vec<(String, u64)>,
}

/// Call counts per native function.
#[derive(Clone, Debug)]
pub struct HotFunctionTable {
    pub threshold: u64,
    hits: HashMap<String, u64>,
}

impl HotFunctionTable {
    pub const DEFAULT_HOT_THRESHOLD: u64 = 50;

    pub fn new() -> Self {
        Self {
            threshold: Self::DEFAULT_HOT_THRESHOLD,
            hits: HashMap::new(),
        }
    }

    pub fn record_call(&mut self, name: &str) -> u64 {
        let counter = self.hits.entry(name.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn is_hot(&self, name: &str) -> bool {
        let threshold = self.threshold.max(1);
        self.hits.get(name).copied().unwrap_or(0) >= threshold
    }

    pub fn calls(&self, name: &str) -> u64 {
        self.hits.get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.hits.clone()
    }
}

impl Default for HotFunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_functions_cross_threshold() {
        let mut profile = ExecutionProfile::new();
        profile.hot_functions.threshold = 2;
        profile.record_function("AddInt32");
        assert!(!profile.hot_functions.is_hot("AddInt32"));
        profile.record_function("AddInt32");
        profile.record_function("Log");
        let summary = profile.summary();
        assert_eq!(summary.hot_functions, vec![("AddInt32".to_string(), 2)]);
    }

    #[test]
    fn opcode_counts_sum_to_instructions() {
        let mut profile = ExecutionProfile::new();
        profile.begin();
        profile.record_opcode(Opcode::Copy);
        profile.record_opcode(Opcode::Copy);
        profile.record_opcode(Opcode::Exit);
        profile.end();
        assert_eq!(profile.instructions(), 3);
        assert_eq!(profile.opcodes["copy"], 2);
        assert!(profile.total_duration.is_some());
    }
}

//=====================================================
// End of file
//=====================================================
