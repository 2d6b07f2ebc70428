use serde::{Deserialize, Serialize};

/// Execution flags. Loaded from the `[vm]` table of the CLI config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Emit one `debug!` event per executed instruction.
    pub trace: bool,
    /// Collect an [`super::ExecutionProfile`] for every run.
    pub profile: bool,
    /// Nesting limit for entries, run ranges, branches and lazy arguments.
    pub max_entry_depth: usize,
    /// Diagnostics kept per run; later ones are counted but dropped.
    pub max_diagnostics: usize,
    /// Highest slice count a block may select. Larger indices report
    /// `SliceOutOfRange` and use slice 0.
    pub max_slices: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            trace: false,
            profile: false,
            max_entry_depth: 64,
            max_diagnostics: 256,
            max_slices: 65_536,
        }
    }
}

impl VmOptions {
    pub fn with_trace(trace: bool) -> Self {
        Self {
            trace,
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_max_entry_depth(mut self, depth: usize) -> Self {
        self.max_entry_depth = depth;
        self
    }

    pub fn with_max_slices(mut self, slices: usize) -> Self {
        self.max_slices = slices;
        self
    }
}
