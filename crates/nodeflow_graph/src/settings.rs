// SPDX-License-Identifier: MIT OR Apache-2.0
//! Evaluation and editing settings.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Execution ceiling for a single run
pub const DEFAULT_MAX_EXECUTIONS: usize = 256;

/// Deepest pull recursion before evaluation gives up
pub const DEFAULT_MAX_PULL_DEPTH: usize = 256;

/// How `Graph::connect` treats connections that close a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CyclePolicy {
    /// Refuse value connections that would make a node depend on itself.
    /// Execute connections may always loop; the runner bounds them.
    #[default]
    RejectDataCycles,
    /// Accept every connection; pull depth bounds evaluation instead
    Allow,
}

/// Settings shared by graphs, evaluators and runners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Node executions allowed in one run
    pub max_executions: usize,
    /// Nested pull evaluations allowed
    pub max_pull_depth: usize,
    /// Cycle handling on connect
    pub cycle_policy: CyclePolicy,
    /// Run evaluation to completion instead of single-stepping
    pub auto_iterate: bool,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_executions: DEFAULT_MAX_EXECUTIONS,
            max_pull_depth: DEFAULT_MAX_PULL_DEPTH,
            cycle_policy: CyclePolicy::default(),
            auto_iterate: true,
        }
    }
}

impl GraphSettings {
    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(s)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron(&contents).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let ron_str = self.to_ron().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, ron_str)
    }
}
