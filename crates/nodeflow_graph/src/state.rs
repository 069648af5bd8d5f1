// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loaded/dirty tracking derived from graph events.

use crate::graph::GraphEvent;
use std::fmt;

/// Document state of a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphState {
    /// Nothing loaded
    #[default]
    Unloaded,
    /// Loaded with no edits since the last load or save
    Clean,
    /// Loaded with unsaved edits
    Dirty,
}

impl GraphState {
    /// True when a graph is loaded
    pub fn is_loaded(self) -> bool {
        !matches!(self, Self::Unloaded)
    }

    /// True when there are unsaved edits
    pub fn is_dirty(self) -> bool {
        matches!(self, Self::Dirty)
    }
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Clean => write!(f, "clean"),
            Self::Dirty => write!(f, "dirty"),
        }
    }
}

/// Folds graph events into a [`GraphState`].
///
/// The tracker only mirrors events and never touches the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphStateTracker {
    state: GraphState,
}

impl GraphStateTracker {
    /// Create a tracker in the unloaded state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Apply one event
    pub fn observe(&mut self, event: &GraphEvent) {
        self.state = match (self.state, event) {
            (_, GraphEvent::Loaded | GraphEvent::Saved) => GraphState::Clean,
            (_, GraphEvent::Unloaded) => GraphState::Unloaded,
            (GraphState::Unloaded, _) => GraphState::Unloaded,
            (_, GraphEvent::Edited) => GraphState::Dirty,
            (state, _) => state,
        };
    }
}
