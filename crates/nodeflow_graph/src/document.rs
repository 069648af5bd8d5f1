// SPDX-License-Identifier: MIT OR Apache-2.0
//! A graph bound to its file, with save/revert support.
//!
//! The document keeps the last saved state as a compact binary snapshot
//! and derives its [`GraphState`] from the graph's own event stream.

use crate::data::{GraphData, LoadError};
use crate::graph::{Graph, GraphEvent};
use crate::node::NodeRegistry;
use crate::pin_type::PinTypeRegistry;
use crate::settings::GraphSettings;
use crate::state::{GraphState, GraphStateTracker};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Document errors
#[derive(Debug, Error)]
pub enum DocumentError {
    /// No graph is loaded
    #[error("No graph loaded")]
    NotLoaded,

    /// Save requested before any path was set
    #[error("Document has no file path")]
    NoPath,

    /// Nothing has been saved or loaded yet
    #[error("No saved state to revert to")]
    NoSnapshot,

    /// Load or save failed
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Result type for document operations
pub type Result<T> = std::result::Result<T, DocumentError>;

/// Saved graph state
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    /// Serialized graph data
    pub data: Vec<u8>,
    /// Timestamp when snapshot was taken
    pub timestamp: u64,
}

impl GraphSnapshot {
    /// Capture a graph
    pub fn capture(graph: &Graph) -> std::result::Result<Self, LoadError> {
        let data = bincode::serialize(&graph.to_data()?)?;
        Ok(Self {
            data,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }

    /// Decode the stored graph data
    pub fn restore(&self) -> std::result::Result<GraphData, LoadError> {
        Ok(bincode::deserialize(&self.data)?)
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// An editable graph plus its save state
pub struct GraphDocument {
    nodes: NodeRegistry,
    registry: Arc<PinTypeRegistry>,
    settings: GraphSettings,
    path: Option<PathBuf>,
    graph: Option<Graph>,
    events: Option<mpsc::Receiver<GraphEvent>>,
    tracker: GraphStateTracker,
    snapshot: Option<GraphSnapshot>,
}

impl GraphDocument {
    /// Create an empty document
    pub fn new(nodes: NodeRegistry, registry: Arc<PinTypeRegistry>, settings: GraphSettings) -> Self {
        Self {
            nodes,
            registry,
            settings,
            path: None,
            graph: None,
            events: None,
            tracker: GraphStateTracker::new(),
            snapshot: None,
        }
    }

    /// Document state
    pub fn state(&mut self) -> GraphState {
        self.sync();
        self.tracker.state()
    }

    /// File the document saves to
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loaded graph
    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    /// Loaded graph, for editing.
    ///
    /// Events from earlier edits are folded into the state first.
    pub fn graph_mut(&mut self) -> Option<&mut Graph> {
        self.sync();
        self.graph.as_mut()
    }

    /// Last saved snapshot
    pub fn snapshot(&self) -> Option<&GraphSnapshot> {
        self.snapshot.as_ref()
    }

    /// Adopt an in-memory graph as the clean baseline
    pub fn open(&mut self, graph: Graph) -> Result<()> {
        self.unload();
        self.snapshot = Some(GraphSnapshot::capture(&graph)?);
        self.attach(graph);
        Ok(())
    }

    /// Load a graph from a RON file
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let data = GraphData::load(path)?;
        let graph = self.build(&data)?;
        self.unload();
        self.snapshot = Some(GraphSnapshot::capture(&graph)?);
        self.path = Some(path.to_path_buf());
        self.attach(graph);
        tracing::info!(path = %path.display(), "Loaded graph document");
        Ok(())
    }

    /// Save to the current path
    pub fn save(&mut self) -> Result<()> {
        let path = self.path.clone().ok_or(DocumentError::NoPath)?;
        self.save_as(&path)
    }

    /// Save to `path` and make it the current path
    pub fn save_as(&mut self, path: &Path) -> Result<()> {
        let graph = self.graph.as_mut().ok_or(DocumentError::NotLoaded)?;
        graph.to_data().map_err(LoadError::from)?.save(path)?;
        self.snapshot = Some(GraphSnapshot::capture(graph)?);
        graph.emit(GraphEvent::Saved);
        self.path = Some(path.to_path_buf());
        tracing::info!(path = %path.display(), "Saved graph document");
        Ok(())
    }

    /// Drop the loaded graph. The saved snapshot is kept for [`Self::revert`].
    pub fn unload(&mut self) {
        if let Some(graph) = self.graph.as_mut() {
            graph.emit(GraphEvent::Unloaded);
        }
        self.sync();
        self.graph = None;
        self.events = None;
    }

    /// Discard edits by reloading the last saved snapshot
    pub fn revert(&mut self) -> Result<()> {
        let data = self
            .snapshot
            .as_ref()
            .ok_or(DocumentError::NoSnapshot)?
            .restore()?;
        let graph = self.build(&data)?;
        self.unload();
        self.attach(graph);
        tracing::debug!("Reverted graph document");
        Ok(())
    }

    fn build(&self, data: &GraphData) -> std::result::Result<Graph, LoadError> {
        Graph::from_data(data, &self.nodes, Arc::clone(&self.registry), &self.settings)
    }

    fn attach(&mut self, mut graph: Graph) {
        let events = graph.subscribe();
        graph.emit(GraphEvent::Loaded);
        self.graph = Some(graph);
        self.events = Some(events);
        self.sync();
    }

    fn sync(&mut self) {
        if let Some(events) = &self.events {
            for event in events.try_iter() {
                self.tracker.observe(&event);
            }
        }
    }
}
