#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! # RenderBox Workflows
//!
//! Open-document tracking for an editing session. Workflow documents are
//! JSON graph files path-addressed under a `workflows/` root and persisted
//! through the engine's user-data API; [`WorkflowStore`] owns the pure
//! session state over them: which documents are tracked, which are open,
//! which one is being edited, bookmark flags, and the subgraph view of the
//! active document. The store performs no I/O - callers feed it remote
//! listings and fetched content, and read its content back out when saving.
//!
//! ## Main Components
//!
//! * [`WorkflowStore`] - session state plus the node-id mapping surface
//! * [`Workflow`] - one tracked document and its load/modified state
//! * [`graph`] - subgraph arena and execution-id / locator-id conversion
//!
//! ## Usage
//!
//! ```rust
//! use renderbox_workflows::WorkflowStore;
//!
//! let mut store = WorkflowStore::new();
//!
//! let path = store.create_temporary(None, None).path().to_string();
//! store.open_workflow(&path).unwrap();
//!
//! assert!(store.is_active(&path));
//! ```

pub mod graph;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use renderbox_models::{NodeId, api::UserDataFullInfo};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub use crate::graph::{
    Graph, GraphArena, GraphError, GraphNode, NodeExecutionId, NodeLocatorId,
    ParseNodeLocatorIdError,
};

/// Path prefix every persisted workflow document lives under.
pub const WORKFLOWS_ROOT: &str = "workflows/";

/// File name given to fresh unsaved documents.
const DEFAULT_WORKFLOW_NAME: &str = "Unsaved Workflow.json";

/// Sentinel size for documents that have never been persisted remotely.
const TEMPORARY_SIZE: i64 = -1;

/// Error raised by [`WorkflowStore`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowStoreError {
    /// No workflow is tracked at the path
    #[error("No workflow at {0}")]
    UnknownPath(String),
    /// The workflow is tracked but not in the open list
    #[error("Workflow {0} is not open")]
    NotOpen(String),
    /// Another workflow is already tracked at the destination path
    #[error("A workflow already exists at {0}")]
    PathTaken(String),
}

/// One workflow document tracked by the [`WorkflowStore`].
///
/// A document starts out unloaded (metadata from a remote listing, no
/// content). Loading attaches the fetched content as the baseline for edit
/// tracking; unloading drops content and any unsaved edits with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    path: String,
    size: i64,
    modified: f64,
    original_content: Option<String>,
    content: Option<String>,
    is_modified: bool,
}

impl Workflow {
    const fn remote(path: String, modified: f64, size: i64) -> Self {
        Self {
            path,
            size,
            modified,
            original_content: None,
            content: None,
            is_modified: false,
        }
    }

    fn temporary(path: String, content: String) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let modified = Utc::now().timestamp_millis() as f64;

        Self {
            path,
            size: TEMPORARY_SIZE,
            modified,
            original_content: Some(content.clone()),
            content: Some(content),
            is_modified: false,
        }
    }

    /// Full path of the document, including the [`WORKFLOWS_ROOT`] prefix.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path relative to the [`WORKFLOWS_ROOT`].
    #[must_use]
    pub fn key(&self) -> &str {
        self.path.strip_prefix(WORKFLOWS_ROOT).unwrap_or(&self.path)
    }

    /// Size in bytes as reported by the remote listing, or `-1` for
    /// documents that only exist locally.
    #[must_use]
    pub const fn size(&self) -> i64 {
        self.size
    }

    /// Modification time in milliseconds since the epoch.
    #[must_use]
    pub const fn modified(&self) -> f64 {
        self.modified
    }

    /// Returns `true` if the document only exists locally.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        self.size == TEMPORARY_SIZE
    }

    /// Returns `true` if the document exists in remote storage.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        !self.is_temporary()
    }

    /// Returns `true` if content is attached and edits are being tracked.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    /// Returns `true` if the content diverged from the persisted baseline.
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.is_modified
    }

    /// The working content, `None` while unloaded.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// The persisted baseline content, `None` while unloaded.
    #[must_use]
    pub fn original_content(&self) -> Option<&str> {
        self.original_content.as_deref()
    }

    fn unload(&mut self) {
        self.original_content = None;
        self.content = None;
        self.is_modified = false;
    }

    fn apply_saved(&mut self, file: &UserDataFullInfo) {
        self.size = listing_size(file.size);
        self.modified = file.modified;
        self.original_content = self.content.clone();
        self.is_modified = false;
    }

    #[allow(clippy::float_cmp)]
    fn matches_listing(&self, file: &UserDataFullInfo) -> bool {
        self.modified == file.modified && self.size == listing_size(file.size)
    }
}

/// Tracks the workflow documents of an editing session.
///
/// Holds the path-keyed document lookup, the ordered open list, the active
/// document, bookmarks, and a [`GraphArena`] with the subgraph view of the
/// active document. Activating a different document resets the arena.
#[derive(Debug, Default)]
pub struct WorkflowStore {
    workflows: BTreeMap<String, Workflow>,
    open_paths: Vec<String>,
    active: Option<String>,
    bookmarks: BTreeSet<String>,
    graph: GraphArena,
}

impl WorkflowStore {
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            workflows: BTreeMap::new(),
            open_paths: vec![],
            active: None,
            bookmarks: BTreeSet::new(),
            graph: GraphArena::new(),
        }
    }

    /// Iterates every tracked document in path order.
    pub fn workflows(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }

    /// Looks up a tracked document by path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Workflow> {
        self.workflows.get(path)
    }

    /// The open documents in tab order.
    #[must_use]
    pub fn open_workflows(&self) -> Vec<&Workflow> {
        self.open_paths
            .iter()
            .filter_map(|path| self.workflows.get(path))
            .collect()
    }

    /// The open paths in tab order.
    #[must_use]
    pub fn open_paths(&self) -> &[String] {
        &self.open_paths
    }

    /// The document currently being edited.
    #[must_use]
    pub fn active_workflow(&self) -> Option<&Workflow> {
        self.active
            .as_deref()
            .and_then(|path| self.workflows.get(path))
    }

    /// Returns `true` if the path is in the open list.
    #[must_use]
    pub fn is_open(&self, path: &str) -> bool {
        self.open_paths.iter().any(|x| x == path)
    }

    /// Returns `true` if the path is the active document.
    #[must_use]
    pub fn is_active(&self, path: &str) -> bool {
        self.active.as_deref() == Some(path)
    }

    /// Every tracked document that exists in remote storage.
    #[must_use]
    pub fn persisted_workflows(&self) -> Vec<&Workflow> {
        self.workflows
            .values()
            .filter(|workflow| workflow.is_persisted())
            .collect()
    }

    /// Every tracked document with unsaved edits.
    #[must_use]
    pub fn modified_workflows(&self) -> Vec<&Workflow> {
        self.workflows
            .values()
            .filter(|workflow| workflow.is_modified())
            .collect()
    }

    /// Reconciles tracked documents against a remote file listing: unseen
    /// files are inserted, tracked files whose metadata changed are
    /// refreshed and unloaded, and persisted documents missing from the
    /// listing are dropped. Temporary documents only live locally and
    /// survive every sync.
    pub fn sync_remote(&mut self, files: &[UserDataFullInfo]) {
        let listed = files
            .iter()
            .map(|file| file.path.as_str())
            .collect::<BTreeSet<_>>();

        let stale = self
            .workflows
            .values()
            .filter(|workflow| workflow.is_persisted() && !listed.contains(workflow.path()))
            .map(|workflow| workflow.path.clone())
            .collect::<Vec<_>>();

        for path in stale {
            self.open_paths.retain(|x| x != &path);
            if self.is_active(&path) {
                self.activate(None);
            }
            self.workflows.remove(&path);
        }

        for file in files {
            match self.workflows.get_mut(&file.path) {
                Some(workflow) if !workflow.matches_listing(file) => {
                    workflow.modified = file.modified;
                    workflow.size = listing_size(file.size);
                    workflow.unload();
                }
                Some(_) => {}
                None => {
                    self.workflows.insert(
                        file.path.clone(),
                        Workflow::remote(file.path.clone(), file.modified, listing_size(file.size)),
                    );
                }
            }
        }

        log::debug!("synced workflows: listed={}", files.len());
    }

    /// Attaches fetched content to a tracked document and begins edit
    /// tracking against it. Loading again replaces the baseline.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    pub fn load_content(
        &mut self,
        path: &str,
        content: impl Into<String>,
    ) -> Result<&Workflow, WorkflowStoreError> {
        let workflow = self.workflow_mut(path)?;
        let content = content.into();

        workflow.original_content = Some(content.clone());
        workflow.content = Some(content);
        workflow.is_modified = false;

        log::debug!("loaded workflow content: path={path}");

        Ok(workflow)
    }

    /// Replaces the working content, flagging the document modified when it
    /// diverges from the baseline and clean when it matches again.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    pub fn update_content(
        &mut self,
        path: &str,
        content: impl Into<String>,
    ) -> Result<(), WorkflowStoreError> {
        let workflow = self.workflow_mut(path)?;
        let content = content.into();

        workflow.is_modified = workflow.original_content.as_deref() != Some(content.as_str());
        workflow.content = Some(content);

        Ok(())
    }

    /// Opens a document: appends it to the open list if necessary and makes
    /// it the active document. Opening the already-active document is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    pub fn open_workflow(&mut self, path: &str) -> Result<&Workflow, WorkflowStoreError> {
        self.tracked(path)?;

        if !self.is_active(path) {
            if !self.is_open(path) {
                self.open_paths.push(path.to_string());
            }
            self.activate(Some(path.to_string()));
            log::debug!("open workflow: path={path}");
        }

        self.tracked(path)
    }

    /// Adds paths to the open list without activating or loading anything.
    /// `left` lands before the existing tabs, `right` after; untracked paths
    /// are skipped and duplicates keep their leftmost position.
    pub fn open_in_background(&mut self, left: &[&str], right: &[&str]) {
        if left.is_empty() && right.is_empty() {
            return;
        }

        let mut seen = BTreeSet::new();
        let mut merged = Vec::new();

        for path in left
            .iter()
            .copied()
            .chain(self.open_paths.iter().map(String::as_str))
            .chain(right.iter().copied())
        {
            if self.workflows.contains_key(path) && seen.insert(path.to_string()) {
                merged.push(path.to_string());
            }
        }

        self.open_paths = merged;
    }

    /// Makes an already-open document the active one.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    /// * If the workflow is not in the open list
    pub fn set_active(&mut self, path: &str) -> Result<(), WorkflowStoreError> {
        self.tracked(path)?;

        if !self.is_open(path) {
            return Err(WorkflowStoreError::NotOpen(path.to_string()));
        }

        self.activate(Some(path.to_string()));

        Ok(())
    }

    /// Closes a document. Closing the active document activates its right
    /// neighbor, else its left neighbor, else nothing. Persisted documents
    /// are unloaded (unsaved edits are discarded); temporary documents are
    /// forgotten entirely.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    pub fn close_workflow(&mut self, path: &str) -> Result<(), WorkflowStoreError> {
        let temporary = self.tracked(path)?.is_temporary();
        let neighbor = self.is_active(path).then(|| self.neighbor_of(path));

        self.open_paths.retain(|x| x != path);

        if temporary {
            self.workflows.remove(path);
        } else if let Some(workflow) = self.workflows.get_mut(path) {
            workflow.unload();
        }

        if let Some(neighbor) = neighbor {
            self.activate(neighbor);
        }

        log::debug!("close workflow: path={path}");

        Ok(())
    }

    /// The open document `shift` tabs away from the active one, wrapping at
    /// both ends. `None` when no open document is active.
    #[must_use]
    pub fn active_index_shift(&self, shift: i64) -> Option<&Workflow> {
        let active = self.active.as_deref()?;
        let index = self.open_paths.iter().position(|x| x == active)?;

        let length = i64::try_from(self.open_paths.len()).ok()?;
        let index = i64::try_from(index).ok()?;
        let next = usize::try_from((index + shift).rem_euclid(length)).ok()?;

        self.open_paths
            .get(next)
            .and_then(|path| self.workflows.get(path))
    }

    /// Registers a fresh local-only document and returns it. The name
    /// defaults to `Unsaved Workflow.json` and is suffixed with ` (2)`,
    /// ` (3)`, ... until it is free; the content defaults to the engine's
    /// empty graph. The document is tracked but not opened.
    pub fn create_temporary(&mut self, name: Option<&str>, content: Option<&Value>) -> &Workflow {
        let base = format!("{WORKFLOWS_ROOT}{}", name.unwrap_or(DEFAULT_WORKFLOW_NAME));
        let path = self.unconflicted_path(&base);
        let content = content.map_or_else(default_graph_json, Value::to_string);

        log::debug!("create temporary workflow: path={path}");

        let workflow = Workflow::temporary(path.clone(), content);
        self.workflows.entry(path).or_insert(workflow)
    }

    /// Moves a tracked document to a new path. The open-tab position, the
    /// active marker, and any bookmark follow it.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    /// * If another workflow is already tracked at the destination
    pub fn rename_workflow(
        &mut self,
        path: &str,
        new_path: &str,
    ) -> Result<(), WorkflowStoreError> {
        self.tracked(path)?;

        if new_path != path && self.workflows.contains_key(new_path) {
            return Err(WorkflowStoreError::PathTaken(new_path.to_string()));
        }

        self.retrack(path, new_path);

        log::debug!("rename workflow: path={path} new_path={new_path}");

        Ok(())
    }

    /// Forgets a document entirely: the lookup entry, its open tab, and any
    /// bookmark. Deleting the active document activates a neighbor the same
    /// way closing does.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    pub fn delete_workflow(&mut self, path: &str) -> Result<(), WorkflowStoreError> {
        self.tracked(path)?;

        let neighbor = self.is_active(path).then(|| self.neighbor_of(path));

        self.open_paths.retain(|x| x != path);
        self.bookmarks.remove(path);
        self.workflows.remove(path);

        if let Some(neighbor) = neighbor {
            self.activate(neighbor);
        }

        log::debug!("delete workflow: path={path}");

        Ok(())
    }

    /// Records a completed save: the working content becomes the persisted
    /// baseline and the metadata the engine returned replaces the tracked
    /// one.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    pub fn save_workflow(
        &mut self,
        path: &str,
        file: &UserDataFullInfo,
    ) -> Result<(), WorkflowStoreError> {
        let workflow = self.workflow_mut(path)?;

        workflow.apply_saved(file);

        log::debug!("save workflow: path={path}");

        Ok(())
    }

    /// Records a completed save-as: tracking moves to the saved path (any
    /// document previously tracked there is displaced) and the document
    /// becomes persisted.
    ///
    /// # Errors
    ///
    /// * If no workflow is tracked at the path
    pub fn save_workflow_as(
        &mut self,
        path: &str,
        file: &UserDataFullInfo,
    ) -> Result<(), WorkflowStoreError> {
        self.tracked(path)?;

        if file.path != path {
            // Saving over the document currently viewed replaces it.
            if self.is_active(&file.path) {
                self.graph = GraphArena::new();
            }
            self.workflows.remove(&file.path);
            self.open_paths.retain(|x| x != &file.path);
            self.retrack(path, &file.path);
        }

        self.workflow_mut(&file.path)?.apply_saved(file);

        log::debug!("save workflow as: path={path} new_path={}", file.path);

        Ok(())
    }

    /// Paths currently bookmarked, in order.
    pub fn bookmarks(&self) -> impl Iterator<Item = &str> {
        self.bookmarks.iter().map(String::as_str)
    }

    /// Returns `true` if the path is bookmarked.
    #[must_use]
    pub fn is_bookmarked(&self, path: &str) -> bool {
        self.bookmarks.contains(path)
    }

    /// Every tracked document whose path is bookmarked.
    #[must_use]
    pub fn bookmarked_workflows(&self) -> Vec<&Workflow> {
        self.workflows
            .values()
            .filter(|workflow| self.bookmarks.contains(workflow.path()))
            .collect()
    }

    /// Replaces the bookmark set from a persisted favorites list.
    pub fn load_bookmarks(&mut self, favorites: impl IntoIterator<Item = String>) {
        self.bookmarks = favorites.into_iter().collect();
    }

    /// Sets or clears a bookmark. Returns `true` if the flag changed, the
    /// caller's cue to persist the favorites list.
    pub fn set_bookmarked(&mut self, path: &str, value: bool) -> bool {
        if self.bookmarks.contains(path) == value {
            return false;
        }

        if value {
            self.bookmarks.insert(path.to_string());
        } else {
            self.bookmarks.remove(path);
        }

        true
    }

    /// Flips a bookmark, returning the new value.
    pub fn toggle_bookmarked(&mut self, path: &str) -> bool {
        let value = !self.is_bookmarked(path);
        self.set_bookmarked(path, value);
        value
    }

    /// The subgraph arena of the active document.
    #[must_use]
    pub const fn graph(&self) -> &GraphArena {
        &self.graph
    }

    /// The subgraph arena of the active document, mutably. Callers rebuild
    /// it when loading document content.
    pub const fn graph_mut(&mut self) -> &mut GraphArena {
        &mut self.graph
    }

    /// Returns `true` if a subgraph of the active document is viewed.
    #[must_use]
    pub fn is_subgraph_active(&self) -> bool {
        self.graph.is_subgraph_active()
    }

    /// The definition uuid of the viewed subgraph, `None` at the root.
    #[must_use]
    pub fn active_subgraph(&self) -> Option<Uuid> {
        self.graph.active_subgraph()
    }

    /// See [`GraphArena::execution_id_to_current_id`].
    #[must_use]
    pub fn execution_id_to_current_id(&self, execution_id: &NodeExecutionId) -> Option<NodeId> {
        self.graph.execution_id_to_current_id(execution_id)
    }

    /// See [`GraphArena::node_id_to_locator_id`].
    #[must_use]
    pub fn node_id_to_locator_id(&self, node_id: NodeId, subgraph: Option<Uuid>) -> NodeLocatorId {
        self.graph.node_id_to_locator_id(node_id, subgraph)
    }

    /// See [`GraphArena::execution_id_to_locator_id`].
    #[must_use]
    pub fn execution_id_to_locator_id(
        &self,
        execution_id: &NodeExecutionId,
    ) -> Option<NodeLocatorId> {
        self.graph.execution_id_to_locator_id(execution_id)
    }

    /// See [`GraphArena::locator_id_to_execution_id`].
    #[must_use]
    pub fn locator_id_to_execution_id(
        &self,
        locator_id: &NodeLocatorId,
    ) -> Option<NodeExecutionId> {
        self.graph.locator_id_to_execution_id(locator_id)
    }

    fn tracked(&self, path: &str) -> Result<&Workflow, WorkflowStoreError> {
        self.workflows
            .get(path)
            .ok_or_else(|| WorkflowStoreError::UnknownPath(path.to_string()))
    }

    fn workflow_mut(&mut self, path: &str) -> Result<&mut Workflow, WorkflowStoreError> {
        self.workflows
            .get_mut(path)
            .ok_or_else(|| WorkflowStoreError::UnknownPath(path.to_string()))
    }

    /// The subgraph view belongs to the document being edited, so switching
    /// documents resets it.
    fn activate(&mut self, path: Option<String>) {
        if self.active != path {
            self.active = path;
            self.graph = GraphArena::new();
        }
    }

    /// The next open path after `path`, else the previous one, else `None`.
    fn neighbor_of(&self, path: &str) -> Option<String> {
        let index = self.open_paths.iter().position(|x| x == path)?;

        self.open_paths
            .get(index + 1)
            .or_else(|| index.checked_sub(1).and_then(|i| self.open_paths.get(i)))
            .cloned()
    }

    /// Moves tracking from one path to another: the lookup entry, the
    /// open-tab position, the active marker, and any bookmark follow. The
    /// document itself is unchanged, so the subgraph view is preserved.
    fn retrack(&mut self, path: &str, new_path: &str) {
        if let Some(mut workflow) = self.workflows.remove(path) {
            workflow.path = new_path.to_string();
            self.workflows.insert(new_path.to_string(), workflow);
        }

        for open in &mut self.open_paths {
            if open == path {
                *open = new_path.to_string();
            }
        }

        if self.active.as_deref() == Some(path) {
            self.active = Some(new_path.to_string());
        }

        if self.bookmarks.remove(path) {
            self.bookmarks.insert(new_path.to_string());
        }
    }

    /// Appends ` (2)`, ` (3)`, ... before the extension until the path does
    /// not collide with a tracked document.
    fn unconflicted_path(&self, base: &str) -> String {
        if !self.workflows.contains_key(base) {
            return base.to_string();
        }

        let (directory, filename, suffix) = path_details(base);
        let mut counter = 2;

        loop {
            let candidate = if suffix.is_empty() {
                format!("{directory}{filename} ({counter})")
            } else {
                format!("{directory}{filename} ({counter}).{suffix}")
            };

            if !self.workflows.contains_key(&candidate) {
                return candidate;
            }

            counter += 1;
        }
    }
}

fn listing_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Splits a path into directory (with trailing separator), file stem, and
/// extension.
fn path_details(path: &str) -> (&str, &str, &str) {
    let split = path.rfind('/').map_or(0, |index| index + 1);
    let (directory, file) = path.split_at(split);
    let (filename, suffix) = file.rsplit_once('.').unwrap_or((file, ""));

    (directory, filename, suffix)
}

/// Content given to fresh documents: the engine's empty default graph.
fn default_graph_json() -> String {
    serde_json::json!({
        "last_node_id": 0,
        "last_link_id": 0,
        "nodes": [],
        "links": [],
        "groups": [],
        "config": {},
        "extra": {},
        "version": 0.4,
    })
    .to_string()
}
