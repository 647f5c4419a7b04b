use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::CancelToken;
use crate::error::ContextError;
use crate::id::Id;
use crate::metadata::Metadata;
use crate::vfs::{File, Filesystem};

/// The input view handed to every task by the engine. Use this struct's
/// methods to query the available files and to emit derived files.
///
/// Every task of a step receives the same snapshot: the original source file
/// plus everything produced by *prior* steps. Files emitted by sibling tasks
/// in the same step are not visible here.
pub struct TaskContext {
    source: Arc<File>,
    snapshot: Arc<Vec<Arc<File>>>,
    visible: Arc<HashSet<Id>>,
    fs: Arc<Filesystem>,
    cancel: CancelToken,
}

impl TaskContext {
    pub(crate) fn new(
        source: Arc<File>,
        snapshot: Arc<Vec<Arc<File>>>,
        visible: Arc<HashSet<Id>>,
        fs: Arc<Filesystem>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            snapshot,
            visible,
            fs,
            cancel,
        }
    }

    /// The original source file of the run.
    pub fn source(&self) -> &Arc<File> {
        &self.source
    }

    /// The available files as they stood at the start of this step.
    pub fn available(&self) -> &[Arc<File>] {
        &self.snapshot
    }

    /// First available file with exactly this name.
    pub fn find(&self, name: &str) -> Option<&Arc<File>> {
        self.snapshot.iter().find(|file| file.name() == name)
    }

    /// Every available file whose name matches `pattern`.
    pub fn glob(&self, pattern: &str) -> Result<Vec<Arc<File>>, ContextError> {
        let pattern = glob::Pattern::new(pattern)?;

        Ok(self
            .snapshot
            .iter()
            .filter(|file| pattern.matches(file.name()))
            .cloned()
            .collect())
    }

    /// Derive a new file from `parent`, attributing provenance.
    ///
    /// The parent must be a member of this step's input snapshot. A file
    /// produced by a sibling task in the same step is rejected, which keeps
    /// every derivation anchored to the previous barrier.
    pub fn derive(
        &self,
        parent: &File,
        name: impl Into<String>,
    ) -> Result<Arc<File>, ContextError> {
        self.derive_with(parent, name, Metadata::new())
    }

    /// Like [`TaskContext::derive`], with initial metadata for the new file.
    pub fn derive_with(
        &self,
        parent: &File,
        name: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Arc<File>, ContextError> {
        if !self.visible.contains(parent.id()) {
            return Err(ContextError::ParentNotVisible(parent.id().clone()));
        }

        Ok(self.fs.create_derived_with(parent.id(), name, metadata)?)
    }

    /// The shared filesystem graph, for directory population and navigation.
    pub fn filesystem(&self) -> &Filesystem {
        &self.fs
    }

    /// Cooperative cancellation signal for the run. Long-running tasks
    /// should poll this and bail out early; pre-emption is not guaranteed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
