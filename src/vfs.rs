use std::sync::Arc;

use camino::Utf8PathBuf;
use dashmap::{DashMap, DashSet};

use crate::error::GraphError;
use crate::id::{Id, IdGenerator};
use crate::metadata::Metadata;

/// What a file is in provenance terms.
///
/// A derived file without a parent is unrepresentable; the parent edge is
/// established at creation and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// An original input, supplied by the caller before a run starts.
    Source,
    /// A file produced by a task, derived from exactly one parent file.
    Derived { parent: Id },
}

/// A file in the virtual filesystem.
///
/// Files are identity records, not byte containers. The id and name are
/// immutable after construction; the metadata map and the derived-file set
/// keep growing for the lifetime of the run.
#[derive(Debug)]
pub struct File {
    id: Id,
    name: String,
    kind: FileKind,
    metadata: Metadata,
    derived: DashSet<Id>,
}

impl File {
    fn new(id: Id, name: String, kind: FileKind, metadata: Metadata) -> Self {
        Self {
            id,
            name,
            kind,
            metadata,
            derived: DashSet::new(),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The file name, including any extension but no path information.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, FileKind::Source)
    }

    /// Id of the file this one was derived from, absent for sources.
    pub fn parent_id(&self) -> Option<&Id> {
        match &self.kind {
            FileKind::Source => None,
            FileKind::Derived { parent } => Some(parent),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The extension, not including the period. Anything after the final
    /// period in the name, recomputed on demand.
    pub fn extension(&self) -> Option<&str> {
        self.name.rfind('.').map(|pos| &self.name[pos + 1..])
    }

    /// Ids of every file derived from this one so far.
    ///
    /// Safe to call while sibling tasks are still inserting; the snapshot is
    /// weakly consistent as of when iteration started.
    pub fn derived_ids(&self) -> Vec<Id> {
        self.derived.iter().map(|id| id.key().clone()).collect()
    }

    fn add_derived(&self, id: Id) {
        self.derived.insert(id);
    }
}

/// A directory in the virtual filesystem.
///
/// The parent edge is navigational only; the [`Filesystem`] registry owns
/// every directory. A directory is inserted as a child exactly once, at
/// creation, so the parent/child relation is a tree by construction.
#[derive(Debug)]
pub struct Directory {
    id: Id,
    name: String,
    metadata: Metadata,
    parent: Option<Id>,
    dirs: DashSet<Id>,
    files: DashSet<Id>,
}

impl Directory {
    fn new(id: Id, name: String, metadata: Metadata, parent: Option<Id>) -> Self {
        Self {
            id,
            name,
            metadata,
            parent,
            dirs: DashSet::new(),
            files: DashSet::new(),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Id of the enclosing directory, absent for a root.
    pub fn parent_id(&self) -> Option<&Id> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn dir_ids(&self) -> Vec<Id> {
        self.dirs.iter().map(|id| id.key().clone()).collect()
    }

    pub fn file_ids(&self) -> Vec<Id> {
        self.files.iter().map(|id| id.key().clone()).collect()
    }
}

/// The run-scoped registry holding every filesystem entity.
///
/// All parent/child and derivation edges are id lookups against this
/// registry, which is the sole owner of the entities. Every mutating
/// operation takes `&self` and is safe to call from many tasks at once;
/// nothing is ever removed during a run.
#[derive(Debug, Default)]
pub struct Filesystem {
    ids: IdGenerator,
    files: DashMap<Id, Arc<File>>,
    dirs: DashMap<Id, Arc<Directory>>,
}

impl Filesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: IdGenerator) -> Self {
        Self {
            ids,
            files: DashMap::new(),
            dirs: DashMap::new(),
        }
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// Register an original input file.
    pub fn create_source(&self, name: impl Into<String>) -> Arc<File> {
        self.create_source_with(name, Metadata::new())
    }

    pub fn create_source_with(&self, name: impl Into<String>, metadata: Metadata) -> Arc<File> {
        let file = Arc::new(File::new(
            self.ids.generate(),
            name.into(),
            FileKind::Source,
            metadata,
        ));
        self.files.insert(file.id.clone(), file.clone());
        file
    }

    /// Create a file derived from `parent`.
    ///
    /// Mints an id, inserts the file into the registry and into the parent's
    /// derived set. Callable concurrently by multiple tasks with the same or
    /// different parents; no insertion is ever lost.
    pub fn create_derived(
        &self,
        parent: &Id,
        name: impl Into<String>,
    ) -> Result<Arc<File>, GraphError> {
        self.create_derived_with(parent, name, Metadata::new())
    }

    pub fn create_derived_with(
        &self,
        parent: &Id,
        name: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Arc<File>, GraphError> {
        let parent = self
            .files
            .get(parent)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GraphError::UnknownFile(parent.clone()))?;

        let file = Arc::new(File::new(
            self.ids.generate(),
            name.into(),
            FileKind::Derived {
                parent: parent.id.clone(),
            },
            metadata,
        ));

        self.files.insert(file.id.clone(), file.clone());
        parent.add_derived(file.id.clone());

        Ok(file)
    }

    pub fn file(&self, id: &Id) -> Option<Arc<File>> {
        self.files.get(id).map(|entry| entry.value().clone())
    }

    /// The file `file` was derived from, absent for sources.
    pub fn parent_of(&self, file: &File) -> Option<Arc<File>> {
        file.parent_id().and_then(|id| self.file(id))
    }

    /// Every file derived from `id` so far.
    pub fn derived_of(&self, id: &Id) -> Result<Vec<Arc<File>>, GraphError> {
        let file = self.file(id).ok_or_else(|| GraphError::UnknownFile(id.clone()))?;

        Ok(file
            .derived_ids()
            .into_iter()
            .filter_map(|id| self.file(&id))
            .collect())
    }

    /// Snapshot of every file currently in the registry.
    pub fn files(&self) -> Vec<Arc<File>> {
        self.files.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn sources(&self) -> Vec<Arc<File>> {
        self.files
            .iter()
            .filter(|entry| entry.value().is_source())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Create a directory with no parent.
    pub fn create_root(&self, name: impl Into<String>) -> Arc<Directory> {
        let dir = Arc::new(Directory::new(
            self.ids.generate(),
            name.into(),
            Metadata::new(),
            None,
        ));
        self.dirs.insert(dir.id.clone(), dir.clone());
        dir
    }

    /// Create a directory as a child of `parent`.
    pub fn create_dir(
        &self,
        parent: &Id,
        name: impl Into<String>,
    ) -> Result<Arc<Directory>, GraphError> {
        let parent = self
            .dirs
            .get(parent)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GraphError::UnknownDirectory(parent.clone()))?;

        let dir = Arc::new(Directory::new(
            self.ids.generate(),
            name.into(),
            Metadata::new(),
            Some(parent.id.clone()),
        ));

        self.dirs.insert(dir.id.clone(), dir.clone());
        parent.dirs.insert(dir.id.clone());

        Ok(dir)
    }

    /// Record that `file` is contained in `dir`.
    pub fn add_file(&self, dir: &Id, file: &Id) -> Result<(), GraphError> {
        let dir = self
            .dirs
            .get(dir)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GraphError::UnknownDirectory(dir.clone()))?;

        if !self.files.contains_key(file) {
            return Err(GraphError::UnknownFile(file.clone()));
        }

        dir.files.insert(file.clone());
        Ok(())
    }

    pub fn directory(&self, id: &Id) -> Option<Arc<Directory>> {
        self.dirs.get(id).map(|entry| entry.value().clone())
    }

    pub fn directories(&self) -> Vec<Arc<Directory>> {
        self.dirs.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn roots(&self) -> Vec<Arc<Directory>> {
        self.dirs
            .iter()
            .filter(|entry| entry.value().is_root())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// The virtual path of a directory, from its root down.
    pub fn path_of(&self, dir: &Id) -> Result<Utf8PathBuf, GraphError> {
        let mut segments = Vec::new();
        let mut current = self
            .directory(dir)
            .ok_or_else(|| GraphError::UnknownDirectory(dir.clone()))?;

        segments.push(current.name.clone());

        while let Some(parent) = current.parent_id().cloned() {
            current = self
                .directory(&parent)
                .ok_or_else(|| GraphError::UnknownDirectory(parent.clone()))?;
            segments.push(current.name.clone());
        }

        Ok(segments.iter().rev().collect())
    }

    /// Insert a file that already has an id, relinking the parent edge.
    /// Used when rebuilding a graph from its wire form.
    pub(crate) fn restore_file(
        &self,
        id: Id,
        name: String,
        kind: FileKind,
        metadata: Metadata,
    ) -> Result<Arc<File>, GraphError> {
        if let FileKind::Derived { parent } = &kind {
            let parent = self
                .files
                .get(parent)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| GraphError::UnknownFile(parent.clone()))?;
            parent.add_derived(id.clone());
        }

        let file = Arc::new(File::new(id, name, kind, metadata));
        self.files.insert(file.id.clone(), file.clone());
        Ok(file)
    }

    /// Directory counterpart of [`Filesystem::restore_file`].
    pub(crate) fn restore_dir(
        &self,
        id: Id,
        name: String,
        metadata: Metadata,
        parent: Option<Id>,
    ) -> Result<Arc<Directory>, GraphError> {
        if let Some(parent) = &parent {
            let parent = self
                .dirs
                .get(parent)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| GraphError::UnknownDirectory(parent.clone()))?;
            parent.dirs.insert(id.clone());
        }

        let dir = Arc::new(Directory::new(id, name, metadata, parent));
        self.dirs.insert(dir.id.clone(), dir.clone());
        Ok(dir)
    }

    pub(crate) fn contains_file(&self, id: &Id) -> bool {
        self.files.contains_key(id)
    }

    pub(crate) fn link_file(&self, dir: &Arc<Directory>, file: Id) {
        dir.files.insert(file);
    }
}
