//! The wire boundary for pipeline definitions and filesystem graphs.
//!
//! Entities go on the wire as one JSON object per entity with `id`, `name`
//! and `metadata` fields. Relations that are cyclic in memory are written in
//! the owning direction only: a file carries its derivation subtree and a
//! directory carries its child directories, while the back references are
//! re-established from the nesting when reading.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::TaskContext;
use crate::error::{SerialError, TaskResult};
use crate::id::{Id, IdGenerator};
use crate::metadata::Metadata;
use crate::process::{Action, Process, Step, Task};
use crate::vfs::{Directory, File, FileKind, Filesystem};

/// Maps task names to implementations when decoding a pipeline definition.
///
/// Task bodies are code and never travel over the wire; a decoded definition
/// is rebound against a registry populated by the caller.
#[derive(Default)]
pub struct TaskRegistry {
    actions: HashMap<String, Action>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: Fn(&TaskContext) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
    }

    fn get(&self, name: &str) -> Option<Action> {
        self.actions.get(name).cloned()
    }
}

#[derive(Serialize, Deserialize)]
struct ProcessDto {
    id: Id,
    name: String,
    steps: Vec<StepDto>,
}

#[derive(Serialize, Deserialize)]
struct StepDto {
    id: Id,
    name: String,
    tasks: Vec<TaskDto>,
}

#[derive(Serialize, Deserialize)]
struct TaskDto {
    id: Id,
    name: String,
}

/// Encode a pipeline definition as pretty-printed JSON.
pub fn encode_process(process: &Process) -> Result<String, SerialError> {
    let dto = ProcessDto {
        id: process.id().clone(),
        name: process.name().to_string(),
        steps: process
            .steps()
            .iter()
            .map(|step| StepDto {
                id: step.id().clone(),
                name: step.name().to_string(),
                tasks: step
                    .tasks()
                    .iter()
                    .map(|task| TaskDto {
                        id: task.id().clone(),
                        name: task.name().to_string(),
                    })
                    .collect(),
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&dto)?)
}

/// Decode a pipeline definition, binding each task to its implementation.
///
/// Step order is preserved exactly as written. A task name with no entry in
/// `registry` fails the decode; the run never starts.
pub fn decode_process(json: &str, registry: &TaskRegistry) -> Result<Process, SerialError> {
    let dto: ProcessDto = serde_json::from_str(json)?;

    let steps = dto
        .steps
        .into_iter()
        .map(|step| {
            let tasks = step
                .tasks
                .into_iter()
                .map(|task| {
                    let action = registry
                        .get(&task.name)
                        .ok_or_else(|| SerialError::UnknownTask(task.name.clone()))?;
                    Ok(Task::from_parts(task.id, task.name, action))
                })
                .collect::<Result<Vec<_>, SerialError>>()?;

            Ok(Step::from_parts(step.id, step.name, tasks))
        })
        .collect::<Result<Vec<_>, SerialError>>()?;

    Ok(Process::from_parts(dto.id, dto.name, steps))
}

#[derive(Serialize, Deserialize)]
struct FileDto {
    id: Id,
    name: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    derived: Vec<FileDto>,
}

#[derive(Serialize, Deserialize)]
struct DirDto {
    id: Id,
    name: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dirs: Vec<DirDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    files: Vec<Id>,
}

#[derive(Serialize, Deserialize)]
struct GraphDto {
    sources: Vec<FileDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    roots: Vec<DirDto>,
}

/// Encode a filesystem graph as pretty-printed JSON.
///
/// Output is deterministic: sources, roots and every derived/child list are
/// ordered by id.
pub fn encode_filesystem(fs: &Filesystem) -> Result<String, SerialError> {
    let mut sources = fs.sources();
    sources.sort_by(|a, b| a.id().cmp(b.id()));

    let mut roots = fs.roots();
    roots.sort_by(|a, b| a.id().cmp(b.id()));

    let dto = GraphDto {
        sources: sources.iter().map(|file| file_dto(fs, file)).collect(),
        roots: roots.iter().map(|dir| dir_dto(fs, dir)).collect(),
    };

    Ok(serde_json::to_string_pretty(&dto)?)
}

fn file_dto(fs: &Filesystem, file: &Arc<File>) -> FileDto {
    let mut derived: Vec<Arc<File>> = file
        .derived_ids()
        .into_iter()
        .filter_map(|id| fs.file(&id))
        .collect();
    derived.sort_by(|a, b| a.id().cmp(b.id()));

    FileDto {
        id: file.id().clone(),
        name: file.name().to_string(),
        metadata: file.metadata().clone(),
        derived: derived.iter().map(|child| file_dto(fs, child)).collect(),
    }
}

fn dir_dto(fs: &Filesystem, dir: &Arc<Directory>) -> DirDto {
    let mut dirs: Vec<_> = dir
        .dir_ids()
        .into_iter()
        .filter_map(|id| fs.directory(&id))
        .collect();
    dirs.sort_by(|a, b| a.id().cmp(b.id()));

    let mut files = dir.file_ids();
    files.sort();

    DirDto {
        id: dir.id().clone(),
        name: dir.name().to_string(),
        metadata: dir.metadata().clone(),
        dirs: dirs.iter().map(|child| dir_dto(fs, child)).collect(),
        files,
    }
}

/// Decode a filesystem graph, rebuilding both directions of every edge from
/// the owning direction on the wire.
pub fn decode_filesystem(json: &str) -> Result<Filesystem, SerialError> {
    decode_filesystem_with(json, IdGenerator::default())
}

/// Like [`decode_filesystem`], with a custom generator for ids minted after
/// the decode.
pub fn decode_filesystem_with(
    json: &str,
    ids: IdGenerator,
) -> Result<Filesystem, SerialError> {
    let dto: GraphDto = serde_json::from_str(json)?;
    let fs = Filesystem::with_ids(ids);
    let mut seen = HashSet::new();

    for source in dto.sources {
        restore_file_tree(&fs, source, None, &mut seen)?;
    }

    for root in dto.roots {
        restore_dir_tree(&fs, root, None, &mut seen)?;
    }

    Ok(fs)
}

fn restore_file_tree(
    fs: &Filesystem,
    dto: FileDto,
    parent: Option<Id>,
    seen: &mut HashSet<Id>,
) -> Result<(), SerialError> {
    if !seen.insert(dto.id.clone()) {
        return Err(SerialError::DuplicateId(dto.id));
    }

    let kind = match parent {
        None => FileKind::Source,
        Some(parent) => FileKind::Derived { parent },
    };

    // The parent is always restored before its subtree, so the edge relink
    // inside restore_file cannot fail here.
    fs.restore_file(dto.id.clone(), dto.name, kind, dto.metadata)?;

    for child in dto.derived {
        restore_file_tree(fs, child, Some(dto.id.clone()), seen)?;
    }

    Ok(())
}

fn restore_dir_tree(
    fs: &Filesystem,
    dto: DirDto,
    parent: Option<Id>,
    seen: &mut HashSet<Id>,
) -> Result<(), SerialError> {
    if !seen.insert(dto.id.clone()) {
        return Err(SerialError::DuplicateId(dto.id));
    }

    let dir = fs.restore_dir(dto.id.clone(), dto.name, dto.metadata, parent)?;

    for file in dto.files {
        if !fs.contains_file(&file) {
            return Err(SerialError::DanglingFile(dto.id.clone(), file));
        }
        fs.link_file(&dir, file);
    }

    for child in dto.dirs {
        restore_dir_tree(fs, child, Some(dto.id.clone()), seen)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn sample_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register("probe", |_| Ok(()));
        registry.register("resample", |_| Ok(()));
        registry.register("tag", |_| Ok(()));
        registry
    }

    #[test]
    fn process_round_trip_preserves_order_and_membership() {
        let process = Process::builder("refine")
            .step(
                Step::builder("extract")
                    .task("probe", |_| Ok(()))
                    .task("tag", |_| Ok(())),
            )
            .step(Step::builder("convert").task("resample", |_| Ok(())))
            .finish();

        let json = encode_process(&process).unwrap();
        let back = decode_process(&json, &sample_registry()).unwrap();

        assert_eq!(back.id(), process.id());
        assert_eq!(back.name(), process.name());

        let step_names: Vec<_> = back.steps().iter().map(Step::name).collect();
        assert_eq!(step_names, ["extract", "convert"]);

        for (original, decoded) in process.steps().iter().zip(back.steps()) {
            assert_eq!(original.id(), decoded.id());

            let original_tasks: HashSet<_> =
                original.tasks().iter().map(|t| t.name().to_string()).collect();
            let decoded_tasks: HashSet<_> =
                decoded.tasks().iter().map(|t| t.name().to_string()).collect();
            assert_eq!(original_tasks, decoded_tasks);
        }
    }

    #[test]
    fn decoding_an_unknown_task_fails() {
        let process = Process::builder("refine")
            .step(Step::builder("extract").task("mystery", |_| Ok(())))
            .finish();

        let json = encode_process(&process).unwrap();
        let result = decode_process(&json, &sample_registry());

        assert!(matches!(result, Err(SerialError::UnknownTask(name)) if name == "mystery"));
    }

    #[test]
    fn malformed_json_is_surfaced() {
        assert!(matches!(
            decode_process("{", &sample_registry()),
            Err(SerialError::Json(_))
        ));
        assert!(matches!(
            decode_filesystem(r#"{"sources": [{"name": "no-id"}]}"#),
            Err(SerialError::Json(_))
        ));
    }

    #[test]
    fn graph_round_trip_restores_both_edge_directions() {
        let fs = Filesystem::new();
        let source = fs.create_source("a.txt");
        source.metadata().insert("origin", "upload");

        let d1 = fs.create_derived(source.id(), "a.norm").unwrap();
        let d2 = fs.create_derived(source.id(), "a.stats").unwrap();
        let grandchild = fs.create_derived(d1.id(), "a.norm.idx").unwrap();
        grandchild.metadata().insert("entries", 7);

        let root = fs.create_root("work");
        let sub = fs.create_dir(root.id(), "out").unwrap();
        fs.add_file(sub.id(), d1.id()).unwrap();

        let json = encode_filesystem(&fs).unwrap();
        let back = decode_filesystem(&json).unwrap();

        assert_eq!(back.file_count(), 4);

        let source_back = back.file(source.id()).unwrap();
        assert!(source_back.is_source());
        assert_eq!(
            source_back.metadata().get("origin"),
            Some(serde_json::Value::from("upload"))
        );

        // Forward direction, rebuilt from nesting.
        let mut derived: Vec<_> = source_back.derived_ids();
        derived.sort();
        let mut expected = vec![d1.id().clone(), d2.id().clone()];
        expected.sort();
        assert_eq!(derived, expected);

        // Back references, absent on the wire.
        let d1_back = back.file(d1.id()).unwrap();
        assert_eq!(d1_back.parent_id(), Some(source.id()));
        let grandchild_back = back.file(grandchild.id()).unwrap();
        assert_eq!(grandchild_back.parent_id(), Some(d1.id()));
        assert_eq!(
            grandchild_back.metadata().get("entries"),
            Some(serde_json::Value::from(7))
        );

        // Directory tree, both directions.
        let root_back = back.directory(root.id()).unwrap();
        assert!(root_back.is_root());
        assert_eq!(root_back.dir_ids(), vec![sub.id().clone()]);
        let sub_back = back.directory(sub.id()).unwrap();
        assert_eq!(sub_back.parent_id(), Some(root.id()));
        assert_eq!(sub_back.file_ids(), vec![d1.id().clone()]);
    }

    #[test]
    fn wire_form_omits_back_references() {
        let fs = Filesystem::new();
        let source = fs.create_source("a.txt");
        fs.create_derived(source.id(), "a.norm").unwrap();

        let json = encode_filesystem(&fs).unwrap();

        assert!(json.contains("\"derived\""));
        assert!(!json.contains("\"parent\""));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let json = r#"{
            "sources": [
                {"id": "same", "name": "a.txt"},
                {"id": "same", "name": "b.txt"}
            ]
        }"#;

        assert!(matches!(
            decode_filesystem(json),
            Err(SerialError::DuplicateId(_))
        ));
    }

    #[test]
    fn dangling_directory_file_reference_is_rejected() {
        let json = r#"{
            "sources": [],
            "roots": [{"id": "d1", "name": "work", "files": ["ghost"]}]
        }"#;

        assert!(matches!(
            decode_filesystem(json),
            Err(SerialError::DanglingFile(dir, file))
                if dir.as_str() == "d1" && file.as_str() == "ghost"
        ));
    }
}
