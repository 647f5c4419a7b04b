use std::fmt;
use std::sync::Arc;

use crate::context::TaskContext;
use crate::error::TaskResult;
use crate::id::{Id, IdGenerator};

/// Task function pointer executed during a step. This function is provided
/// by the user from the userland, but it is invoked internally by the engine
/// while the step runs.
pub(crate) type Action = Arc<dyn Fn(&TaskContext) -> TaskResult<()> + Send + Sync>;

/// A named, ordered pipeline of [`Step`]s applied to a source file.
///
/// The declaration order of the steps is the execution order, preserved
/// exactly. A process is immutable once built.
pub struct Process {
    id: Id,
    name: String,
    steps: Vec<Step>,
}

impl Process {
    pub fn builder(name: impl Into<String>) -> ProcessBuilder {
        ProcessBuilder {
            name: name.into(),
            ids: IdGenerator::default(),
            steps: Vec::new(),
        }
    }

    pub(crate) fn from_parts(id: Id, name: String, steps: Vec<Step>) -> Self {
        Self { id, name, steps }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The steps in declaration order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish()
    }
}

/// One serial stage of a [`Process`].
///
/// The tasks of a step are an unordered set: the engine dispatches them
/// concurrently and neither the engine nor the tasks themselves may rely on
/// any ordering among siblings.
pub struct Step {
    id: Id,
    name: String,
    tasks: Vec<Task>,
}

impl Step {
    pub fn builder(name: impl Into<String>) -> StepBuilder {
        StepBuilder {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub(crate) fn from_parts(id: Id, name: String, tasks: Vec<Task>) -> Self {
        Self { id, name, tasks }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tasks of this step, in no meaningful order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tasks", &self.tasks)
            .finish()
    }
}

/// A unit of work within a [`Step`].
///
/// A task consumes the step's input snapshot through a [`TaskContext`] and
/// may emit derived files and metadata. The name is mainly used in logging
/// and failure reports.
pub struct Task {
    id: Id,
    name: String,
    action: Action,
}

impl Task {
    pub(crate) fn from_parts(id: Id, name: String, action: Action) -> Self {
        Self { id, name, action }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn action(&self) -> Action {
        self.action.clone()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({}, {})", self.id, self.name)
    }
}

/// A builder struct for assembling a [`Process`] out of steps and tasks.
///
/// Entity ids are minted when [`ProcessBuilder::finish`] is called, from the
/// builder's [`IdGenerator`].
pub struct ProcessBuilder {
    name: String,
    ids: IdGenerator,
    steps: Vec<StepBuilder>,
}

impl ProcessBuilder {
    /// Replace the generator used to mint entity ids.
    pub fn ids(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Append a step; steps run in the order they are added.
    pub fn step(mut self, step: StepBuilder) -> Self {
        self.steps.push(step);
        self
    }

    pub fn finish(self) -> Process {
        let ids = self.ids;

        let steps = self
            .steps
            .into_iter()
            .map(|step| {
                let tasks = step
                    .tasks
                    .into_iter()
                    .map(|(name, action)| Task::from_parts(ids.generate(), name, action))
                    .collect();

                Step::from_parts(ids.generate(), step.name, tasks)
            })
            .collect();

        Process::from_parts(ids.generate(), self.name, steps)
    }
}

/// Builder for a single [`Step`].
pub struct StepBuilder {
    name: String,
    tasks: Vec<(String, Action)>,
}

impl StepBuilder {
    /// Add a task to this step's unordered task set.
    pub fn task<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&TaskContext) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.tasks.push((name.into(), Arc::new(action)));
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn builder_preserves_step_order() {
        let process = Process::builder("refine")
            .step(Step::builder("extract").task("probe", |_| Ok(())))
            .step(Step::builder("convert").task("resample", |_| Ok(())))
            .step(Step::builder("annotate").task("tag", |_| Ok(())))
            .finish();

        let names: Vec<_> = process.steps().iter().map(Step::name).collect();
        assert_eq!(names, ["extract", "convert", "annotate"]);
    }

    #[test]
    fn every_entity_gets_a_distinct_id() {
        let process = Process::builder("refine")
            .step(
                Step::builder("extract")
                    .task("a", |_| Ok(()))
                    .task("b", |_| Ok(())),
            )
            .step(Step::builder("convert").task("c", |_| Ok(())))
            .finish();

        let mut ids = HashSet::new();
        ids.insert(process.id().clone());

        for step in process.steps() {
            ids.insert(step.id().clone());
            for task in step.tasks() {
                ids.insert(task.id().clone());
            }
        }

        // 1 process + 2 steps + 3 tasks
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn custom_id_generator_is_used_for_all_entities() {
        let ids = IdGenerator::new(&crate::config::IdConfig {
            alphabet: Some("x".to_string()),
            length: Some(4),
        });

        let process = Process::builder("refine")
            .ids(ids)
            .step(Step::builder("only").task("noop", |_| Ok(())))
            .finish();

        assert_eq!(process.id().as_str(), "xxxx");
        assert_eq!(process.steps()[0].tasks()[0].id().as_str(), "xxxx");
    }
}
