#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod context;
mod engine;
mod error;
mod id;
#[cfg(feature = "logging")]
pub mod logging;
mod metadata;
mod process;
pub mod serial;
mod vfs;

pub use crate::config::{EngineConfig, IdConfig};
pub use crate::context::TaskContext;
pub use crate::engine::{CancelToken, Engine, FailureCause, RunResult, RunState, TaskFailure};
pub use crate::error::*;
pub use crate::id::{Id, IdGenerator};
pub use crate::metadata::Metadata;
pub use crate::process::{Process, ProcessBuilder, Step, StepBuilder, Task};
pub use crate::serial::TaskRegistry;
pub use crate::vfs::{Directory, File, FileKind, Filesystem};
