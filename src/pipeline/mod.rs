//! Compiled mapping pipelines: expressions, transforms, conditions, and the
//! tool and action interpreters.

pub mod actions;
pub mod condition;
pub mod filter;
mod graph;
mod mapping;
pub mod source;
pub mod template;
pub mod tools;
pub mod transform;

pub use graph::{ActionBody, ActionStep, StepGraph, StepNode, ToolStep};
pub use mapping::Mapping;

pub(crate) fn yes() -> bool {
    true
}
