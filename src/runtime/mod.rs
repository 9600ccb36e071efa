mod context;
mod deferred;
mod runner;
mod walker;

pub use context::{CurrentNode, DeferredRelationship, ExecutionContext, GraphState, NodeSpec, SkipFlags, StepOutcome};
pub use walker::Walker;
