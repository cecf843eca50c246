//! Graph Execution Engine (C4): validated, acyclic state machines of pure
//! node functions over a shared [`state::ExecutionState`] (§4.2, §4.4).

pub mod builder;
pub mod node;
pub mod state;
pub mod validate;

pub use builder::{CompiledGraph, EdgeTarget, GraphBuilder, StopReason};
pub use node::{FnNode, Node, NodeError, NodeResult, RetryPolicy};
pub use state::{Citation, Constraints, ErrorRecord, Exchange, ExecutionState, NodePayload, QualityTier, SearchResult};
pub use validate::{validate, GraphValidationResult, ValidationWarning};
