//! Hook metadata primitives for Altair (Layer 1).
//!
//! `altair_hooks` defines the read-only boundary between the scheduler and
//! the hook registry that owns hook definitions. The scheduler consumes
//! metadata snapshots and dispatches execution through the [`HookRegistry`]
//! trait; it never mutates hook definitions directly.
//!
//! # Core Concepts
//!
//! - [`HookMetadata`] - Declared properties of a registered hook
//! - [`ExecutionPhase`] - Ordered coarse-grained scheduling stage
//! - [`IsolationLevel`] - Whether a hook may co-occupy a batch
//! - [`HookRegistry`] - Metadata lookup and hook dispatch boundary
//! - [`ResourceAware`] - Optional capability for declaring resource needs
//! - [`InMemoryRegistry`] - Concrete registry for embedding and tests
//!
//! # Architecture
//!
//! This crate is Layer 1 of the Altair architecture:
//!
//! - **Layer 1** (`altair_hooks`): Hook model and registry boundary (this crate)
//! - **Layer 2** (`altair_sched`): Priority scheduling and batch execution

/// Hook errors surfaced across the registry boundary.
pub mod error;

/// Hook metadata, phases, and isolation levels.
pub mod hook;

/// Registry trait, execution context, and the in-memory registry.
pub mod registry;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::error::HookError;
    pub use crate::hook::{
        ExecutionPhase, HookMetadata, HookState, IsolationLevel, ResourceRequest,
    };
    pub use crate::registry::{
        BoxFuture, ExecutionId, HookContext, HookRegistry, InMemoryRegistry, ResourceAware,
    };
}

pub use error::HookError;
pub use hook::{ExecutionPhase, HookMetadata, HookState, IsolationLevel, ResourceRequest};
pub use registry::{BoxFuture, ExecutionId, HookContext, HookRegistry, InMemoryRegistry, ResourceAware};
