//! Registry trait, execution context, and the in-memory registry.
//!
//! The [`HookRegistry`] trait is the boundary the scheduler talks to. It
//! deliberately stays narrow: metadata lookup, dispatch, and result
//! reporting. Optional capabilities such as resource declarations live on
//! separate traits ([`ResourceAware`]) so the scheduler can check for them
//! at construction time instead of probing collaborators per call.

use core::any::Any;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::HookError;
use crate::hook::{HookMetadata, HookState, ResourceRequest};

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionId
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque identifier for one hook execution, minted by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Creates an execution ID from a raw string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HookContext
// ─────────────────────────────────────────────────────────────────────────────

/// Shared keyed state passed to every hook in a trigger group.
///
/// The context is the only sanctioned channel for hooks to exchange state
/// during an execution. Values are type-erased and shared; cloning the
/// context is cheap and clones see the same underlying store.
///
/// # Example
///
/// ```
/// use altair_hooks::registry::HookContext;
///
/// let ctx = HookContext::new();
/// ctx.insert("attempt", 3u32);
/// assert_eq!(ctx.get::<u32>("attempt").as_deref(), Some(&3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    values: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl HookContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under the given key, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.write().insert(key.into(), Arc::new(value));
    }

    /// Fetches the value under the given key, if present and of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let guard = self.values.read();
        let value = guard.get(key)?.clone();
        drop(guard);
        value.downcast::<T>().ok()
    }

    /// Returns true if a value is stored under the given key.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if the context holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HookRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// The registry boundary consumed by the scheduler.
///
/// Implementations own hook definitions and the side effects hooks perform.
/// The scheduler only reads metadata snapshots, dispatches executions, and
/// reports results back.
pub trait HookRegistry: Send + Sync {
    /// Returns a metadata snapshot for the named hook.
    fn get(&self, name: &str) -> Option<HookMetadata>;

    /// Names of all registered hooks.
    fn hook_names(&self) -> Vec<String>;

    /// Names of hooks registered for the given trigger.
    fn hooks_for_trigger(&self, trigger: &str) -> Vec<String>;

    /// Runs the named hook's business logic for a trigger occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] if the hook is unknown, disabled, not
    /// registered for the trigger, or fails during execution.
    fn execute_hook<'a>(
        &'a self,
        name: &'a str,
        trigger: &'a str,
        ctx: HookContext,
    ) -> BoxFuture<'a, Result<ExecutionId, HookError>>;

    /// Reports one completed execution back to the registry.
    ///
    /// Updates the hook's counters and rolling average execution time.
    /// Unknown names are ignored.
    fn record_result(&self, name: &str, success: bool, duration: Duration);
}

/// Optional capability for registries that can declare per-hook resource
/// requirements.
///
/// The scheduler checks for this interface once at construction. Registries
/// that do not implement it get default requirements for every hook.
pub trait ResourceAware {
    /// Declared resource requirements for the named hook, if any.
    fn resource_request(&self, hook: &str) -> Option<ResourceRequest>;
}

// ─────────────────────────────────────────────────────────────────────────────
// InMemoryRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Handler invoked when a hook executes.
pub type HookHandler =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

struct Entry {
    metadata: HookMetadata,
    handler: HookHandler,
    request: Option<ResourceRequest>,
}

/// A registry holding hooks and their handlers in process memory.
///
/// Suitable for embedding the scheduler directly and as the registry used
/// throughout the test suites.
///
/// # Example
///
/// ```
/// use altair_hooks::hook::HookMetadata;
/// use altair_hooks::registry::InMemoryRegistry;
///
/// let registry = InMemoryRegistry::new();
/// registry.register(HookMetadata::new("audit", 2).with_trigger("on_save"), |_ctx| {
///     Box::pin(async { Ok(()) })
/// });
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    next_execution: AtomicU64,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook with its handler, replacing any previous entry
    /// under the same name.
    pub fn register<F>(&self, metadata: HookMetadata, handler: F)
    where
        F: Fn(HookContext) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync + 'static,
    {
        let name = metadata.name.clone();
        self.entries.write().insert(
            name,
            Entry {
                metadata,
                handler: Arc::new(handler),
                request: None,
            },
        );
    }

    /// Registers a hook with a declared resource requirement.
    pub fn register_with_request<F>(
        &self,
        metadata: HookMetadata,
        request: ResourceRequest,
        handler: F,
    ) where
        F: Fn(HookContext) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync + 'static,
    {
        let name = metadata.name.clone();
        self.entries.write().insert(
            name,
            Entry {
                metadata,
                handler: Arc::new(handler),
                request: Some(request),
            },
        );
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl HookRegistry for InMemoryRegistry {
    fn get(&self, name: &str) -> Option<HookMetadata> {
        self.entries.read().get(name).map(|e| e.metadata.clone())
    }

    fn hook_names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn hooks_for_trigger(&self, trigger: &str) -> Vec<String> {
        self.entries
            .read()
            .values()
            .filter(|e| e.metadata.triggers.contains(trigger))
            .map(|e| e.metadata.name.clone())
            .collect()
    }

    fn execute_hook<'a>(
        &'a self,
        name: &'a str,
        trigger: &'a str,
        ctx: HookContext,
    ) -> BoxFuture<'a, Result<ExecutionId, HookError>> {
        // Resolve the handler under the lock, run it outside.
        let resolved = {
            let guard = self.entries.read();
            match guard.get(name) {
                None => Err(HookError::NotFound(name.to_string())),
                Some(entry) if entry.metadata.state == HookState::Disabled => {
                    Err(HookError::Disabled(name.to_string()))
                }
                Some(entry)
                    if !entry.metadata.triggers.is_empty()
                        && !entry.metadata.triggers.contains(trigger) =>
                {
                    Err(HookError::TriggerMismatch {
                        hook: name.to_string(),
                        trigger: trigger.to_string(),
                    })
                }
                Some(entry) => Ok(entry.handler.clone()),
            }
        };

        Box::pin(async move {
            let handler = resolved?;
            handler(ctx).await?;
            let id = self.next_execution.fetch_add(1, Ordering::Relaxed);
            Ok(ExecutionId::new(format!("exec_{id}")))
        })
    }

    fn record_result(&self, name: &str, success: bool, duration: Duration) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.metadata.record_execution(success, duration);
        }
    }
}

impl ResourceAware for InMemoryRegistry {
    fn resource_request(&self, hook: &str) -> Option<ResourceRequest> {
        self.entries.read().get(hook).and_then(|e| e.request.clone())
    }
}
