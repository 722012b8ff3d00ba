//! Errors surfaced across the registry boundary.

/// Errors that can occur when resolving or executing a hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// No hook with the given name is registered.
    #[error("hook not found: {0}")]
    NotFound(String),

    /// The hook exists but is not registered for the given trigger.
    #[error("hook '{hook}' is not registered for trigger '{trigger}'")]
    TriggerMismatch {
        /// The hook name.
        hook: String,
        /// The trigger that was requested.
        trigger: String,
    },

    /// The hook is registered but currently disabled.
    #[error("hook '{0}' is disabled")]
    Disabled(String),

    /// The hook's business logic failed.
    #[error("execution error: {0}")]
    ExecutionError(String),
}
