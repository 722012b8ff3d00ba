//! A priority-aware hook execution scheduler for Rust.
//!

pub use altair_hooks;
pub use altair_sched;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use altair_hooks::prelude::*;
    pub use altair_sched::prelude::*;
}
