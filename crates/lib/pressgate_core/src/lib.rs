//! # pressgate_core
//!
//! Entitlement core for Pressgate: who is signed in, what they pay for, and
//! whether they may read the next article.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod session;
pub mod store;
pub mod subscription;
pub mod uuid;

pub use context::{Collaborators, EntitlementContext};
pub use error::GateError;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
