//! ORM session re-exports.
//!
//! `minorm::Session` is the identity map + unit-of-work session with explicit
//! lazy relationship fetching.
//!
//! The implementation lives in the separate `minorm-session` crate. This module
//! exists so the facade can expose the session without forcing users to depend
//! on sub-crates directly.

pub use minorm_session::{
    FetchStats, FetchTracker, ObjectKey, ObjectState, Session, SessionConfig, SessionDebugInfo,
};
