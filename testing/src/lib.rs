//! Shared test doubles for the workspace.
//!
//! Provides an in-memory knowledge client that records every upload, attach
//! and detach, and a canned-snapshot adapter, so the reconciler can be
//! exercised without a live downstream or upstream.

mod fixtures;

pub use fixtures::*;
