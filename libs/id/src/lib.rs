//! # fairshare-id
//!
//! Typed identifiers and role names for the fairshare allocator.
//!
//! ## Design Principles
//!
//! - Framework and agent identifiers are assigned by the master and opaque
//!   to the allocator; the types here wrap the assigned value without
//!   interpreting it
//! - Identifiers are typed to prevent mixing different entity kinds
//! - `new()` mints fresh `{prefix}_{ulid}` values for callers that own the
//!   namespace (masters, tests)
//! - Role names are validated hierarchical paths with strict parsing
//!
//! ## Role Names
//!
//! Roles form a slash-delimited hierarchy: `engineering/backend/ci` is a
//! descendant of `engineering/backend` and `engineering`. Quota may only be
//! attached to top-level roles; reservations aggregate up the ancestor
//! chain. The reserved name `*` denotes the default role.

mod error;
mod macros;
mod role;
mod types;

pub use error::{IdError, RoleError};
pub use role::RoleName;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
