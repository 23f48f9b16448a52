//! Error types for ID and role name parsing.

use thiserror::Error;

/// Errors that can occur when parsing a typed ID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The input string was empty.
    #[error("ID is empty")]
    Empty,

    /// The input contained whitespace or control characters.
    #[error("ID contains invalid characters: {0:?}")]
    InvalidCharacters(String),
}

/// Errors that can occur when parsing a role name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    /// The input string was empty.
    #[error("role name is empty")]
    Empty,

    /// A path component was empty (leading, trailing, or doubled slash).
    #[error("role name {0:?} has an empty path component")]
    EmptyComponent(String),

    /// A path component was one of the reserved names `.` or `..`.
    #[error("role name {0:?} has a reserved path component")]
    ReservedComponent(String),

    /// The name contained whitespace, control characters, or a backslash.
    #[error("role name {0:?} contains invalid characters")]
    InvalidCharacters(String),

    /// `*` may only appear as the entire role name, never as a component.
    #[error("role name {0:?} embeds the default role marker")]
    EmbeddedDefaultRole(String),
}
