//! Hierarchical role names.
//!
//! A role identifies a workload bucket. Roles are arranged in a tree via
//! slash-delimited names: `ads/batch` is a child of `ads`. Quota is only
//! meaningful on top-level roles, while reservations made to any role are
//! accounted against every ancestor up to the top level.

use std::fmt;

use crate::RoleError;

/// A validated, slash-delimited hierarchical role name.
///
/// The special name `*` is the default role: flat, never hierarchical, and
/// not reservable in practice (reservation lookups for `*` yield nothing).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoleName(String);

impl RoleName {
    /// The default role.
    pub const DEFAULT: &'static str = "*";

    /// Parses and validates a role name.
    pub fn parse(s: &str) -> Result<Self, RoleError> {
        if s.is_empty() {
            return Err(RoleError::Empty);
        }

        if s == Self::DEFAULT {
            return Ok(Self(s.to_string()));
        }

        if s.chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '\\')
        {
            return Err(RoleError::InvalidCharacters(s.to_string()));
        }

        for component in s.split('/') {
            match component {
                "" => return Err(RoleError::EmptyComponent(s.to_string())),
                "." | ".." => return Err(RoleError::ReservedComponent(s.to_string())),
                Self::DEFAULT => return Err(RoleError::EmbeddedDefaultRole(s.to_string())),
                _ => {}
            }
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the default role `*`.
    #[must_use]
    pub fn default_role() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Returns the role name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the default role `*`.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// Returns true if the role has ancestors (contains a `/`).
    #[must_use]
    pub fn is_hierarchical(&self) -> bool {
        self.0.contains('/')
    }

    /// Returns the top-level ancestor (the role itself when already
    /// top-level).
    #[must_use]
    pub fn top_level(&self) -> RoleName {
        match self.0.find('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => self.clone(),
        }
    }

    /// Returns the ancestors of this role, nearest first.
    ///
    /// `a/b/c` yields `a/b` then `a`; a top-level role yields nothing.
    pub fn ancestors(&self) -> impl Iterator<Item = RoleName> + '_ {
        let name = &self.0;
        name.char_indices()
            .rev()
            .filter(|&(_, c)| c == '/')
            .map(move |(idx, _)| RoleName(name[..idx].to_string()))
    }

    /// Returns true if `self` is `other` or one of its ancestors.
    #[must_use]
    pub fn is_role_or_ancestor_of(&self, other: &RoleName) -> bool {
        self == other || other.ancestors().any(|a| a == *self)
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RoleName {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for RoleName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for RoleName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn role(s: &str) -> RoleName {
        RoleName::parse(s).unwrap()
    }

    #[test]
    fn test_parse_valid_names() {
        assert!(RoleName::parse("ads").is_ok());
        assert!(RoleName::parse("ads/batch").is_ok());
        assert!(RoleName::parse("a/b/c").is_ok());
        assert!(RoleName::parse("*").is_ok());
    }

    #[test]
    fn test_parse_invalid_names() {
        assert_eq!(RoleName::parse(""), Err(RoleError::Empty));
        assert!(matches!(
            RoleName::parse("/ads"),
            Err(RoleError::EmptyComponent(_))
        ));
        assert!(matches!(
            RoleName::parse("ads/"),
            Err(RoleError::EmptyComponent(_))
        ));
        assert!(matches!(
            RoleName::parse("a//b"),
            Err(RoleError::EmptyComponent(_))
        ));
        assert!(matches!(
            RoleName::parse("a/../b"),
            Err(RoleError::ReservedComponent(_))
        ));
        assert!(matches!(
            RoleName::parse("a/*"),
            Err(RoleError::EmbeddedDefaultRole(_))
        ));
        assert!(matches!(
            RoleName::parse("a b"),
            Err(RoleError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn test_top_level() {
        assert_eq!(role("a/b/c").top_level(), role("a"));
        assert_eq!(role("a").top_level(), role("a"));
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let ancestors: Vec<_> = role("a/b/c").ancestors().collect();
        assert_eq!(ancestors, vec![role("a/b"), role("a")]);

        assert_eq!(role("a").ancestors().count(), 0);
    }

    #[test]
    fn test_is_role_or_ancestor_of() {
        assert!(role("a").is_role_or_ancestor_of(&role("a")));
        assert!(role("a").is_role_or_ancestor_of(&role("a/b/c")));
        assert!(role("a/b").is_role_or_ancestor_of(&role("a/b/c")));
        assert!(!role("a/b").is_role_or_ancestor_of(&role("a")));
        assert!(!role("b").is_role_or_ancestor_of(&role("a/b")));
    }

    #[test]
    fn test_hierarchical_flag() {
        assert!(role("a/b").is_hierarchical());
        assert!(!role("a").is_hierarchical());
        assert!(!RoleName::default_role().is_hierarchical());
    }
}
