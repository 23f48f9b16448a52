//! Macro for defining typed ID types.

/// Macro to define a typed ID with a suggested prefix.
///
/// This generates a newtype wrapper around `String` with:
/// - A `PREFIX` constant used by `new()`
/// - `new()` to mint a fresh `{prefix}_{ulid}` value
/// - `parse()` accepting any master-assigned value
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations
/// - `Ord`, `Hash`, and other standard traits
///
/// Unlike system-generated IDs, allocator-facing IDs are chosen by the
/// master and must round-trip unmodified, so `parse()` only rejects empty
/// values and embedded whitespace.
///
/// # Example
///
/// ```ignore
/// define_id!(FrameworkId, "fw");
///
/// let minted = FrameworkId::new();
/// let external: FrameworkId = "20260801-143523-16842879-5050-12".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        /// A typed ID for this entity kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The prefix used when minting fresh IDs.
            pub const PREFIX: &'static str = $prefix;

            /// Mints a new ID with a fresh ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}_{}", Self::PREFIX, $crate::Ulid::new()))
            }

            /// Parses an ID from a master-assigned string.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
                    return Err($crate::IdError::InvalidCharacters(s.to_string()));
                }

                Ok(Self(s.to_string()))
            }

            /// Returns the underlying string value.
            #[must_use]
            pub fn value(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}
