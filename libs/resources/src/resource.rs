//! A single resource: named value plus allocation metadata.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use fairshare_id::RoleName;

use crate::{Range, Ranges, Scalar, Value};

/// A reservation binding a resource to a role.
///
/// Stacks with more than one entry are refined reservations: the resource
/// was re-reserved to a descendant role without releasing the outer
/// reservation. The effective role is the top of the stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reservation {
    pub role: RoleName,
}

impl Reservation {
    /// Creates a reservation for a role.
    #[must_use]
    pub fn new(role: RoleName) -> Self {
        Self { role }
    }
}

/// Where a disk resource lives.
///
/// `Mount` disks are pre-mounted filesystems offered whole: they cannot be
/// carved into smaller pieces, which matters when shrinking an offer to a
/// quantity target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskSource {
    Path { root: String },
    Mount { root: String },
}

/// A named resource with value and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Resource name, e.g. `cpus`, `mem`, `gpus`, `disk`, `ports`.
    pub name: String,

    /// The amount or contents.
    pub value: Value,

    /// Reservation stack, outermost first. Empty means unreserved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reservations: Vec<Reservation>,

    /// Revocable resources may be taken back by the master at any time.
    #[serde(default)]
    pub revocable: bool,

    /// Shared resources can be allocated to multiple frameworks at once.
    #[serde(default)]
    pub shared: bool,

    /// Disk provenance, when this is a disk resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_source: Option<DiskSource>,

    /// The role this resource is currently allocated to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<RoleName>,
}

impl Resource {
    /// Creates an unreserved, non-revocable scalar resource.
    #[must_use]
    pub fn scalar(name: &str, amount: f64) -> Self {
        Self {
            name: name.to_string(),
            value: Value::Scalar(Scalar::from_f64(amount)),
            reservations: Vec::new(),
            revocable: false,
            shared: false,
            disk_source: None,
            allocation: None,
        }
    }

    /// Creates an unreserved ranges resource.
    #[must_use]
    pub fn ranges(name: &str, spans: &[(u64, u64)]) -> Self {
        Self {
            name: name.to_string(),
            value: Value::Ranges(Ranges::new(
                spans.iter().map(|&(b, e)| Range::new(b, e)).collect(),
            )),
            reservations: Vec::new(),
            revocable: false,
            shared: false,
            disk_source: None,
            allocation: None,
        }
    }

    /// Creates an unreserved set resource.
    #[must_use]
    pub fn set(name: &str, items: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            value: Value::Set(items.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()),
            reservations: Vec::new(),
            revocable: false,
            shared: false,
            disk_source: None,
            allocation: None,
        }
    }

    /// Returns a copy reserved for the given role (replacing any existing
    /// stack with a single reservation).
    #[must_use]
    pub fn reserved_for(mut self, role: RoleName) -> Self {
        self.reservations = vec![Reservation::new(role)];
        self
    }

    /// Returns a copy with a reservation pushed onto the stack.
    #[must_use]
    pub fn with_refinement(mut self, role: RoleName) -> Self {
        self.reservations.push(Reservation::new(role));
        self
    }

    /// Returns a revocable copy.
    #[must_use]
    pub fn as_revocable(mut self) -> Self {
        self.revocable = true;
        self
    }

    /// Returns a shared copy.
    #[must_use]
    pub fn as_shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Returns a copy carrying a disk source.
    #[must_use]
    pub fn with_disk_source(mut self, source: DiskSource) -> Self {
        self.disk_source = Some(source);
        self
    }

    /// The effective reservation role: top of the reservation stack.
    #[must_use]
    pub fn reservation_role(&self) -> Option<&RoleName> {
        self.reservations.last().map(|r| &r.role)
    }

    /// Returns true if the resource is unreserved.
    #[must_use]
    pub fn is_unreserved(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Returns true if the reservation stack is refined (depth > 1).
    #[must_use]
    pub fn has_refined_reservation(&self) -> bool {
        self.reservations.len() > 1
    }

    /// Returns true if this is a scalar resource.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.value.is_scalar()
    }

    /// Returns true if the resource cannot be split into smaller pieces.
    ///
    /// Mount disks are offered whole or not at all.
    #[must_use]
    pub fn is_indivisible(&self) -> bool {
        matches!(self.disk_source, Some(DiskSource::Mount { .. }))
    }

    /// Returns true if the value holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Returns true if two resources differ only in amount and can be
    /// merged into a single entry.
    #[must_use]
    pub fn is_mergeable_with(&self, other: &Resource) -> bool {
        self.name == other.name
            && self.value.same_kind(&other.value)
            && self.reservations == other.reservations
            && self.revocable == other.revocable
            && self.shared == other.shared
            && self.disk_source == other.disk_source
            && self.allocation == other.allocation
    }

    /// Shrinks a scalar resource down to `target`.
    ///
    /// Returns true if the resource now fits within the target (possibly
    /// untouched, when it was already small enough). Indivisible resources
    /// larger than the target cannot shrink and return false.
    pub fn shrink(&mut self, target: Scalar) -> bool {
        let amount = match &self.value {
            Value::Scalar(s) => *s,
            _ => return false,
        };

        if amount <= target {
            return true;
        }

        if self.is_indivisible() {
            return false;
        }

        self.value = Value::Scalar(target);
        true
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;

        if !self.reservations.is_empty() {
            write!(f, "(")?;
            for (i, reservation) in self.reservations.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", reservation.role)?;
            }
            write!(f, ")")?;
        }

        if let Some(allocation) = &self.allocation {
            write!(f, "[{allocation}]")?;
        }

        if self.revocable {
            write!(f, "{{REV}}")?;
        }
        if self.shared {
            write!(f, "<shared>")?;
        }

        write!(f, ":{}", self.value)
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
    fn test_reservation_role_is_top_of_stack() {
        let r = Resource::scalar("cpus", 4.0)
            .reserved_for(role("a"))
            .with_refinement(role("a/b"));

        assert_eq!(r.reservation_role(), Some(&role("a/b")));
        assert!(r.has_refined_reservation());
    }

    #[test]
    fn test_shrink_divisible_scalar() {
        let mut r = Resource::scalar("cpus", 8.0);
        assert!(r.shrink(Scalar::from_units(3)));
        assert_eq!(r.value.scalar(), Scalar::from_units(3));
    }

    #[test]
    fn test_shrink_already_small_enough() {
        let mut r = Resource::scalar("cpus", 2.0);
        assert!(r.shrink(Scalar::from_units(3)));
        assert_eq!(r.value.scalar(), Scalar::from_units(2));
    }

    #[test]
    fn test_shrink_mount_disk_is_all_or_nothing() {
        let mut r = Resource::scalar("disk", 1024.0).with_disk_source(DiskSource::Mount {
            root: "/mnt/data".to_string(),
        });

        assert!(!r.shrink(Scalar::from_units(512)));
        assert_eq!(r.value.scalar(), Scalar::from_units(1024));

        assert!(r.shrink(Scalar::from_units(2048)));
    }

    #[test]
    fn test_mergeable() {
        let a = Resource::scalar("cpus", 1.0);
        let b = Resource::scalar("cpus", 2.0);
        assert!(a.is_mergeable_with(&b));

        let reserved = Resource::scalar("cpus", 2.0).reserved_for(role("a"));
        assert!(!a.is_mergeable_with(&reserved));

        let revocable = Resource::scalar("cpus", 2.0).as_revocable();
        assert!(!a.is_mergeable_with(&revocable));
    }

    #[test]
    fn test_display() {
        let r = Resource::scalar("cpus", 4.0).reserved_for(role("ads"));
        assert_eq!(r.to_string(), "cpus(ads):4");

        let mut allocated = Resource::scalar("mem", 512.0);
        allocated.allocation = Some(role("ads"));
        assert_eq!(allocated.to_string(), "mem[ads]:512");
    }

    #[test]
    fn test_json_roundtrip() {
        let r = Resource::scalar("disk", 1024.0)
            .reserved_for(role("ads"))
            .with_disk_source(DiskSource::Mount {
                root: "/mnt/data".to_string(),
            });

        let json = serde_json::to_string(&r).unwrap();
        let parsed: Resource = serde_json::from_str(&json).unwrap();
        assert_eq!(r, parsed);
    }
}
