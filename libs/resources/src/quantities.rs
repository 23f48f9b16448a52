//! Scalar resource quantities.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::Scalar;

/// A map of resource name to scalar quantity.
///
/// This is the projection used for quota guarantees and headroom math:
/// metadata (reservations, flags) is deliberately absent. Subtraction is a
/// monus — entries floor at zero and vanish — because quantities express
/// "how much is still needed", never a deficit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities(BTreeMap<String, Scalar>);

impl ResourceQuantities {
    /// Creates an empty quantity map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the quantity for a resource name, zero when absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Scalar {
        self.0.get(name).copied().unwrap_or(Scalar::ZERO)
    }

    /// Returns true if no positive quantities remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if every quantity of `other` is covered by `self`.
    #[must_use]
    pub fn contains(&self, other: &ResourceQuantities) -> bool {
        other.0.iter().all(|(name, qty)| self.get(name) >= *qty)
    }

    /// Iterates over `(name, quantity)` pairs in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Scalar> {
        self.0.iter()
    }

    fn insert(&mut self, name: String, quantity: Scalar) {
        if quantity > Scalar::ZERO {
            *self.0.entry(name).or_insert(Scalar::ZERO) += quantity;
        }
    }
}

impl FromIterator<(String, Scalar)> for ResourceQuantities {
    fn from_iter<I: IntoIterator<Item = (String, Scalar)>>(iter: I) -> Self {
        let mut quantities = Self::new();
        for (name, quantity) in iter {
            quantities.insert(name, quantity);
        }
        quantities
    }
}

impl<const N: usize> From<[(&str, f64); N]> for ResourceQuantities {
    fn from(entries: [(&str, f64); N]) -> Self {
        entries
            .into_iter()
            .map(|(name, qty)| (name.to_string(), Scalar::from_f64(qty)))
            .collect()
    }
}

impl AddAssign<&ResourceQuantities> for ResourceQuantities {
    fn add_assign(&mut self, rhs: &ResourceQuantities) {
        for (name, quantity) in &rhs.0 {
            self.insert(name.clone(), *quantity);
        }
    }
}

impl Add<&ResourceQuantities> for ResourceQuantities {
    type Output = ResourceQuantities;

    fn add(mut self, rhs: &ResourceQuantities) -> ResourceQuantities {
        self += rhs;
        self
    }
}

impl SubAssign<&ResourceQuantities> for ResourceQuantities {
    /// Monus: entries floor at zero and empty entries are dropped.
    fn sub_assign(&mut self, rhs: &ResourceQuantities) {
        for (name, quantity) in &rhs.0 {
            if let Some(current) = self.0.get_mut(name) {
                *current = current.saturating_sub(*quantity);
                if current.is_zero() {
                    self.0.remove(name);
                }
            }
        }
    }
}

impl Sub<&ResourceQuantities> for ResourceQuantities {
    type Output = ResourceQuantities;

    fn sub(mut self, rhs: &ResourceQuantities) -> ResourceQuantities {
        self -= rhs;
        self
    }
}

impl fmt::Display for ResourceQuantities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{{}}");
        }
        for (i, (name, quantity)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{name}:{quantity}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
