//! The `Resources` collection and its algebra.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use fairshare_id::RoleName;

use crate::{Resource, ResourceQuantities, Value};

/// A collection of resources with merge-on-add semantics.
///
/// Two resources that differ only in amount (same name, value kind,
/// reservation stack, flags, disk source, and allocation) occupy a single
/// entry, so structurally equal collections compare equal regardless of
/// insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources(Vec<Resource>);

impl PartialEq for Resources {
    fn eq(&self, other: &Self) -> bool {
        self.contains(other) && other.contains(self)
    }
}

impl Eq for Resources {}

impl Resources {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no non-empty resources are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the individual resources.
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.0.iter()
    }

    /// Adds a resource, merging it into an existing entry when possible.
    pub fn add(&mut self, resource: Resource) {
        if resource.is_empty() {
            return;
        }

        for existing in &mut self.0 {
            if existing.is_mergeable_with(&resource) {
                existing.value = merge_values(&existing.value, &resource.value);
                return;
            }
        }

        self.0.push(resource);
    }

    /// Removes a resource, ignoring any part not present.
    pub fn subtract(&mut self, resource: &Resource) {
        if resource.is_empty() {
            return;
        }

        for existing in &mut self.0 {
            if existing.is_mergeable_with(resource) {
                existing.value = subtract_values(&existing.value, &resource.value);
                break;
            }
        }

        self.0.retain(|r| !r.is_empty());
    }

    /// Returns true if `self` wholly contains the given resource.
    #[must_use]
    pub fn contains_resource(&self, resource: &Resource) -> bool {
        if resource.is_empty() {
            return true;
        }

        self.0
            .iter()
            .any(|r| r.is_mergeable_with(resource) && r.value.contains(&resource.value))
    }

    /// Returns true if `self` wholly contains `other`.
    #[must_use]
    pub fn contains(&self, other: &Resources) -> bool {
        other.iter().all(|r| self.contains_resource(r))
    }

    /// Returns true if the summed scalar quantities cover `quantities`,
    /// ignoring metadata.
    #[must_use]
    pub fn contains_quantities(&self, quantities: &ResourceQuantities) -> bool {
        self.scalar_quantities().contains(quantities)
    }

    /// Returns the resources matching a predicate.
    #[must_use]
    pub fn filter(&self, predicate: impl Fn(&Resource) -> bool) -> Resources {
        Resources(self.0.iter().filter(|r| predicate(r)).cloned().collect())
    }

    /// Returns the unreserved resources.
    #[must_use]
    pub fn unreserved(&self) -> Resources {
        self.filter(Resource::is_unreserved)
    }

    /// Returns the resources reserved for exactly this role.
    #[must_use]
    pub fn reserved(&self, role: &RoleName) -> Resources {
        self.filter(|r| r.reservation_role() == Some(role))
    }

    /// Returns the non-revocable resources.
    #[must_use]
    pub fn non_revocable(&self) -> Resources {
        self.filter(|r| !r.revocable)
    }

    /// Returns the revocable resources.
    #[must_use]
    pub fn revocable(&self) -> Resources {
        self.filter(|r| r.revocable)
    }

    /// Returns the shared resources.
    #[must_use]
    pub fn shared(&self) -> Resources {
        self.filter(|r| r.shared)
    }

    /// Returns the scalar resources.
    #[must_use]
    pub fn scalars(&self) -> Resources {
        self.filter(Resource::is_scalar)
    }

    /// Returns the non-scalar resources.
    #[must_use]
    pub fn non_scalars(&self) -> Resources {
        self.filter(|r| !r.is_scalar())
    }

    /// Returns the resources a role may be offered: unreserved resources
    /// plus resources reserved for the role or any of its ancestors.
    #[must_use]
    pub fn allocatable_to(&self, role: &RoleName) -> Resources {
        self.filter(|r| match r.reservation_role() {
            None => true,
            Some(reserved) => reserved.is_role_or_ancestor_of(role),
        })
    }

    /// Returns true if any resource carries a refined reservation stack.
    #[must_use]
    pub fn has_refined_reservations(&self) -> bool {
        self.0.iter().any(Resource::has_refined_reservation)
    }

    /// Groups reserved resources by their effective reservation role.
    #[must_use]
    pub fn reservations(&self) -> BTreeMap<RoleName, Resources> {
        let mut map: BTreeMap<RoleName, Resources> = BTreeMap::new();
        for resource in &self.0 {
            if let Some(role) = resource.reservation_role() {
                map.entry(role.clone()).or_default().add(resource.clone());
            }
        }
        map
    }

    /// Groups allocated resources by their allocation role.
    ///
    /// Resources without an allocation are skipped; callers that require
    /// fully allocated input assert on [`Resources::is_allocated`].
    #[must_use]
    pub fn allocations(&self) -> BTreeMap<RoleName, Resources> {
        let mut map: BTreeMap<RoleName, Resources> = BTreeMap::new();
        for resource in &self.0 {
            if let Some(role) = &resource.allocation {
                map.entry(role.clone()).or_default().add(resource.clone());
            }
        }
        map
    }

    /// Returns true if every resource carries an allocation role.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.0.iter().all(|r| r.allocation.is_some())
    }

    /// Marks every resource as allocated to `role`.
    pub fn allocate(&mut self, role: &RoleName) {
        for resource in &mut self.0 {
            resource.allocation = Some(role.clone());
        }
        self.renormalize();
    }

    /// Clears every resource's allocation.
    pub fn unallocate(&mut self) {
        for resource in &mut self.0 {
            resource.allocation = None;
        }
        self.renormalize();
    }

    /// Returns the summed scalar quantities by resource name.
    #[must_use]
    pub fn scalar_quantities(&self) -> ResourceQuantities {
        self.0
            .iter()
            .filter(|r| r.is_scalar())
            .map(|r| (r.name.clone(), r.value.scalar()))
            .collect()
    }

    /// Re-merges entries whose metadata converged after a mutation.
    fn renormalize(&mut self) {
        let items = std::mem::take(&mut self.0);
        for item in items {
            self.add(item);
        }
    }
}

fn merge_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => Value::Scalar(*x + *y),
        (Value::Ranges(x), Value::Ranges(y)) => Value::Ranges(x.union(y)),
        (Value::Set(x), Value::Set(y)) => Value::Set(x.union(y).cloned().collect()),
        _ => unreachable!("merge of mismatched value kinds"),
    }
}

fn subtract_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => Value::Scalar(x.saturating_sub(*y)),
        (Value::Ranges(x), Value::Ranges(y)) => Value::Ranges(x.subtract(y)),
        (Value::Set(x), Value::Set(y)) => Value::Set(x.difference(y).cloned().collect()),
        _ => unreachable!("subtraction of mismatched value kinds"),
    }
}

impl From<Resource> for Resources {
    fn from(resource: Resource) -> Self {
        let mut resources = Resources::new();
        resources.add(resource);
        resources
    }
}

impl From<Vec<Resource>> for Resources {
    fn from(items: Vec<Resource>) -> Self {
        items.into_iter().collect()
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut resources = Resources::new();
        for resource in iter {
            resources.add(resource);
        }
        resources
    }
}

impl<'a> IntoIterator for &'a Resources {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Resources {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl std::ops::AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, rhs: &Resources) {
        for resource in &rhs.0 {
            self.add(resource.clone());
        }
    }
}

impl std::ops::Add<&Resources> for Resources {
    type Output = Resources;

    fn add(mut self, rhs: &Resources) -> Resources {
        self += rhs;
        self
    }
}

impl std::ops::SubAssign<&Resources> for Resources {
    fn sub_assign(&mut self, rhs: &Resources) {
        for resource in &rhs.0 {
            self.subtract(resource);
        }
    }
}

impl std::ops::Sub<&Resources> for Resources {
    type Output = Resources;

    fn sub(mut self, rhs: &Resources) -> Resources {
        self -= rhs;
        self
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{{}}");
        }
        for (i, resource) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{resource}")?;
        }
        Ok(())
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

    fn cpus_mem(cpus: f64, mem: f64) -> Resources {
        vec![Resource::scalar("cpus", cpus), Resource::scalar("mem", mem)].into()
    }

    #[test]
    fn test_merge_on_add() {
        let mut r = Resources::new();
        r.add(Resource::scalar("cpus", 1.0));
        r.add(Resource::scalar("cpus", 2.5));

        assert_eq!(r.iter().count(), 1);
        assert_eq!(
            r.scalar_quantities(),
            ResourceQuantities::from([("cpus", 3.5)])
        );
    }

    #[test]
    fn test_reserved_entries_stay_distinct() {
        let mut r = Resources::new();
        r.add(Resource::scalar("cpus", 1.0));
        r.add(Resource::scalar("cpus", 2.0).reserved_for(role("ads")));

        assert_eq!(r.iter().count(), 2);
        assert_eq!(
            r.reserved(&role("ads")).scalar_quantities(),
            ResourceQuantities::from([("cpus", 2.0)])
        );
        assert_eq!(
            r.unreserved().scalar_quantities(),
            ResourceQuantities::from([("cpus", 1.0)])
        );
    }

    #[test]
    fn test_subtract_partial() {
        let mut r = cpus_mem(4.0, 1024.0);
        r -= &cpus_mem(1.5, 256.0);

        assert_eq!(
            r.scalar_quantities(),
            ResourceQuantities::from([("cpus", 2.5), ("mem", 768.0)])
        );
    }

    #[test]
    fn test_subtract_to_empty_drops_entry() {
        let mut r: Resources = Resource::scalar("cpus", 2.0).into();
        r -= &Resource::scalar("cpus", 2.0).into();
        assert!(r.is_empty());
    }

    #[test]
    fn test_contains() {
        let total = cpus_mem(4.0, 1024.0);
        assert!(total.contains(&cpus_mem(4.0, 1024.0)));
        assert!(total.contains(&cpus_mem(1.0, 512.0)));
        assert!(!total.contains(&cpus_mem(5.0, 512.0)));

        // Reserved resources are not interchangeable with unreserved ones.
        let reserved: Resources = Resource::scalar("cpus", 1.0).reserved_for(role("a")).into();
        assert!(!total.contains(&reserved));
    }

    #[test]
    fn test_allocatable_to_includes_ancestor_reservations() {
        let mut r = Resources::new();
        r.add(Resource::scalar("cpus", 1.0));
        r.add(Resource::scalar("cpus", 2.0).reserved_for(role("eng")));
        r.add(Resource::scalar("cpus", 4.0).reserved_for(role("ads")));

        let allocatable = r.allocatable_to(&role("eng/ci"));
        assert_eq!(
            allocatable.scalar_quantities(),
            ResourceQuantities::from([("cpus", 3.0)])
        );
    }

    #[test]
    fn test_allocate_round_trip() {
        let mut r = cpus_mem(2.0, 512.0);
        r.allocate(&role("ads"));
        assert!(r.is_allocated());
        assert_eq!(r.allocations().len(), 1);

        r.unallocate();
        assert_eq!(r, cpus_mem(2.0, 512.0));
    }

    #[test]
    fn test_allocate_merges_converged_entries() {
        let mut r = Resources::new();
        let mut pre_allocated = Resource::scalar("cpus", 1.0);
        pre_allocated.allocation = Some(role("ads"));
        r.add(pre_allocated);
        r.add(Resource::scalar("cpus", 2.0));
        assert_eq!(r.iter().count(), 2);

        r.allocate(&role("ads"));
        assert_eq!(r.iter().count(), 1);
        assert_eq!(
            r.scalar_quantities(),
            ResourceQuantities::from([("cpus", 3.0)])
        );
    }

    #[test]
    fn test_ranges_arithmetic() {
        let mut ports: Resources = Resource::ranges("ports", &[(31000, 32000)]).into();
        ports -= &Resource::ranges("ports", &[(31500, 31600)]).into();

        let expected: Resources =
            Resource::ranges("ports", &[(31000, 31499), (31601, 32000)]).into();
        assert_eq!(ports, expected);
    }

    #[test]
    fn test_structural_equality_is_order_independent() {
        let a: Resources = vec![
            Resource::scalar("cpus", 1.0),
            Resource::scalar("mem", 128.0),
        ]
        .into();
        let b: Resources = vec![
            Resource::scalar("mem", 128.0),
            Resource::scalar("cpus", 1.0),
        ]
        .into();

        // Same entries, different insertion order.
        assert_eq!(a, b);
    }
}
