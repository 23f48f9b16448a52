//! Weighted Dominant Resource Fairness sorter.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use fairshare_id::AgentId;
use fairshare_resources::{ResourceQuantities, Resources};

use super::Sorter;

/// Per-client state tracked by the sorter.
#[derive(Debug, Default)]
struct Client {
    active: bool,
    /// Allocation per agent, in allocated (role-attached) form.
    allocation: HashMap<AgentId, Resources>,
    /// Scalar projection of the allocation, maintained incrementally.
    totals: ResourceQuantities,
}

/// Weighted DRF implementation of the [`Sorter`] contract.
///
/// The dominant share of a client is the largest ratio, across resource
/// names, of the client's allocated quantity to the cluster total; it is
/// divided by the client's weight before comparison. Ties are broken by
/// client name, so repeated sorts with no mutation are stable.
#[derive(Debug, Default)]
pub struct DrfSorter {
    clients: HashMap<String, Client>,

    /// Weights survive client removal and apply on re-add, so weight
    /// updates and client registration can arrive in either order.
    weights: HashMap<String, f64>,

    /// Resource names excluded from share computation.
    exclude: BTreeSet<String>,

    /// Scalar totals across all agents (the denominator).
    total: ResourceQuantities,

    /// Scalar totals allocated across all clients.
    allocated: ResourceQuantities,
}

impl DrfSorter {
    /// Creates a sorter with no fairness exclusions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sorter that ignores the given resource names when
    /// computing shares.
    #[must_use]
    pub fn with_exclusions(exclude: BTreeSet<String>) -> Self {
        Self {
            exclude,
            ..Self::default()
        }
    }

    fn weight_of(&self, client: &str) -> f64 {
        self.weights.get(client).copied().unwrap_or(1.0)
    }

    /// Weighted dominant share for one client.
    fn share_of(&self, client: &Client, weight: f64) -> f64 {
        let mut share: f64 = 0.0;

        for (name, allocated) in client.totals.iter() {
            if self.exclude.contains(name) {
                continue;
            }

            let total = self.total.get(name);
            if total.is_zero() {
                continue;
            }

            share = share.max(allocated.as_f64() / total.as_f64());
        }

        share / weight
    }

    fn client_mut(&mut self, client: &str) -> &mut Client {
        self.clients
            .get_mut(client)
            .unwrap_or_else(|| panic!("sorter does not contain client {client}"))
    }
}

impl Sorter for DrfSorter {
    fn add_client(&mut self, client: &str) {
        let previous = self.clients.insert(client.to_string(), Client::default());
        assert!(previous.is_none(), "sorter already contains client {client}");
    }

    fn remove_client(&mut self, client: &str) {
        let Some(state) = self.clients.remove(client) else {
            panic!("sorter does not contain client {client}");
        };

        // Any allocation still attributed to the client leaves the
        // aggregate with it.
        self.allocated -= &state.totals;
    }

    fn activate(&mut self, client: &str) {
        self.client_mut(client).active = true;
    }

    fn deactivate(&mut self, client: &str) {
        self.client_mut(client).active = false;
    }

    fn contains(&self, client: &str) -> bool {
        self.clients.contains_key(client)
    }

    fn count(&self) -> usize {
        self.clients.len()
    }

    fn update_weight(&mut self, client: &str, weight: f64) {
        if weight <= 0.0 {
            warn!(client, weight, "Ignoring non-positive sorter weight");
            return;
        }
        self.weights.insert(client.to_string(), weight);
    }

    fn add_total(&mut self, _agent_id: &AgentId, resources: &Resources) {
        self.total += &resources.scalar_quantities();
    }

    fn remove_total(&mut self, _agent_id: &AgentId, resources: &Resources) {
        self.total -= &resources.scalar_quantities();
    }

    fn allocated(&mut self, client: &str, agent_id: &AgentId, resources: &Resources) {
        let quantities = resources.scalar_quantities();

        let state = self.client_mut(client);
        *state.allocation.entry(agent_id.clone()).or_default() += resources;
        state.totals += &quantities;

        self.allocated += &quantities;
    }

    fn unallocated(&mut self, client: &str, agent_id: &AgentId, resources: &Resources) {
        let quantities = resources.scalar_quantities();

        let state = self.client_mut(client);
        if let Some(allocation) = state.allocation.get_mut(agent_id) {
            *allocation -= resources;
            if allocation.is_empty() {
                state.allocation.remove(agent_id);
            }
        }
        state.totals -= &quantities;

        self.allocated -= &quantities;
    }

    fn update(
        &mut self,
        client: &str,
        agent_id: &AgentId,
        consumed: &Resources,
        converted: &Resources,
    ) {
        self.unallocated(client, agent_id, consumed);
        self.allocated(client, agent_id, converted);
    }

    fn allocation(&self, client: &str) -> HashMap<AgentId, Resources> {
        self.clients
            .get(client)
            .map(|c| c.allocation.clone())
            .unwrap_or_default()
    }

    fn allocation_on_agent(&self, agent_id: &AgentId) -> HashMap<String, Resources> {
        self.clients
            .iter()
            .filter_map(|(name, state)| {
                state
                    .allocation
                    .get(agent_id)
                    .map(|resources| (name.clone(), resources.clone()))
            })
            .collect()
    }

    fn allocation_of(&self, client: &str, agent_id: &AgentId) -> Resources {
        self.clients
            .get(client)
            .and_then(|c| c.allocation.get(agent_id))
            .cloned()
            .unwrap_or_default()
    }

    fn total_scalar_quantities(&self) -> ResourceQuantities {
        self.total.clone()
    }

    fn allocation_scalar_quantities(&self) -> ResourceQuantities {
        self.allocated.clone()
    }

    fn allocation_scalar_quantities_of(&self, client: &str) -> ResourceQuantities {
        self.clients
            .get(client)
            .map(|c| c.totals.clone())
            .unwrap_or_default()
    }

    fn sort(&self) -> Vec<String> {
        let mut shares: Vec<(f64, &str)> = self
            .clients
            .iter()
            .filter(|(_, state)| state.active)
            .map(|(name, state)| (self.share_of(state, self.weight_of(name)), name.as_str()))
            .collect();

        // Ascending share; ties broken by client name for stability.
        shares.sort_by(|(share_a, name_a), (share_b, name_b)| {
            share_a
                .partial_cmp(share_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| name_a.cmp(name_b))
        });

        shares.into_iter().map(|(_, name)| name.to_string()).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
