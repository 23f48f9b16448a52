//! Fair-share ordering of allocation clients.
//!
//! A sorter orders "clients" — role names at the cluster level, framework
//! IDs within a role — by how little of the cluster they currently hold.
//! The allocation engine owns three sorter families: one over all roles,
//! one over quota'ed roles (fed only non-revocable resources), and one per
//! role over that role's frameworks.

mod drf;

use std::collections::HashMap;

use fairshare_id::AgentId;
use fairshare_resources::{ResourceQuantities, Resources};

pub use drf::DrfSorter;

/// Ordering of active clients by fair share.
///
/// This is a capability boundary: the engine only depends on the contract
/// below, and tests may substitute a deterministic stub. Clients are keyed
/// by string (role name or framework ID value).
pub trait Sorter: Send {
    /// Adds a client with default weight, inactive until activated.
    fn add_client(&mut self, client: &str);

    /// Removes a client and any allocation still attributed to it.
    fn remove_client(&mut self, client: &str);

    /// Includes the client in future `sort()` results.
    fn activate(&mut self, client: &str);

    /// Excludes the client from future `sort()` results without touching
    /// its recorded allocation.
    fn deactivate(&mut self, client: &str);

    /// Returns true if the client is known (active or not).
    fn contains(&self, client: &str) -> bool;

    /// Number of known clients.
    fn count(&self) -> usize;

    /// Sets the weight used to scale the client's share. Applies to the
    /// client whether it is added before or after this call.
    fn update_weight(&mut self, client: &str, weight: f64);

    /// Adds an agent's resources to the total (the share denominator).
    fn add_total(&mut self, agent_id: &AgentId, resources: &Resources);

    /// Removes an agent's resources from the total.
    fn remove_total(&mut self, agent_id: &AgentId, resources: &Resources);

    /// Attributes an allocation on an agent to a client.
    fn allocated(&mut self, client: &str, agent_id: &AgentId, resources: &Resources);

    /// Releases part of a client's allocation on an agent.
    fn unallocated(&mut self, client: &str, agent_id: &AgentId, resources: &Resources);

    /// Replaces `consumed` with `converted` within a client's allocation
    /// on an agent (equivalent to unallocated + allocated).
    fn update(
        &mut self,
        client: &str,
        agent_id: &AgentId,
        consumed: &Resources,
        converted: &Resources,
    );

    /// The client's allocation, per agent.
    fn allocation(&self, client: &str) -> HashMap<AgentId, Resources>;

    /// Every client's allocation on one agent.
    fn allocation_on_agent(&self, agent_id: &AgentId) -> HashMap<String, Resources>;

    /// The client's allocation on one agent.
    fn allocation_of(&self, client: &str, agent_id: &AgentId) -> Resources;

    /// Scalar quantities of the total across all agents.
    fn total_scalar_quantities(&self) -> ResourceQuantities;

    /// Scalar quantities allocated across all clients.
    fn allocation_scalar_quantities(&self) -> ResourceQuantities;

    /// Scalar quantities allocated to one client.
    fn allocation_scalar_quantities_of(&self, client: &str) -> ResourceQuantities;

    /// Active clients in ascending weighted-fair-share order.
    fn sort(&self) -> Vec<String>;
}
