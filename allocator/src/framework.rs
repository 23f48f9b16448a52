//! Framework registry entries.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use fairshare_id::{AgentId, RoleName};
use fairshare_resources::ResourceQuantities;

use crate::filters::{InverseOfferFilter, OfferFilter};

/// Framework capability flags, flattened from the subscription payload at
/// add/update time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkCapabilities {
    /// May subscribe to more than one role.
    pub multi_role: bool,

    /// Understands hierarchical role names.
    pub hierarchical_role: bool,

    /// Opted into GPU resources.
    pub gpu_resources: bool,

    /// Accepts revocable resources.
    pub revocable_resources: bool,

    /// Accepts shared resources.
    pub shared_resources: bool,

    /// Understands refined reservation stacks.
    pub reservation_refinement: bool,

    /// May receive offers from agents outside the master's region.
    pub region_aware: bool,
}

/// The subscription payload a framework presents when it is added or
/// updated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameworkInfo {
    /// Subscribed roles; must be non-empty.
    pub roles: BTreeSet<RoleName>,

    /// Capability flags.
    pub capabilities: FrameworkCapabilities,

    /// Per-role minimum offer sizes; an offer must satisfy any one of the
    /// listed quantity sets. Overrides the global configuration.
    pub min_allocatable_resources: HashMap<RoleName, Vec<ResourceQuantities>>,
}

/// Per-framework counters.
///
/// The shell outlives the framework: `remove_framework` retires it into a
/// bounded completed-frameworks map so a master can still report on
/// recently torn-down schedulers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkCounters {
    /// Offer batches delivered via the offer callback.
    pub offers_sent: u64,

    /// Inverse offer batches delivered.
    pub inverse_offers_sent: u64,

    /// Role suppression events.
    pub roles_suppressed: u64,

    /// Role revival events.
    pub roles_revived: u64,
}

/// A registered framework.
#[derive(Debug)]
pub struct Framework {
    /// Subscribed roles.
    pub roles: BTreeSet<RoleName>,

    /// Roles currently suppressed (always a subset of `roles`).
    pub suppressed_roles: BTreeSet<RoleName>,

    /// Capability flags.
    pub capabilities: FrameworkCapabilities,

    /// Whether the framework is active (connected and schedulable).
    pub active: bool,

    /// Per-role minimum offer sizes.
    pub min_allocatable_resources: HashMap<RoleName, Vec<ResourceQuantities>>,

    /// Active offer filters by role and agent.
    pub offer_filters: HashMap<RoleName, HashMap<AgentId, Vec<OfferFilter>>>,

    /// Active inverse offer filters by agent.
    pub inverse_offer_filters: HashMap<AgentId, Vec<InverseOfferFilter>>,

    /// Counters; retained after removal when metrics publication is on.
    pub counters: FrameworkCounters,
}

impl Framework {
    /// Creates a registry entry from a subscription payload.
    pub fn new(info: FrameworkInfo, suppressed_roles: BTreeSet<RoleName>, active: bool) -> Self {
        assert!(
            !info.roles.is_empty(),
            "framework subscribed to no roles"
        );

        Self {
            roles: info.roles,
            suppressed_roles,
            capabilities: info.capabilities,
            active,
            min_allocatable_resources: info.min_allocatable_resources,
            offer_filters: HashMap::new(),
            inverse_offer_filters: HashMap::new(),
            counters: FrameworkCounters::default(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
