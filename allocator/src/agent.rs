//! Agent registry entries and maintenance state.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fairshare_id::FrameworkId;
use fairshare_resources::Resources;

use crate::engine::InverseOfferStatus;

/// Agent capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Supports frameworks subscribed to multiple roles.
    pub multi_role: bool,

    /// Supports hierarchical role names.
    pub hierarchical_role: bool,
}

/// Static agent description supplied by the master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Hostname; the agent whitelist is keyed on it.
    pub hostname: String,

    /// Operator-set attributes. Schedulers select on these, so attribute
    /// changes invalidate standing offer filters.
    pub attributes: BTreeMap<String, String>,

    /// Fault-domain region, when the cluster spans regions.
    pub region: Option<String>,
}

/// A scheduled unavailability window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unavailability {
    /// When the window opens.
    pub start: DateTime<Utc>,

    /// Window length; `None` means open-ended.
    pub duration: Option<std::time::Duration>,
}

/// Maintenance bookkeeping for an agent with scheduled unavailability.
#[derive(Debug, Clone)]
pub struct Maintenance {
    /// The unavailability window driving inverse offers.
    pub unavailability: Unavailability,

    /// Frameworks with an inverse offer outstanding for this agent. An
    /// entry suppresses further inverse offers until the framework responds
    /// or the offer is rescinded.
    pub offers_outstanding: HashSet<FrameworkId>,

    /// Most recent response per framework.
    pub statuses: HashMap<FrameworkId, InverseOfferStatus>,
}

impl Maintenance {
    /// Creates maintenance state for a fresh unavailability window.
    #[must_use]
    pub fn new(unavailability: Unavailability) -> Self {
        Self {
            unavailability,
            offers_outstanding: HashSet::new(),
            statuses: HashMap::new(),
        }
    }
}

/// A registered agent.
#[derive(Debug)]
pub struct Agent {
    /// Static description.
    pub info: AgentInfo,

    /// Capability flags.
    pub capabilities: AgentCapabilities,

    /// Whether the agent may receive offers.
    pub activated: bool,

    /// Total resources, in unallocated form.
    total: Resources,

    /// Allocated resources, in allocated (role-attached) form.
    allocated: Resources,

    /// Maintenance state, when unavailability is scheduled.
    pub maintenance: Option<Maintenance>,
}

impl Agent {
    /// Creates a registry entry.
    pub fn new(
        info: AgentInfo,
        capabilities: AgentCapabilities,
        total: Resources,
        allocated: Resources,
    ) -> Self {
        Self {
            info,
            capabilities,
            activated: true,
            total,
            allocated,
            maintenance: None,
        }
    }

    /// Total resources (unallocated form).
    #[must_use]
    pub fn total(&self) -> &Resources {
        &self.total
    }

    /// Allocated resources (role-attached form).
    #[must_use]
    pub fn allocated(&self) -> &Resources {
        &self.allocated
    }

    /// Unused resources: total minus the unallocated form of allocations.
    #[must_use]
    pub fn available(&self) -> Resources {
        let mut in_use = self.allocated.clone();
        in_use.unallocate();
        self.total.clone() - &in_use
    }

    /// Records an allocation.
    pub fn allocate(&mut self, resources: &Resources) {
        self.allocated += resources;
    }

    /// Releases an allocation.
    pub fn unallocate(&mut self, resources: &Resources) {
        self.allocated -= resources;
    }

    /// Replaces the total.
    pub fn update_total(&mut self, total: Resources) {
        self.total = total;
    }

    /// Returns true if the agent advertises GPUs.
    #[must_use]
    pub fn has_gpus(&self) -> bool {
        self.total
            .iter()
            .any(|r| r.name == "gpus" && !r.is_empty())
    }
}

// =============================================================================
// Tests
// =============================================================================
