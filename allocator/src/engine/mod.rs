//! The hierarchical allocator state machine.
//!
//! All allocator state lives here, owned by a single instance: the
//! framework and agent registries, role subscriptions, the three sorter
//! families, quota guarantees, hierarchical reservation tracking, and the
//! refusal filters. Every operation runs to completion before the next —
//! the async shell in [`crate::worker`] serializes callers — so no
//! interior locking exists and none is needed.
//!
//! Contract violations (removing an unknown framework, setting quota twice
//! on a role, totals that no longer cover an allocation) panic: they mean
//! the master and allocator have diverged, and continuing would corrupt
//! accounting cluster-wide.

mod cycle;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fairshare_id::{AgentId, FrameworkId, RoleName};
use fairshare_resources::{
    Operation, ResourceConversion, ResourceError, ResourceQuantities, Resources,
};

use crate::agent::{Agent, AgentCapabilities, AgentInfo, Maintenance, Unavailability};
use crate::config::{AllocatorConfig, ALLOCATION_HOLD_OFF_RECOVERY_TIMEOUT, AGENT_RECOVERY_FACTOR};
use crate::filters::{FilterId, InverseOfferFilter, OfferFilter, Refusal};
use crate::framework::{Framework, FrameworkCapabilities, FrameworkCounters, FrameworkInfo};
use crate::sorter::{DrfSorter, Sorter};

pub use cycle::AllocationRunStats;

/// A framework's response to an inverse offer.
///
/// There is no "unknown" variant: the master must resolve a response
/// before forwarding it, so an unresolved status is unrepresentable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InverseOfferStatus {
    Accept,
    Decline,
}

/// Resources a framework is asked to release, with the driving window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableResources {
    /// Specific resources to release; empty means the whole agent.
    pub resources: Resources,

    /// The unavailability window.
    pub unavailability: Unavailability,
}

/// An explicit resource request from a framework.
///
/// Requests are acknowledged but not acted upon; allocation remains purely
/// offer-driven.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Restrict the request to one agent, if set.
    pub agent_id: Option<AgentId>,

    /// The requested resources.
    pub resources: Resources,
}

/// Callback delivering offers: framework, then per-role per-agent resources.
pub type OfferCallback =
    Box<dyn FnMut(&FrameworkId, &BTreeMap<RoleName, BTreeMap<AgentId, Resources>>) + Send>;

/// Callback delivering inverse offers: framework, then per-agent
/// unavailability.
pub type InverseOfferCallback =
    Box<dyn FnMut(&FrameworkId, &BTreeMap<AgentId, UnavailableResources>) + Send>;

/// Factory for per-role framework sorters (and the two role sorters).
pub type SorterFactory = Box<dyn Fn() -> Box<dyn Sorter> + Send>;

/// Timer work the engine asks its shell to schedule.
///
/// The engine never sleeps; it records what should happen later and the
/// worker turns each entry into a timer task that posts back. Stale
/// entries (the filter was dropped in the meantime) no-op on arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// Remove an offer filter after its refusal window.
    ExpireOfferFilter {
        framework_id: FrameworkId,
        role: RoleName,
        agent_id: AgentId,
        filter_id: FilterId,
        after: Duration,
    },

    /// Remove an inverse offer filter after its refusal window.
    ExpireInverseOfferFilter {
        framework_id: FrameworkId,
        agent_id: AgentId,
        filter_id: FilterId,
        after: Duration,
    },

    /// Resume allocation after the recovery hold-off.
    ResumeAllocation { after: Duration },
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Default)]
pub struct AllocatorStats {
    /// Completed allocation runs.
    pub allocation_runs: u64,

    /// Duration of the most recent run.
    pub last_run_duration: Option<Duration>,
}

/// The hierarchical allocator.
pub struct HierarchicalAllocator {
    config: AllocatorConfig,

    offer_callback: OfferCallback,
    inverse_offer_callback: InverseOfferCallback,

    frameworks: HashMap<FrameworkId, Framework>,
    agents: HashMap<AgentId, Agent>,

    /// Roles with at least one subscribed framework or residual
    /// allocation, and the frameworks tracked under each.
    roles: HashMap<RoleName, HashSet<FrameworkId>>,

    /// Fair-share order over all tracked roles; denominators span the
    /// whole cluster.
    role_sorter: Box<dyn Sorter>,

    /// Fair-share order over quota'ed roles only; fed non-revocable
    /// resources exclusively, since revocable resources cannot satisfy
    /// guarantees.
    quota_role_sorter: Box<dyn Sorter>,

    /// One sorter per tracked role, ordering that role's frameworks.
    framework_sorters: HashMap<RoleName, Box<dyn Sorter>>,

    sorter_factory: SorterFactory,

    /// Quota guarantees by top-level role.
    quota_guarantees: HashMap<RoleName, ResourceQuantities>,

    /// Reserved scalar quantities per role, aggregated up each ancestor
    /// chain.
    reservation_scalar_quantities: HashMap<RoleName, ResourceQuantities>,

    /// Agent hostnames eligible for offers; `None` admits every agent.
    whitelist: Option<HashSet<String>>,

    /// Agents to (re)consider in the next allocation run.
    allocation_candidates: HashSet<AgentId>,

    /// Whether a run has been requested since the last one.
    allocation_pending: bool,

    paused: bool,

    /// During recovery: how many agents must register before allocation
    /// resumes early.
    expected_agent_count: Option<usize>,

    next_filter_id: FilterId,

    deferred: Vec<Deferred>,

    /// Counter shells of removed frameworks, oldest first.
    completed_frameworks: VecDeque<(FrameworkId, FrameworkCounters)>,

    stats: AllocatorStats,
}

impl HierarchicalAllocator {
    /// Creates an allocator with the production DRF sorters.
    pub fn new(
        config: AllocatorConfig,
        offer_callback: OfferCallback,
        inverse_offer_callback: InverseOfferCallback,
    ) -> Self {
        let exclude = config.fairness_exclude_resource_names.clone();
        let factory: SorterFactory =
            Box::new(move || Box::new(DrfSorter::with_exclusions(exclude.clone())));

        Self::with_sorter_factory(config, offer_callback, inverse_offer_callback, factory)
    }

    /// Creates an allocator with a custom sorter factory (tests substitute
    /// deterministic stubs here).
    pub fn with_sorter_factory(
        config: AllocatorConfig,
        offer_callback: OfferCallback,
        inverse_offer_callback: InverseOfferCallback,
        sorter_factory: SorterFactory,
    ) -> Self {
        let role_sorter = sorter_factory();
        let quota_role_sorter = sorter_factory();

        info!(
            allocation_interval_ms = config.allocation_interval.as_millis() as u64,
            "Initialized hierarchical allocator"
        );

        Self {
            config,
            offer_callback,
            inverse_offer_callback,
            frameworks: HashMap::new(),
            agents: HashMap::new(),
            roles: HashMap::new(),
            role_sorter,
            quota_role_sorter,
            framework_sorters: HashMap::new(),
            sorter_factory,
            quota_guarantees: HashMap::new(),
            reservation_scalar_quantities: HashMap::new(),
            whitelist: None,
            allocation_candidates: HashSet::new(),
            allocation_pending: false,
            paused: false,
            expected_agent_count: None,
            next_filter_id: 0,
            deferred: Vec::new(),
            completed_frameworks: VecDeque::new(),
            stats: AllocatorStats::default(),
        }
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Begins master-failover recovery: installs quotas and pauses
    /// allocation until enough agents reregister or the hold-off passes.
    pub fn recover(
        &mut self,
        expected_agent_count: usize,
        quotas: HashMap<RoleName, ResourceQuantities>,
    ) {
        // Recovery must precede any allocation state.
        assert!(self.agents.is_empty(), "recovery started after agents were added");
        assert_eq!(self.quota_role_sorter.count(), 0);

        // Without quota there is nothing to protect: offering from a
        // partial view of the cluster is only harmful when it can burn
        // headroom that quota'ed roles will need.
        if quotas.is_empty() {
            debug!("Skipping allocator recovery: nothing to recover");
            return;
        }

        for (role, guarantee) in quotas {
            self.set_quota(&role, guarantee);
        }

        let effective = (expected_agent_count as f64 * AGENT_RECOVERY_FACTOR) as usize;
        if effective == 0 {
            debug!("Skipping allocator recovery: no reconnecting agents to wait for");
            return;
        }

        self.expected_agent_count = Some(effective);
        self.pause();
        self.deferred.push(Deferred::ResumeAllocation {
            after: ALLOCATION_HOLD_OFF_RECOVERY_TIMEOUT,
        });

        info!(
            expected_agents = effective,
            hold_off_secs = ALLOCATION_HOLD_OFF_RECOVERY_TIMEOUT.as_secs(),
            "Triggered allocator recovery"
        );
    }

    // =========================================================================
    // Framework lifecycle
    // =========================================================================

    /// Registers a framework, attributing any pre-existing allocations.
    pub fn add_framework(
        &mut self,
        framework_id: &FrameworkId,
        info: FrameworkInfo,
        used: HashMap<AgentId, Resources>,
        active: bool,
        suppressed_roles: BTreeSet<RoleName>,
    ) {
        assert!(
            !self.frameworks.contains_key(framework_id),
            "framework {framework_id} already added"
        );

        let framework = Framework::new(info, suppressed_roles.clone(), active);
        let roles = framework.roles.clone();
        self.frameworks.insert(framework_id.clone(), framework);

        for role in &roles {
            self.track_framework_under_role(framework_id, role);

            let sorter = self
                .framework_sorters
                .get_mut(role)
                .expect("framework sorter exists for tracked role");

            if suppressed_roles.contains(role) {
                sorter.deactivate(framework_id.value());
                self.frameworks
                    .get_mut(framework_id)
                    .expect("framework just added")
                    .counters
                    .roles_suppressed += 1;
            } else {
                sorter.activate(framework_id.value());
            }
        }

        for (agent_id, resources) in used {
            // The master may report usage on agents it has not told us
            // about yet; those allocations are attributed when the agent
            // arrives.
            if !self.agents.contains_key(&agent_id) {
                continue;
            }

            self.track_allocated_resources(&agent_id, framework_id, &resources);
        }

        info!(framework_id = %framework_id, "Added framework");

        if active {
            self.request_allocation();
        } else {
            self.deactivate_framework(framework_id);
        }
    }

    /// Removes a framework. Its allocations must have been released via
    /// [`Self::recover_resources`] before or during removal.
    pub fn remove_framework(&mut self, framework_id: &FrameworkId) {
        let framework = self
            .frameworks
            .get(framework_id)
            .unwrap_or_else(|| panic!("framework {framework_id} not found"));

        let roles: Vec<RoleName> = framework.roles.iter().cloned().collect();

        for role in roles {
            // Might not be in the sorter because it was previously
            // deactivated and never re-added.
            let tracked = self
                .framework_sorters
                .get(&role)
                .is_some_and(|s| s.contains(framework_id.value()));
            if !tracked {
                continue;
            }

            let allocation = self.framework_sorters[&role].allocation(framework_id.value());
            for (agent_id, allocated) in allocation {
                self.untrack_allocated_resources(&agent_id, framework_id, &allocated);
            }

            self.untrack_framework_under_role(framework_id, &role);
        }

        let framework = self
            .frameworks
            .remove(framework_id)
            .expect("framework present");

        if self.config.publish_per_framework_metrics {
            self.completed_frameworks
                .push_back((framework_id.clone(), framework.counters));
            while self.completed_frameworks.len() > self.config.max_completed_frameworks {
                self.completed_frameworks.pop_front();
            }
        }

        info!(framework_id = %framework_id, "Removed framework");
    }

    /// Reactivates a framework after reconnection.
    pub fn activate_framework(&mut self, framework_id: &FrameworkId) {
        let framework = self
            .frameworks
            .get_mut(framework_id)
            .unwrap_or_else(|| panic!("framework {framework_id} not found"));

        framework.active = true;

        // Activate all roles except those the framework itself suppressed.
        let roles: Vec<RoleName> = framework
            .roles
            .iter()
            .filter(|role| !framework.suppressed_roles.contains(*role))
            .cloned()
            .collect();

        for role in roles {
            self.framework_sorters
                .get_mut(&role)
                .expect("framework sorter exists for subscribed role")
                .activate(framework_id.value());
        }

        info!(framework_id = %framework_id, "Activated framework");

        self.request_allocation();
    }

    /// Deactivates a framework (disconnect or failover), clearing its
    /// filters but keeping its allocations attributed.
    pub fn deactivate_framework(&mut self, framework_id: &FrameworkId) {
        let framework = self
            .frameworks
            .get_mut(framework_id)
            .unwrap_or_else(|| panic!("framework {framework_id} not found"));

        let roles: Vec<RoleName> = framework.roles.iter().cloned().collect();
        framework.active = false;

        // The sorters keep the framework's allocation: if it fails over
        // and reactivates, its fair share must still reflect what it
        // holds.
        framework.offer_filters.clear();
        framework.inverse_offer_filters.clear();

        for role in roles {
            self.framework_sorters
                .get_mut(&role)
                .expect("framework sorter exists for subscribed role")
                .deactivate(framework_id.value());
        }

        info!(framework_id = %framework_id, "Deactivated framework");
    }

    /// Applies a framework's re-subscription: role changes, capability
    /// changes, and the new suppression set.
    pub fn update_framework(
        &mut self,
        framework_id: &FrameworkId,
        info: FrameworkInfo,
        suppressed_roles: BTreeSet<RoleName>,
    ) {
        let framework = self
            .frameworks
            .get(framework_id)
            .unwrap_or_else(|| panic!("framework {framework_id} not found"));

        let old_roles = framework.roles.clone();
        let new_roles = info.roles.clone();

        for role in new_roles.difference(&old_roles) {
            // We may already track the framework under this role if it
            // unsubscribed earlier while keeping an allocation there.
            if !self.is_framework_tracked_under_role(framework_id, role) {
                self.track_framework_under_role(framework_id, role);
            }
        }

        for role in old_roles.difference(&new_roles) {
            let sorter = self
                .framework_sorters
                .get_mut(role)
                .expect("framework sorter exists for previously subscribed role");
            sorter.deactivate(framework_id.value());

            // Keep tracking the framework under the role while resources
            // remain allocated to it there.
            if sorter.allocation(framework_id.value()).is_empty() {
                self.untrack_framework_under_role(framework_id, role);
            }

            let framework = self
                .frameworks
                .get_mut(framework_id)
                .expect("framework present");
            framework.offer_filters.remove(role);
            framework.suppressed_roles.remove(role);
        }

        let framework = self
            .frameworks
            .get_mut(framework_id)
            .expect("framework present");
        framework.roles = new_roles.clone();
        framework.capabilities = info.capabilities;
        framework.min_allocatable_resources = info.min_allocatable_resources;

        self.suppress_roles(framework_id, &suppressed_roles);
        let unsuppress: BTreeSet<RoleName> =
            new_roles.difference(&suppressed_roles).cloned().collect();
        self.unsuppress_roles(framework_id, &unsuppress);

        let framework = &self.frameworks[framework_id];
        assert_eq!(
            framework.suppressed_roles, suppressed_roles,
            "suppressed roles diverged for framework {framework_id} after update"
        );
    }

    // =========================================================================
    // Agent lifecycle
    // =========================================================================

    /// Registers an agent with its total resources and any allocations
    /// already running on it.
    #[allow(clippy::too_many_arguments)]
    pub fn add_agent(
        &mut self,
        agent_id: &AgentId,
        info: AgentInfo,
        capabilities: AgentCapabilities,
        unavailability: Option<Unavailability>,
        total: Resources,
        used: HashMap<FrameworkId, Resources>,
    ) {
        assert!(
            !self.agents.contains_key(agent_id),
            "agent {agent_id} already added"
        );
        assert!(!self.paused || self.expected_agent_count.is_some());

        let allocated = used
            .values()
            .fold(Resources::new(), |acc, r| acc + r);

        let mut agent = Agent::new(info, capabilities, total.clone(), allocated);
        if let Some(unavailability) = unavailability {
            agent.maintenance = Some(Maintenance::new(unavailability));
        }
        self.agents.insert(agent_id.clone(), agent);

        self.track_reservations(&total.reservations());

        self.role_sorter.add_total(agent_id, &total);
        for sorter in self.framework_sorters.values_mut() {
            sorter.add_total(agent_id, &total);
        }
        // Revocable resources cannot satisfy guarantees, so the quota
        // sorter's denominators exclude them.
        self.quota_role_sorter
            .add_total(agent_id, &total.non_revocable());

        for (framework_id, allocation) in used {
            // A framework recovered from this agent may not have
            // reregistered yet; the master adds it imminently and the gap
            // self-heals, at the cost of briefly under-accounting the
            // role's share.
            if !self.frameworks.contains_key(&framework_id) {
                continue;
            }

            self.track_allocated_resources(agent_id, &framework_id, &allocation);
        }

        if self.paused {
            if let Some(expected) = self.expected_agent_count {
                if self.agents.len() >= expected {
                    debug!(
                        agents = self.agents.len(),
                        "Recovery complete: sufficient amount of agents added"
                    );
                    self.expected_agent_count = None;
                    self.resume();
                }
            }
        }

        let agent = &self.agents[agent_id];
        info!(
            agent_id = %agent_id,
            hostname = %agent.info.hostname,
            total = %agent.total(),
            allocated = %agent.allocated(),
            "Added agent"
        );

        self.request_allocation_on(agent_id);
    }

    /// Removes an agent.
    ///
    /// Framework-sorter allocations attributed to the agent are left in
    /// place: the master follows up with [`Self::recover_resources`] for
    /// each outstanding allocation, which is when they are released.
    pub fn remove_agent(&mut self, agent_id: &AgentId) {
        let total = self
            .agents
            .get(agent_id)
            .unwrap_or_else(|| panic!("agent {agent_id} not found"))
            .total()
            .clone();

        self.role_sorter.remove_total(agent_id, &total);
        for sorter in self.framework_sorters.values_mut() {
            sorter.remove_total(agent_id, &total);
        }
        self.quota_role_sorter
            .remove_total(agent_id, &total.non_revocable());

        self.untrack_reservations(&total.reservations());

        self.agents.remove(agent_id);
        self.allocation_candidates.remove(agent_id);

        self.remove_filters_for_agent(agent_id);

        info!(agent_id = %agent_id, "Removed agent");
    }

    /// Applies an agent's re-registration: attribute, capability, or total
    /// changes.
    pub fn update_agent(
        &mut self,
        agent_id: &AgentId,
        info: AgentInfo,
        total: Option<Resources>,
        capabilities: Option<AgentCapabilities>,
    ) {
        let agent = self
            .agents
            .get_mut(agent_id)
            .unwrap_or_else(|| panic!("agent {agent_id} not found"));

        let mut updated = false;

        // Schedulers may have declined offers based on attributes that no
        // longer hold; drop their standing filters so they reassess.
        let attributes_changed = agent.info.attributes != info.attributes;

        if agent.info != info {
            updated = true;
            agent.info = info;
        }

        if let Some(new_capabilities) = capabilities {
            let old_capabilities = agent.capabilities;
            agent.capabilities = new_capabilities;

            if new_capabilities != old_capabilities {
                updated = true;
                info!(
                    agent_id = %agent_id,
                    ?new_capabilities,
                    "Agent updated with new capabilities"
                );
            }
        }

        if attributes_changed {
            self.remove_filters_for_agent(agent_id);
        }

        if let Some(total) = total {
            let total_changed = self.update_agent_total(agent_id, total);
            updated = updated || total_changed;

            if total_changed {
                let agent = &self.agents[agent_id];
                info!(
                    agent_id = %agent_id,
                    total = %agent.total(),
                    "Agent updated with new total resources"
                );
            }
        }

        if updated {
            self.request_allocation_on(agent_id);
        }
    }

    /// Grows an agent by an attached resource provider's resources.
    pub fn add_resource_provider(
        &mut self,
        agent_id: &AgentId,
        total: Resources,
        used: HashMap<FrameworkId, Resources>,
    ) {
        assert!(
            self.agents.contains_key(agent_id),
            "agent {agent_id} not found"
        );

        let used_sum = used
            .values()
            .fold(Resources::new(), |acc, r| acc + r);

        for (framework_id, allocation) in used {
            if !self.frameworks.contains_key(&framework_id) {
                continue;
            }

            self.track_allocated_resources(agent_id, &framework_id, &allocation);
        }

        let new_total = self.agents[agent_id].total().clone() + &total;
        self.update_agent_total(agent_id, new_total);
        self.agents
            .get_mut(agent_id)
            .expect("agent present")
            .allocate(&used_sum);

        debug!(
            agent_id = %agent_id,
            grown_by = %total,
            used = %used_sum,
            "Grew agent by resource provider"
        );
    }

    /// Marks an agent eligible for offers again.
    pub fn activate_agent(&mut self, agent_id: &AgentId) {
        self.agents
            .get_mut(agent_id)
            .unwrap_or_else(|| panic!("agent {agent_id} not found"))
            .activated = true;

        info!(agent_id = %agent_id, "Agent reactivated");
    }

    /// Stops offering an agent's resources (e.g. agent disconnected).
    pub fn deactivate_agent(&mut self, agent_id: &AgentId) {
        self.agents
            .get_mut(agent_id)
            .unwrap_or_else(|| panic!("agent {agent_id} not found"))
            .activated = false;

        info!(agent_id = %agent_id, "Agent deactivated");
    }

    /// Replaces the agent whitelist. `None` admits all agents.
    pub fn update_whitelist(&mut self, whitelist: Option<HashSet<String>>) {
        self.whitelist = whitelist;

        match &self.whitelist {
            Some(hostnames) => {
                info!(hostnames = hostnames.len(), "Updated agent whitelist");
                if hostnames.is_empty() {
                    warn!("Whitelist is empty, no offers will be made!");
                }
            }
            None => info!("Advertising offers for all agents"),
        }
    }

    // =========================================================================
    // Allocation bookkeeping driven by the master
    // =========================================================================

    /// Acknowledges a framework's resource request. Allocation is purely
    /// offer-driven; the request is logged and dropped.
    pub fn request_resources(&mut self, framework_id: &FrameworkId, requests: &[ResourceRequest]) {
        info!(
            framework_id = %framework_id,
            requests = requests.len(),
            "Received resource request from framework"
        );
    }

    /// Applies the conversions a framework performed on offered resources
    /// (reservations, unreservations) to every accounting structure.
    pub fn update_allocation(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        offered: Resources,
        conversions: &[ResourceConversion],
    ) {
        assert!(
            self.agents.contains_key(agent_id),
            "agent {agent_id} not found"
        );
        assert!(
            self.frameworks.contains_key(framework_id),
            "framework {framework_id} not found"
        );

        // An allocation is tied to a single role.
        assert!(offered.is_allocated(), "offered resources lack allocation roles");
        let allocations = offered.allocations();
        assert_eq!(1, allocations.len(), "offered resources span multiple roles");
        let role = allocations.keys().next().expect("one role").clone();

        let framework_sorter = self
            .framework_sorters
            .get_mut(&role)
            .unwrap_or_else(|| panic!("no framework sorter for role {role}"));

        let framework_allocation =
            framework_sorter.allocation_of(framework_id.value(), agent_id);

        let updated_offered = offered
            .apply_conversions(conversions)
            .expect("conversions apply to offered resources");

        // Update the per-agent allocation.
        {
            let agent = self.agents.get_mut(agent_id).expect("agent present");
            agent.unallocate(&offered);
            agent.allocate(&updated_offered);
        }

        let framework_sorter = self
            .framework_sorters
            .get_mut(&role)
            .expect("framework sorter present");
        framework_sorter.update(framework_id.value(), agent_id, &offered, &updated_offered);

        self.role_sorter
            .update(role.as_str(), agent_id, &offered, &updated_offered);

        if self.quota_guarantees.contains_key(&role) {
            self.quota_role_sorter.update(
                role.as_str(),
                agent_id,
                &offered.non_revocable(),
                &updated_offered.non_revocable(),
            );
        }

        // Strip allocation roles so the conversions apply against the
        // agent's (unallocated) total. Conversions that only add resources
        // (shared-volume bookkeeping) do not touch the total; conversions
        // that remove their consumed resources shrink it.
        let mut removed = Resources::new();
        let mut stripped: Vec<ResourceConversion> = Vec::new();
        for conversion in conversions {
            if conversion.consumed.is_empty() {
                continue;
            }
            if conversion.converted.is_empty() {
                removed += &conversion.consumed;
            }
            stripped.push(conversion.unallocated());
        }

        let updated_total = self.agents[agent_id]
            .total()
            .apply_conversions(&stripped)
            .expect("conversions apply to agent total");
        self.update_agent_total(agent_id, updated_total);

        let updated_framework_allocation = self
            .framework_sorters
            .get(&role)
            .expect("framework sorter present")
            .allocation_of(framework_id.value(), agent_id);

        // The quantities that left the framework's allocation must be
        // exactly the quantities the conversions removed.
        let removed_allocation = framework_allocation.scalar_quantities()
            - &updated_framework_allocation.scalar_quantities();
        assert_eq!(
            removed_allocation,
            removed.scalar_quantities(),
            "allocation and conversion quantities diverged for framework {framework_id}"
        );

        info!(
            framework_id = %framework_id,
            agent_id = %agent_id,
            from = %framework_allocation,
            to = %updated_framework_allocation,
            "Updated allocation of framework"
        );
    }

    /// Applies operator-initiated operations to an agent's unused
    /// resources. Fails (without changes) when the operations no longer
    /// apply, e.g. because an allocation raced them.
    pub fn update_available(
        &mut self,
        agent_id: &AgentId,
        operations: &[Operation],
    ) -> Result<(), ResourceError> {
        let agent = self
            .agents
            .get(agent_id)
            .unwrap_or_else(|| panic!("agent {agent_id} not found"));

        // An `allocate` dispatched just before this call may have claimed
        // the resources these operations target; failing here lets the
        // master retry or abort its operation.
        if let Err(e) = agent.available().apply_operations(operations) {
            debug!(agent_id = %agent_id, error = %e, "Failed to update available resources");
            return Err(e);
        }

        let updated_total = agent
            .total()
            .apply_operations(operations)
            .expect("operations apply to total once they apply to available");

        self.update_agent_total(agent_id, updated_total);
        Ok(())
    }

    /// Replaces an agent's unavailability window.
    pub fn update_unavailability(
        &mut self,
        agent_id: &AgentId,
        unavailability: Option<Unavailability>,
    ) {
        assert!(
            self.agents.contains_key(agent_id),
            "agent {agent_id} not found"
        );

        // Force frameworks to reassess their inverse-offer decisions:
        // interleaved unavailability schedules can change failure-domain
        // math entirely.
        for framework in self.frameworks.values_mut() {
            framework.inverse_offer_filters.remove(agent_id);
        }

        let agent = self.agents.get_mut(agent_id).expect("agent present");
        agent.maintenance = unavailability.map(Maintenance::new);

        self.request_allocation_on(agent_id);
    }

    /// Processes a framework's response to an inverse offer.
    pub fn update_inverse_offer(
        &mut self,
        agent_id: &AgentId,
        framework_id: &FrameworkId,
        _unavailable_resources: Option<UnavailableResources>,
        status: Option<InverseOfferStatus>,
        refusal: Option<Refusal>,
    ) {
        assert!(
            self.frameworks.contains_key(framework_id),
            "framework {framework_id} not found"
        );

        let agent = self
            .agents
            .get_mut(agent_id)
            .unwrap_or_else(|| panic!("agent {agent_id} not found"));

        let maintenance = agent
            .maintenance
            .as_mut()
            .unwrap_or_else(|| panic!("agent {agent_id} has no maintenance scheduled"));

        // Only handle inverse offers currently outstanding; anything else
        // is stale and safely ignored.
        if maintenance.offers_outstanding.remove(framework_id) {
            // `status` present means the framework responded; absent means
            // the inverse offer timed out or was rescinded.
            if let Some(status) = status {
                maintenance.statuses.insert(framework_id.clone(), status);
            }
        }

        let Some(refusal) = refusal else {
            return;
        };

        let timeout = refusal.timeout();
        if timeout.is_zero() {
            return;
        }

        debug!(
            framework_id = %framework_id,
            agent_id = %agent_id,
            timeout_secs = timeout.as_secs_f64(),
            "Framework filtered inverse offers from agent"
        );

        let filter_id = self.next_filter_id();
        self.frameworks
            .get_mut(framework_id)
            .expect("framework present")
            .inverse_offer_filters
            .entry(agent_id.clone())
            .or_default()
            .push(InverseOfferFilter { id: filter_id });

        self.deferred.push(Deferred::ExpireInverseOfferFilter {
            framework_id: framework_id.clone(),
            agent_id: agent_id.clone(),
            filter_id,
            after: timeout,
        });
    }

    /// The most recent inverse-offer response per (agent, framework).
    pub fn inverse_offer_statuses(
        &self,
    ) -> BTreeMap<AgentId, HashMap<FrameworkId, InverseOfferStatus>> {
        self.agents
            .iter()
            .filter_map(|(agent_id, agent)| {
                agent
                    .maintenance
                    .as_ref()
                    .map(|m| (agent_id.clone(), m.statuses.clone()))
            })
            .collect()
    }

    /// Returns declined or unused resources to the pool, optionally
    /// installing a refusal filter.
    pub fn recover_resources(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: Resources,
        refusal: Option<Refusal>,
    ) {
        if resources.is_empty() {
            return;
        }

        // Resources are recovered within a single allocation role;
        // filtering across roles in one call is not meaningful.
        assert!(resources.is_allocated(), "recovered resources lack allocation roles");
        let allocations = resources.allocations();
        assert_eq!(1, allocations.len(), "recovered resources span multiple roles");
        let role = allocations.keys().next().expect("one role").clone();

        // The framework may already be gone: an offer dispatched before
        // its removal recovers here afterwards.
        if self.frameworks.contains_key(framework_id) {
            let sorter = self
                .framework_sorters
                .get(&role)
                .unwrap_or_else(|| panic!("no framework sorter for role {role}"));

            if sorter.contains(framework_id.value()) {
                self.untrack_allocated_resources(agent_id, framework_id, &resources);

                // Stop tracking the framework under this role once it is
                // neither subscribed nor holding resources there.
                let framework = &self.frameworks[framework_id];
                let sorter = &self.framework_sorters[&role];
                if !framework.roles.contains(&role)
                    && sorter.allocation(framework_id.value()).is_empty()
                {
                    self.untrack_framework_under_role(framework_id, &role);
                }
            }
        }

        // The agent may likewise be gone already.
        if let Some(agent) = self.agents.get_mut(agent_id) {
            assert!(
                agent.allocated().contains(&resources),
                "agent {agent_id} allocation does not contain recovered {resources}"
            );

            agent.unallocate(&resources);

            debug!(
                agent_id = %agent_id,
                framework_id = %framework_id,
                recovered = %resources,
                total = %agent.total(),
                allocated = %agent.allocated(),
                "Recovered resources on agent"
            );
        }

        let Some(refusal) = refusal else {
            return;
        };

        if !self.frameworks.contains_key(framework_id) || !self.agents.contains_key(agent_id) {
            return;
        }

        let timeout = refusal.timeout();
        if timeout.is_zero() {
            return;
        }

        // Expire only after both the refusal window and an allocation
        // interval have passed; otherwise the filter could lapse before
        // the next periodic pass even considers this agent.
        let timeout = timeout.max(self.config.allocation_interval);

        debug!(
            framework_id = %framework_id,
            agent_id = %agent_id,
            timeout_secs = timeout.as_secs_f64(),
            "Framework filtered agent"
        );

        // Filters compare against unallocated resources: the engine
        // consults them before attaching an allocation role.
        let mut unallocated = resources;
        unallocated.unallocate();

        let filter_id = self.next_filter_id();
        self.frameworks
            .get_mut(framework_id)
            .expect("framework present")
            .offer_filters
            .entry(role.clone())
            .or_default()
            .entry(agent_id.clone())
            .or_default()
            .push(OfferFilter {
                id: filter_id,
                resources: unallocated,
            });

        self.deferred.push(Deferred::ExpireOfferFilter {
            framework_id: framework_id.clone(),
            role,
            agent_id: agent_id.clone(),
            filter_id,
            after: timeout,
        });
    }

    // =========================================================================
    // Suppression and revival
    // =========================================================================

    /// Stops offering the given roles to a framework.
    pub fn suppress_roles(&mut self, framework_id: &FrameworkId, roles: &BTreeSet<RoleName>) {
        assert!(
            self.frameworks.contains_key(framework_id),
            "framework {framework_id} not found"
        );

        for role in roles {
            self.framework_sorters
                .get_mut(role)
                .unwrap_or_else(|| panic!("no framework sorter for role {role}"))
                .deactivate(framework_id.value());

            let framework = self
                .frameworks
                .get_mut(framework_id)
                .expect("framework present");
            framework.suppressed_roles.insert(role.clone());
            framework.counters.roles_suppressed += 1;
        }

        info!(
            framework_id = %framework_id,
            roles = roles.len(),
            "Suppressed offers for roles of framework"
        );
    }

    /// Resumes offering the given roles to a framework.
    pub fn unsuppress_roles(&mut self, framework_id: &FrameworkId, roles: &BTreeSet<RoleName>) {
        assert!(
            self.frameworks.contains_key(framework_id),
            "framework {framework_id} not found"
        );

        for role in roles {
            self.framework_sorters
                .get_mut(role)
                .unwrap_or_else(|| panic!("no framework sorter for role {role}"))
                .activate(framework_id.value());

            let framework = self
                .frameworks
                .get_mut(framework_id)
                .expect("framework present");
            framework.suppressed_roles.remove(role);
            framework.counters.roles_revived += 1;
        }

        info!(
            framework_id = %framework_id,
            roles = roles.len(),
            "Unsuppressed offers for roles of framework"
        );
    }

    /// Suppresses offers for the given roles, or every subscribed role
    /// when `roles` is empty.
    pub fn suppress_offers(&mut self, framework_id: &FrameworkId, roles: BTreeSet<RoleName>) {
        let roles = if roles.is_empty() {
            self.frameworks
                .get(framework_id)
                .unwrap_or_else(|| panic!("framework {framework_id} not found"))
                .roles
                .clone()
        } else {
            roles
        };

        self.suppress_roles(framework_id, &roles);
    }

    /// Clears filters and suppression for the given roles (or all) and
    /// triggers an allocation.
    pub fn revive_offers(&mut self, framework_id: &FrameworkId, roles: BTreeSet<RoleName>) {
        let framework = self
            .frameworks
            .get_mut(framework_id)
            .unwrap_or_else(|| panic!("framework {framework_id} not found"));

        framework.inverse_offer_filters.clear();

        let roles = if roles.is_empty() {
            framework.roles.clone()
        } else {
            roles
        };

        for role in &roles {
            framework.offer_filters.remove(role);
        }

        self.unsuppress_roles(framework_id, &roles);

        info!(
            framework_id = %framework_id,
            roles = roles.len(),
            "Revived roles of framework"
        );

        self.request_allocation();
    }

    // =========================================================================
    // Quota and weights
    // =========================================================================

    /// Sets the quota guarantee for a top-level role. Panics if a quota is
    /// already present; updating quota is a remove + set.
    pub fn set_quota(&mut self, role: &RoleName, guarantee: ResourceQuantities) {
        assert!(
            !role.is_hierarchical(),
            "quota set on non-top-level role {role}"
        );
        assert!(
            !self.quota_guarantees.contains_key(role),
            "quota already set for role {role}"
        );

        self.quota_guarantees
            .insert(role.clone(), guarantee.clone());
        self.quota_role_sorter.add_client(role.as_str());
        self.quota_role_sorter.activate(role.as_str());

        // Carry over any allocation the role accumulated before quota was
        // set.
        if self.role_sorter.contains(role.as_str()) {
            for (agent_id, resources) in self.role_sorter.allocation(role.as_str()) {
                self.quota_role_sorter
                    .allocated(role.as_str(), &agent_id, &resources.non_revocable());
            }
        }

        info!(role = %role, guarantee = %guarantee, "Set quota for role");

        // Quota changes do not rebalance already-offered resources, so no
        // allocation is triggered; the change shows up in the next run.
    }

    /// Removes the quota guarantee from a role.
    pub fn remove_quota(&mut self, role: &RoleName) {
        let guarantee = self
            .quota_guarantees
            .remove(role)
            .unwrap_or_else(|| panic!("no quota set for role {role}"));

        self.quota_role_sorter.remove_client(role.as_str());

        info!(role = %role, guarantee = %guarantee, "Removed quota for role");
    }

    /// Updates role weights in both role sorters.
    pub fn update_weights(&mut self, weights: &[(RoleName, f64)]) {
        for (role, weight) in weights {
            self.quota_role_sorter.update_weight(role.as_str(), *weight);
            self.role_sorter.update_weight(role.as_str(), *weight);
        }

        // Weight changes, like quota changes, only affect subsequent
        // allocations.
    }

    // =========================================================================
    // Pause / resume / triggering
    // =========================================================================

    /// Suspends allocation runs.
    pub fn pause(&mut self) {
        if !self.paused {
            debug!("Allocation paused");
            self.paused = true;
        }
    }

    /// Resumes allocation runs.
    pub fn resume(&mut self) {
        if self.paused {
            debug!("Allocation resumed");
            self.paused = false;
        }
    }

    /// Requests an allocation run over every agent.
    pub fn request_allocation(&mut self) {
        if self.paused {
            debug!("Skipped allocation request because the allocator is paused");
            return;
        }

        let agent_ids: Vec<AgentId> = self.agents.keys().cloned().collect();
        self.allocation_candidates.extend(agent_ids);
        self.allocation_pending = true;
    }

    /// Requests an allocation run over a single agent.
    pub fn request_allocation_on(&mut self, agent_id: &AgentId) {
        if self.paused {
            debug!("Skipped allocation request because the allocator is paused");
            return;
        }

        self.allocation_candidates.insert(agent_id.clone());
        self.allocation_pending = true;
    }

    /// Returns true if a requested run has not executed yet.
    #[must_use]
    pub fn has_pending_allocation(&self) -> bool {
        self.allocation_pending
    }

    // =========================================================================
    // Filter expiry (invoked by the worker's timers)
    // =========================================================================

    /// Removes an offer filter by identity; a no-op when the filter was
    /// already dropped (revive, deactivation, agent change).
    pub fn expire_offer_filter(
        &mut self,
        framework_id: &FrameworkId,
        role: &RoleName,
        agent_id: &AgentId,
        filter_id: FilterId,
    ) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        let Some(role_filters) = framework.offer_filters.get_mut(role) else {
            return;
        };
        let Some(agent_filters) = role_filters.get_mut(agent_id) else {
            return;
        };

        agent_filters.retain(|f| f.id != filter_id);
        if agent_filters.is_empty() {
            role_filters.remove(agent_id);
        }
        if role_filters.is_empty() {
            framework.offer_filters.remove(role);
        }
    }

    /// Removes an inverse offer filter by identity; a no-op when already
    /// dropped.
    pub fn expire_inverse_offer_filter(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        filter_id: FilterId,
    ) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        let Some(filters) = framework.inverse_offer_filters.get_mut(agent_id) else {
            return;
        };

        filters.retain(|f| f.id != filter_id);
        if filters.is_empty() {
            framework.inverse_offer_filters.remove(agent_id);
        }
    }

    /// Drains the timer work recorded since the last drain.
    pub fn take_deferred(&mut self) -> Vec<Deferred> {
        std::mem::take(&mut self.deferred)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Looks up a framework.
    #[must_use]
    pub fn framework(&self, framework_id: &FrameworkId) -> Option<&Framework> {
        self.frameworks.get(framework_id)
    }

    /// Looks up an agent.
    #[must_use]
    pub fn agent(&self, agent_id: &AgentId) -> Option<&Agent> {
        self.agents.get(agent_id)
    }

    /// The roles currently tracked, with their frameworks.
    #[must_use]
    pub fn tracked_roles(&self) -> &HashMap<RoleName, HashSet<FrameworkId>> {
        &self.roles
    }

    /// The quota guarantee for a role, if set.
    #[must_use]
    pub fn quota_guarantee(&self, role: &RoleName) -> Option<&ResourceQuantities> {
        self.quota_guarantees.get(role)
    }

    /// Aggregated reserved quantities for a role (including descendants).
    #[must_use]
    pub fn reservation_quantities(&self, role: &RoleName) -> Option<&ResourceQuantities> {
        self.reservation_scalar_quantities.get(role)
    }

    /// The cluster-level role sorter.
    #[must_use]
    pub fn role_sorter(&self) -> &dyn Sorter {
        self.role_sorter.as_ref()
    }

    /// The quota-role sorter.
    #[must_use]
    pub fn quota_role_sorter(&self) -> &dyn Sorter {
        self.quota_role_sorter.as_ref()
    }

    /// The framework sorter for a role, if the role is tracked.
    #[must_use]
    pub fn framework_sorter(&self, role: &RoleName) -> Option<&dyn Sorter> {
        self.framework_sorters.get(role).map(|s| s.as_ref())
    }

    /// Counter shells of removed frameworks, oldest first.
    #[must_use]
    pub fn completed_frameworks(&self) -> &VecDeque<(FrameworkId, FrameworkCounters)> {
        &self.completed_frameworks
    }

    /// Cumulative run counters.
    #[must_use]
    pub fn stats(&self) -> &AllocatorStats {
        &self.stats
    }

    /// Active offer filter count for a role, across frameworks.
    #[must_use]
    pub fn active_offer_filters(&self, role: &RoleName) -> usize {
        self.frameworks
            .values()
            .filter_map(|f| f.offer_filters.get(role))
            .map(|agents| agents.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn next_filter_id(&mut self) -> FilterId {
        self.next_filter_id += 1;
        self.next_filter_id
    }

    fn is_framework_tracked_under_role(
        &self,
        framework_id: &FrameworkId,
        role: &RoleName,
    ) -> bool {
        self.roles
            .get(role)
            .is_some_and(|frameworks| frameworks.contains(framework_id))
    }

    fn track_framework_under_role(&mut self, framework_id: &FrameworkId, role: &RoleName) {
        // First framework under this role: initialize role state.
        if !self.roles.contains_key(role) {
            self.roles.insert(role.clone(), HashSet::new());

            assert!(!self.role_sorter.contains(role.as_str()));
            self.role_sorter.add_client(role.as_str());
            self.role_sorter.activate(role.as_str());

            assert!(!self.framework_sorters.contains_key(role));
            let mut sorter = (self.sorter_factory)();
            for (agent_id, agent) in &self.agents {
                sorter.add_total(agent_id, agent.total());
            }
            self.framework_sorters.insert(role.clone(), sorter);
        }

        let tracked = self.roles.get_mut(role).expect("role present");
        assert!(
            tracked.insert(framework_id.clone()),
            "framework {framework_id} already tracked under role {role}"
        );

        let sorter = self
            .framework_sorters
            .get_mut(role)
            .expect("framework sorter present");
        assert!(!sorter.contains(framework_id.value()));
        sorter.add_client(framework_id.value());
    }

    fn untrack_framework_under_role(&mut self, framework_id: &FrameworkId, role: &RoleName) {
        let tracked = self
            .roles
            .get_mut(role)
            .unwrap_or_else(|| panic!("role {role} not tracked"));
        assert!(
            tracked.remove(framework_id),
            "framework {framework_id} not tracked under role {role}"
        );

        let sorter = self
            .framework_sorters
            .get_mut(role)
            .unwrap_or_else(|| panic!("no framework sorter for role {role}"));
        assert!(sorter.contains(framework_id.value()));
        sorter.remove_client(framework_id.value());

        // Cleanup when the last framework leaves. Many role names come
        // and go over a cluster's lifetime; leaving sorter state behind
        // for each would leak. The quota-role sorter is untouched: a
        // quota'ed role shapes allocation with or without frameworks.
        if tracked.is_empty() {
            assert_eq!(self.framework_sorters[role].count(), 0);

            self.roles.remove(role);
            self.role_sorter.remove_client(role.as_str());
            self.framework_sorters.remove(role);
        }
    }

    fn track_reservations(&mut self, reservations: &BTreeMap<RoleName, Resources>) {
        for (role, resources) in reservations {
            let quantities = resources.scalars().scalar_quantities();
            if quantities.is_empty() {
                continue;
            }

            // Reservations count against the role and every ancestor.
            *self
                .reservation_scalar_quantities
                .entry(role.clone())
                .or_default() += &quantities;
            for ancestor in role.ancestors() {
                *self
                    .reservation_scalar_quantities
                    .entry(ancestor)
                    .or_default() += &quantities;
            }
        }
    }

    fn untrack_reservations(&mut self, reservations: &BTreeMap<RoleName, Resources>) {
        for (role, resources) in reservations {
            let quantities = resources.scalars().scalar_quantities();
            if quantities.is_empty() {
                continue;
            }

            let mut chain = vec![role.clone()];
            chain.extend(role.ancestors());

            for r in chain {
                let tracked = self
                    .reservation_scalar_quantities
                    .get_mut(&r)
                    .unwrap_or_else(|| panic!("no tracked reservations for role {r}"));
                assert!(
                    tracked.contains(&quantities),
                    "tracked reservations for role {r} do not contain {quantities}"
                );

                *tracked -= &quantities;
                if tracked.is_empty() {
                    self.reservation_scalar_quantities.remove(&r);
                }
            }
        }
    }

    /// Swaps an agent's total in every sorter and the reservation
    /// tracker. Returns false when the total is unchanged.
    fn update_agent_total(&mut self, agent_id: &AgentId, total: Resources) -> bool {
        let agent = self
            .agents
            .get_mut(agent_id)
            .unwrap_or_else(|| panic!("agent {agent_id} not found"));

        let old_total = agent.total().clone();
        if old_total == total {
            return false;
        }

        agent.update_total(total.clone());

        let old_reservations = old_total.reservations();
        let new_reservations = total.reservations();
        if old_reservations != new_reservations {
            self.untrack_reservations(&old_reservations);
            self.track_reservations(&new_reservations);
        }

        self.role_sorter.remove_total(agent_id, &old_total);
        self.role_sorter.add_total(agent_id, &total);

        for sorter in self.framework_sorters.values_mut() {
            sorter.remove_total(agent_id, &old_total);
            sorter.add_total(agent_id, &total);
        }

        self.quota_role_sorter
            .remove_total(agent_id, &old_total.non_revocable());
        self.quota_role_sorter
            .add_total(agent_id, &total.non_revocable());

        true
    }

    /// Attributes an allocation to (framework, role) in every sorter,
    /// lazily tracking the framework under roles it only holds resources
    /// in.
    fn track_allocated_resources(
        &mut self,
        agent_id: &AgentId,
        framework_id: &FrameworkId,
        allocated: &Resources,
    ) {
        assert!(self.agents.contains_key(agent_id));
        assert!(self.frameworks.contains_key(framework_id));
        assert!(
            allocated.is_allocated(),
            "tracked resources lack allocation roles"
        );

        for (role, allocation) in allocated.allocations() {
            if !self.is_framework_tracked_under_role(framework_id, &role) {
                self.track_framework_under_role(framework_id, &role);
            }

            self.role_sorter
                .allocated(role.as_str(), agent_id, &allocation);
            self.framework_sorters
                .get_mut(&role)
                .expect("framework sorter present")
                .allocated(framework_id.value(), agent_id, &allocation);

            if self.quota_guarantees.contains_key(&role) {
                self.quota_role_sorter.allocated(
                    role.as_str(),
                    agent_id,
                    &allocation.non_revocable(),
                );
            }
        }
    }

    /// Releases an allocation from every sorter.
    ///
    /// The agent may already be removed: `remove_agent` leaves framework
    /// allocations behind for the master's follow-up recovery, so no
    /// agent-presence assertion is made here.
    fn untrack_allocated_resources(
        &mut self,
        agent_id: &AgentId,
        framework_id: &FrameworkId,
        allocated: &Resources,
    ) {
        assert!(self.frameworks.contains_key(framework_id));

        for (role, allocation) in allocated.allocations() {
            assert!(self.role_sorter.contains(role.as_str()));
            let sorter = self
                .framework_sorters
                .get_mut(&role)
                .unwrap_or_else(|| panic!("no framework sorter for role {role}"));
            assert!(sorter.contains(framework_id.value()));

            sorter.unallocated(framework_id.value(), agent_id, &allocation);
            self.role_sorter
                .unallocated(role.as_str(), agent_id, &allocation);

            if self.quota_guarantees.contains_key(&role) {
                self.quota_role_sorter.unallocated(
                    role.as_str(),
                    agent_id,
                    &allocation.non_revocable(),
                );
            }
        }
    }

    /// Drops every filter that references an agent.
    fn remove_filters_for_agent(&mut self, agent_id: &AgentId) {
        for framework in self.frameworks.values_mut() {
            framework.inverse_offer_filters.remove(agent_id);

            for filters in framework.offer_filters.values_mut() {
                filters.remove(agent_id);
            }
            framework
                .offer_filters
                .retain(|_, filters| !filters.is_empty());
        }

        debug!(agent_id = %agent_id, "Removed all filters for agent");
    }

    fn is_whitelisted(&self, agent_id: &AgentId) -> bool {
        let agent = &self.agents[agent_id];
        match &self.whitelist {
            None => true,
            Some(hostnames) => hostnames.contains(&agent.info.hostname),
        }
    }

    /// True when the agent sits in a different region than the master.
    fn is_remote_agent(&self, agent: &Agent) -> bool {
        match (&self.config.region, &agent.info.region) {
            (Some(master_region), Some(agent_region)) => master_region != agent_region,
            // Without a configured region on either side, nothing is
            // remote.
            _ => false,
        }
    }

    /// Capability gate: can this framework receive this agent at all?
    fn is_capable_of_receiving_agent(
        &self,
        capabilities: &FrameworkCapabilities,
        agent: &Agent,
    ) -> bool {
        // Keep GPU agents for GPU-aware frameworks, so scarce accelerators
        // are not buried in general-purpose offers.
        if self.config.filter_gpu_resources && !capabilities.gpu_resources && agent.has_gpus() {
            return false;
        }

        if !capabilities.region_aware && self.is_remote_agent(agent) {
            return false;
        }

        true
    }

    /// Removes resources the framework cannot understand or hold.
    fn strip_incapable_resources(
        &self,
        resources: Resources,
        capabilities: &FrameworkCapabilities,
    ) -> Resources {
        resources.filter(|resource| {
            if !capabilities.shared_resources && resource.shared {
                return false;
            }

            if !capabilities.revocable_resources && resource.revocable {
                return false;
            }

            // Refined reservation stacks are not expressible to frameworks
            // without the capability; hiding intermediate reservations
            // would make later reserve/unreserve operations ambiguous.
            if !capabilities.reservation_refinement && resource.has_refined_reservation() {
                return false;
            }

            true
        })
    }

    /// True when a standing or implicit filter suppresses this offer.
    fn is_offer_filtered(
        &self,
        framework_id: &FrameworkId,
        role: &RoleName,
        agent_id: &AgentId,
        resources: &Resources,
    ) -> bool {
        let framework = &self.frameworks[framework_id];
        let agent = &self.agents[agent_id];

        // A MULTI_ROLE framework cannot consume offers from an agent that
        // does not understand multi-role allocations.
        if framework.capabilities.multi_role && !agent.capabilities.multi_role {
            warn!(
                agent_id = %agent_id,
                framework_id = %framework_id,
                "Implicitly filtering agent from framework: framework is MULTI_ROLE capable but the agent is not"
            );
            return true;
        }

        if role.is_hierarchical() && !agent.capabilities.hierarchical_role {
            warn!(
                agent_id = %agent_id,
                role = %role,
                "Implicitly filtering agent from role: the role is hierarchical but the agent is not HIERARCHICAL_ROLE capable"
            );
            return true;
        }

        let Some(role_filters) = framework.offer_filters.get(role) else {
            return false;
        };
        let Some(agent_filters) = role_filters.get(agent_id) else {
            return false;
        };

        for filter in agent_filters {
            if filter.filters(resources) {
                debug!(
                    agent_id = %agent_id,
                    framework_id = %framework_id,
                    role = %role,
                    resources = %resources,
                    "Filtered offer",
                );
                return true;
            }
        }

        false
    }

    /// True when a standing inverse-offer filter suppresses this agent.
    fn is_inverse_offer_filtered(&self, framework_id: &FrameworkId, agent_id: &AgentId) -> bool {
        let framework = &self.frameworks[framework_id];

        if framework
            .inverse_offer_filters
            .get(agent_id)
            .is_some_and(|filters| !filters.is_empty())
        {
            debug!(
                agent_id = %agent_id,
                framework_id = %framework_id,
                "Filtered unavailability on agent"
            );
            return true;
        }

        false
    }

    /// Minimum-offer-size gate: empty offers never pass; otherwise the
    /// framework's per-role requirement (or the global default) must be
    /// met by any one quantity set.
    fn allocatable(&self, resources: &Resources, role: &RoleName, framework: &Framework) -> bool {
        if resources.is_empty() {
            return false;
        }

        let requirements = framework
            .min_allocatable_resources
            .get(role)
            .unwrap_or(&self.config.min_allocatable_resources);

        if requirements.is_empty() {
            return true;
        }

        requirements
            .iter()
            .any(|quantities| resources.contains_quantities(quantities))
    }
}

// =============================================================================
// Tests
// =============================================================================
