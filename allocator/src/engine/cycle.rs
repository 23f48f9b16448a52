//! The allocation run: two-stage offer carving plus maintenance-driven
//! inverse offers.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use fairshare_id::{AgentId, FrameworkId, RoleName};
use fairshare_resources::{Resource, ResourceQuantities, Resources};

use super::{HierarchicalAllocator, UnavailableResources};

/// Outcome of one allocation run.
#[derive(Debug, Clone)]
pub struct AllocationRunStats {
    /// Candidate agents considered (before whitelist/activation filtering).
    pub candidates: usize,

    /// Frameworks that received an offer batch.
    pub frameworks_offered: usize,

    /// Frameworks that received an inverse offer batch.
    pub frameworks_inverse_offered: usize,

    /// Quantities withheld in stage 2 to protect quota headroom.
    pub held_back: ResourceQuantities,

    /// How many (agent, framework) visits had resources withheld.
    pub held_back_agent_count: usize,

    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl HierarchicalAllocator {
    /// Executes the pending allocation run, if one was requested.
    ///
    /// Candidate agents are visited in freshly randomized order so no
    /// framework systematically sees the same agents first. At most one
    /// run executes per call; requests arriving during a run coalesce
    /// into the next.
    pub fn run_allocation(&mut self) -> Option<AllocationRunStats> {
        if !self.allocation_pending {
            return None;
        }
        self.allocation_pending = false;

        if self.paused {
            debug!("Skipped allocation because the allocator is paused");
            return None;
        }

        self.stats.allocation_runs += 1;
        let start = Instant::now();

        // Only whitelisted, present, activated agents receive offers.
        let mut agent_ids: Vec<AgentId> = self
            .allocation_candidates
            .iter()
            .filter(|id| {
                self.agents.get(*id).is_some_and(|a| a.activated) && self.is_whitelisted(id)
            })
            .cloned()
            .collect();
        agent_ids.shuffle(&mut rand::rng());

        let (frameworks_offered, held_back, held_back_agent_count) =
            self.allocate_cycle(&agent_ids);

        // Maintenance rides the same timer: any deallocation needed to
        // satisfy unavailability windows happens on the allocation cycle.
        let frameworks_inverse_offered = self.deallocate_cycle();

        let candidates = self.allocation_candidates.len();
        self.allocation_candidates.clear();

        let duration = start.elapsed();
        self.stats.last_run_duration = Some(duration);

        debug!(
            candidates,
            duration_us = duration.as_micros() as u64,
            "Performed allocation for agents"
        );

        Some(AllocationRunStats {
            candidates,
            frameworks_offered,
            frameworks_inverse_offered,
            held_back,
            held_back_agent_count,
            duration,
        })
    }

    /// The two-stage offer computation.
    fn allocate_cycle(
        &mut self,
        agent_ids: &[AgentId],
    ) -> (usize, ResourceQuantities, usize) {
        let mut rng = rand::rng();

        // Offerable resources per framework, per role, per agent. Reserved
        // resources go to frameworks in the owning role; unreserved
        // resources go to any role, fairness order deciding.
        let mut offerable: BTreeMap<FrameworkId, BTreeMap<RoleName, BTreeMap<AgentId, Resources>>> =
            BTreeMap::new();

        // Shared resources already offered on an agent this cycle. Without
        // this, the same shared volume could land in one offer per stage.
        let mut offered_shared: HashMap<AgentId, Resources> = HashMap::new();

        // Consumed quota per quota'ed role:
        //
        //   consumed = reservations (hierarchically aggregated, allocated
        //              or not) + unreserved non-revocable scalar
        //              allocations of the role subtree
        //
        // Reservations always charge the quota: they are bound to the role
        // whether or not anything runs on them.
        let mut consumed_quota: HashMap<RoleName, ResourceQuantities> = HashMap::new();

        for role in self.quota_guarantees.keys() {
            if let Some(reserved) = self.reservation_scalar_quantities.get(role) {
                consumed_quota.insert(role.clone(), reserved.clone());
            }
        }

        let tracked_roles: Vec<RoleName> = self.roles.keys().cloned().collect();
        for role in &tracked_roles {
            let top = role.top_level();
            if !self.quota_guarantees.contains_key(&top) {
                continue;
            }

            if self.role_sorter.contains(role.as_str()) {
                for resources in self.role_sorter.allocation(role.as_str()).values() {
                    *consumed_quota.entry(top.clone()).or_default() += &resources
                        .unreserved()
                        .non_revocable()
                        .scalars()
                        .scalar_quantities();
                }
            }
        }

        // Unreserved headroom that must stay unallocated for guarantees
        // not yet satisfied.
        let mut required_headroom = ResourceQuantities::new();
        for (role, guarantee) in &self.quota_guarantees {
            let consumed = consumed_quota.get(role).cloned().unwrap_or_default();
            required_headroom += &(guarantee.clone() - &consumed);
        }

        // Headroom actually on hand:
        //
        //   available = total - allocated - unallocated reservations -
        //               unallocated revocable
        let mut available_headroom = self.role_sorter.total_scalar_quantities();
        available_headroom -= &self.role_sorter.allocation_scalar_quantities();

        let mut total_allocated_reservation = ResourceQuantities::new();
        for role in &tracked_roles {
            if !self.role_sorter.contains(role.as_str()) {
                continue;
            }
            for resources in self.role_sorter.allocation(role.as_str()).values() {
                total_allocated_reservation += &resources
                    .filter(|r| !r.is_unreserved())
                    .scalars()
                    .scalar_quantities();
            }
        }

        // Reservation quantities aggregate up the tree, so summing the
        // top-level entries alone counts each reservation exactly once.
        let mut total_reservation = ResourceQuantities::new();
        for (role, quantities) in &self.reservation_scalar_quantities {
            if !role.is_hierarchical() {
                total_reservation += quantities;
            }
        }

        available_headroom -= &(total_reservation - &total_allocated_reservation);

        for agent in self.agents.values() {
            available_headroom -= &agent.available().revocable().scalars().scalar_quantities();
        }

        if !self.quota_guarantees.is_empty() {
            info!(
                required = %required_headroom,
                available = %available_headroom,
                "Quota headroom before allocation"
            );
        }

        // Stage 1: quota guarantees. Headroom alone only guarantees
        // quantity; capabilities and filters can make the reserved-back
        // headroom unusable for a particular role. Letting guaranteed
        // roles pick first gives them the widest choice of agents.
        for agent_id in agent_ids {
            for role_value in self.quota_role_sorter.sort() {
                let role = RoleName::parse(&role_value).expect("sorter client is a role name");
                let guarantee = self
                    .quota_guarantees
                    .get(&role)
                    .expect("quota'ed role has a guarantee")
                    .clone();

                // No subscribed frameworks under this role.
                if !self.roles.contains_key(&role) {
                    continue;
                }

                if self.agents[agent_id].available().is_empty() {
                    break; // Nothing left on this agent.
                }

                let framework_values = self
                    .framework_sorters
                    .get(&role)
                    .expect("framework sorter for tracked role")
                    .sort();

                for framework_value in framework_values {
                    let framework_id =
                        FrameworkId::parse(&framework_value).expect("sorter client is a framework id");

                    let mut available = self.agents[agent_id].available();
                    if let Some(shared) = offered_shared.get(agent_id) {
                        available -= shared;
                    }

                    if available.allocatable_to(&role).is_empty() {
                        break; // Nothing left for the role.
                    }

                    let framework = &self.frameworks[&framework_id];
                    assert!(framework.active, "sorted framework {framework_id} is inactive");
                    let capabilities = framework.capabilities;

                    if !self.is_capable_of_receiving_agent(&capabilities, &self.agents[agent_id]) {
                        continue;
                    }

                    let available = self.strip_incapable_resources(available, &capabilities);

                    // The role's own reservations come first. Quota is
                    // restricted to top-level roles, so there are no
                    // ancestor reservations to consider here.
                    let mut to_allocate = available.reserved(&role).non_revocable();

                    let consumed = consumed_quota.get(&role).cloned().unwrap_or_default();
                    let unsatisfied_guarantee = guarantee.clone() - &consumed;

                    let unreserved = available.non_revocable().unreserved();

                    // Unreserved resources are chopped to what the
                    // guarantee still allows.
                    let new_quota_allocation =
                        shrink_resources(&unreserved, unsatisfied_guarantee, &mut rng);
                    to_allocate += &new_quota_allocation;

                    // No reservation and no progress toward the guarantee:
                    // this role takes nothing from this agent in stage 1.
                    if to_allocate.is_empty() {
                        continue;
                    }

                    // Scalars the guarantee does not name ride along, up
                    // to the surplus headroom.
                    let non_guarantee_scalars =
                        unreserved.filter(|r| guarantee.get(&r.name).is_zero());
                    let surplus_headroom = available_headroom.clone() - &required_headroom;
                    to_allocate +=
                        &shrink_resources(&non_guarantee_scalars, surplus_headroom, &mut rng);

                    // Quota cannot be set on non-scalars; offer them whole.
                    to_allocate += &unreserved.non_scalars();

                    if !self.allocatable(&to_allocate, &role, framework)
                        || self.is_offer_filtered(&framework_id, &role, agent_id, &to_allocate)
                    {
                        continue;
                    }

                    debug!(
                        resources = %to_allocate,
                        agent_id = %agent_id,
                        role = %role,
                        framework_id = %framework_id,
                        "Allocating resources as part of role quota"
                    );

                    let mut to_allocate = to_allocate;
                    to_allocate.allocate(&role);

                    *offerable
                        .entry(framework_id.clone())
                        .or_default()
                        .entry(role.clone())
                        .or_default()
                        .entry(agent_id.clone())
                        .or_default() += &to_allocate;
                    *offered_shared.entry(agent_id.clone()).or_default() +=
                        &to_allocate.shared();

                    let allocated_unreserved =
                        to_allocate.unreserved().scalars().scalar_quantities();

                    *consumed_quota.entry(role.clone()).or_default() += &allocated_unreserved;
                    for ancestor in role.ancestors() {
                        *consumed_quota.entry(ancestor).or_default() += &allocated_unreserved;
                    }

                    // Only the guarantee-satisfying part relieves required
                    // headroom; reservations and unguaranteed scalars never
                    // counted toward it.
                    required_headroom -= &new_quota_allocation.scalars().scalar_quantities();
                    available_headroom -= &allocated_unreserved;

                    self.agents
                        .get_mut(agent_id)
                        .expect("agent present")
                        .allocate(&to_allocate);
                    self.track_allocated_resources(agent_id, &framework_id, &to_allocate);
                }
            }
        }

        // Stage 2: everything else, in cluster fair-share order, while
        // keeping the required headroom intact. Reservations to non-quota
        // roles and revocable resources are never headroom, so they are
        // always offerable.
        //
        // Hold-backs are only counted here: stage 1 may hold resources
        // back too, but stage 2 retries them, so only what stage 2 holds
        // is held for the whole cycle.
        let mut held_back = ResourceQuantities::new();
        let mut held_back_agent_count = 0usize;

        for agent_id in agent_ids {
            for role_value in self.role_sorter.sort() {
                let role = RoleName::parse(&role_value).expect("sorter client is a role name");

                // Quota'ed roles were handled in stage 1.
                if self.quota_guarantees.contains_key(&role) {
                    continue;
                }

                if self.agents[agent_id].available().is_empty() {
                    break; // Nothing left on this agent.
                }

                let framework_values = self
                    .framework_sorters
                    .get(&role)
                    .expect("framework sorter for tracked role")
                    .sort();

                for framework_value in framework_values {
                    let framework_id =
                        FrameworkId::parse(&framework_value).expect("sorter client is a framework id");

                    let mut available = self.agents[agent_id].available();
                    if let Some(shared) = offered_shared.get(agent_id) {
                        available -= shared;
                    }

                    if available.allocatable_to(&role).is_empty() {
                        break; // Nothing left for the role.
                    }

                    let framework = &self.frameworks[&framework_id];
                    let capabilities = framework.capabilities;

                    if !self.is_capable_of_receiving_agent(&capabilities, &self.agents[agent_id]) {
                        continue;
                    }

                    let available = self.strip_incapable_resources(available, &capabilities);

                    // Unreserved resources plus reservations for the role
                    // and its ancestors.
                    let mut to_allocate = available.allocatable_to(&role);

                    // If allocating would eat into headroom that
                    // unsatisfied guarantees still need, hold the
                    // headroom-eligible portion back and offer the rest.
                    let headroom_resources =
                        to_allocate.scalars().unreserved().non_revocable();
                    let headroom_quantities = headroom_resources.scalar_quantities();

                    let sufficient_headroom = (available_headroom.clone()
                        - &headroom_quantities)
                        .contains(&required_headroom);

                    if !sufficient_headroom {
                        to_allocate -= &headroom_resources;
                        held_back += &headroom_quantities;
                        held_back_agent_count += 1;
                    }

                    if !self.allocatable(&to_allocate, &role, framework)
                        || self.is_offer_filtered(&framework_id, &role, agent_id, &to_allocate)
                    {
                        continue;
                    }

                    debug!(
                        resources = %to_allocate,
                        agent_id = %agent_id,
                        role = %role,
                        framework_id = %framework_id,
                        "Allocating resources"
                    );

                    let mut to_allocate = to_allocate;
                    to_allocate.allocate(&role);

                    // Coarse-grained: the framework takes everything the
                    // role may hold on this agent; later frameworks see
                    // the remainder.
                    *offerable
                        .entry(framework_id.clone())
                        .or_default()
                        .entry(role.clone())
                        .or_default()
                        .entry(agent_id.clone())
                        .or_default() += &to_allocate;
                    *offered_shared.entry(agent_id.clone()).or_default() +=
                        &to_allocate.shared();

                    if sufficient_headroom {
                        available_headroom -= &headroom_quantities;
                    }

                    self.agents
                        .get_mut(agent_id)
                        .expect("agent present")
                        .allocate(&to_allocate);
                    self.track_allocated_resources(agent_id, &framework_id, &to_allocate);
                }
            }
        }

        if !self.quota_guarantees.is_empty() {
            info!(
                required = %required_headroom,
                held_back = %held_back,
                held_back_agents = held_back_agent_count,
                "Quota headroom after allocation"
            );
        }

        let frameworks_offered = offerable.len();
        if offerable.is_empty() {
            debug!("No allocations performed");
        } else {
            for (framework_id, allocations) in &offerable {
                self.frameworks
                    .get_mut(framework_id)
                    .expect("offered framework present")
                    .counters
                    .offers_sent += 1;
                (self.offer_callback)(framework_id, allocations);
            }
        }

        (frameworks_offered, held_back, held_back_agent_count)
    }

    /// Inverse offers for agents with scheduled maintenance.
    ///
    /// The framework sorters know who holds resources where, so inverse
    /// offers go exactly to the frameworks with something to lose. At most
    /// one inverse offer is outstanding per (framework, agent); a new one
    /// is only sent after the previous was answered or rescinded.
    fn deallocate_cycle(&mut self) -> usize {
        // Without frameworks there is nobody to ask.
        if self.roles.is_empty() {
            return 0;
        }
        assert!(!self.framework_sorters.is_empty());

        let mut offerable: BTreeMap<FrameworkId, BTreeMap<AgentId, UnavailableResources>> =
            BTreeMap::new();
        let mut newly_outstanding: Vec<(AgentId, FrameworkId)> = Vec::new();

        let candidate_ids: Vec<AgentId> = self.allocation_candidates.iter().cloned().collect();

        for sorter in self.framework_sorters.values() {
            for agent_id in &candidate_ids {
                let agent = self.agents.get(agent_id).expect("candidate agent present");
                let Some(maintenance) = &agent.maintenance else {
                    continue;
                };

                let allocation = sorter.allocation_on_agent(agent_id);
                for framework_value in allocation.keys() {
                    let framework_id = FrameworkId::parse(framework_value)
                        .expect("sorter client is a framework id");
                    let framework = self
                        .frameworks
                        .get(&framework_id)
                        .expect("allocated framework present");

                    // The master will not deliver inverse offers to an
                    // inactive framework.
                    if !framework.active {
                        continue;
                    }

                    if offerable
                        .get(&framework_id)
                        .is_some_and(|agents| agents.contains_key(agent_id))
                    {
                        continue;
                    }

                    if maintenance.offers_outstanding.contains(&framework_id) {
                        continue;
                    }

                    if self.is_inverse_offer_filtered(&framework_id, agent_id) {
                        continue;
                    }

                    // Maintenance is whole-agent: empty resources, the
                    // window says what is going away and when.
                    offerable.entry(framework_id.clone()).or_default().insert(
                        agent_id.clone(),
                        UnavailableResources {
                            resources: Resources::new(),
                            unavailability: maintenance.unavailability.clone(),
                        },
                    );
                    newly_outstanding.push((agent_id.clone(), framework_id.clone()));
                }
            }
        }

        for (agent_id, framework_id) in newly_outstanding {
            self.agents
                .get_mut(&agent_id)
                .expect("agent present")
                .maintenance
                .as_mut()
                .expect("maintenance present")
                .offers_outstanding
                .insert(framework_id);
        }

        let frameworks_inverse_offered = offerable.len();
        if offerable.is_empty() {
            debug!("No inverse offers to send out");
        } else {
            for (framework_id, unavailable) in &offerable {
                self.frameworks
                    .get_mut(framework_id)
                    .expect("framework present")
                    .counters
                    .inverse_offers_sent += 1;
                (self.inverse_offer_callback)(framework_id, unavailable);
            }
        }

        frameworks_inverse_offered
    }
}

/// Shrinks `resources` down to the target quantities.
///
/// Indivisible resources (mount disks) are taken whole or excluded, which
/// can leave the result smaller than the target. When several subsets
/// would do, the shuffle makes a random choice so no particular disk or
/// pool is systematically preferred.
fn shrink_resources(
    resources: &Resources,
    mut target: ResourceQuantities,
    rng: &mut impl Rng,
) -> Resources {
    if target.is_empty() {
        return Resources::new();
    }

    let mut items: Vec<Resource> = resources.iter().cloned().collect();
    items.shuffle(rng);

    let mut result = Resources::new();
    for mut item in items {
        let goal = target.get(&item.name);
        if goal.is_zero() {
            continue; // Shrunk to nothing.
        }

        if item.shrink(goal) {
            let taken: ResourceQuantities =
                [(item.name.clone(), item.value.scalar())].into_iter().collect();
            target -= &taken;
            result.add(item);
        }
    }

    result
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fairshare_resources::DiskSource;

    #[test]
    fn test_shrink_to_empty_target() {
        let resources: Resources = Resource::scalar("cpus", 4.0).into();
        let shrunk = shrink_resources(&resources, ResourceQuantities::new(), &mut rand::rng());
        assert!(shrunk.is_empty());
    }

    #[test]
    fn test_shrink_chops_divisible_scalars() {
        let resources: Resources = vec![
            Resource::scalar("cpus", 8.0),
            Resource::scalar("mem", 1024.0),
        ]
        .into();

        let shrunk = shrink_resources(
            &resources,
            ResourceQuantities::from([("cpus", 3.0)]),
            &mut rand::rng(),
        );

        assert_eq!(
            shrunk.scalar_quantities(),
            ResourceQuantities::from([("cpus", 3.0)])
        );
    }

    #[test]
    fn test_shrink_excludes_oversized_mount_disk() {
        let resources: Resources = Resource::scalar("disk", 1024.0)
            .with_disk_source(DiskSource::Mount {
                root: "/mnt/a".to_string(),
            })
            .into();

        // The mount cannot be carved down to 512; the result comes up
        // short of the target.
        let shrunk = shrink_resources(
            &resources,
            ResourceQuantities::from([("disk", 512.0)]),
            &mut rand::rng(),
        );
        assert!(shrunk.is_empty());
    }

    #[test]
    fn test_shrink_takes_fitting_mount_disk_whole() {
        let resources: Resources = Resource::scalar("disk", 512.0)
            .with_disk_source(DiskSource::Mount {
                root: "/mnt/a".to_string(),
            })
            .into();

        let shrunk = shrink_resources(
            &resources,
            ResourceQuantities::from([("disk", 1024.0)]),
            &mut rand::rng(),
        );
        assert_eq!(
            shrunk.scalar_quantities(),
            ResourceQuantities::from([("disk", 512.0)])
        );
    }

    #[test]
    fn test_shrink_ignores_names_outside_target() {
        let resources: Resources = vec![
            Resource::scalar("cpus", 4.0),
            Resource::scalar("gpus", 2.0),
        ]
        .into();

        let shrunk = shrink_resources(
            &resources,
            ResourceQuantities::from([("cpus", 4.0)]),
            &mut rand::rng(),
        );
        assert_eq!(
            shrunk.scalar_quantities(),
            ResourceQuantities::from([("cpus", 4.0)])
        );
    }
}
