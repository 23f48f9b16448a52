//! Shared harness for allocator scenario tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use fairshare_allocator::{
    AgentCapabilities, AgentInfo, AllocatorConfig, FrameworkInfo, HierarchicalAllocator,
    UnavailableResources,
};
use fairshare_id::{AgentId, FrameworkId, RoleName};
use fairshare_resources::{Resource, ResourceQuantities, Resources};

/// One offer batch: per-role, per-agent resources.
pub type OfferBatch = BTreeMap<RoleName, BTreeMap<AgentId, Resources>>;

/// Captured offer callbacks.
pub type Offers = Arc<Mutex<Vec<(FrameworkId, OfferBatch)>>>;

/// Captured inverse offer callbacks.
pub type InverseOffers = Arc<Mutex<Vec<(FrameworkId, BTreeMap<AgentId, UnavailableResources>)>>>;

/// Creates an allocator whose callbacks append into shared vectors.
pub fn new_allocator(config: AllocatorConfig) -> (HierarchicalAllocator, Offers, InverseOffers) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let offers: Offers = Arc::default();
    let inverse_offers: InverseOffers = Arc::default();

    let offers_sink = Arc::clone(&offers);
    let inverse_sink = Arc::clone(&inverse_offers);

    let allocator = HierarchicalAllocator::new(
        config,
        Box::new(move |framework_id, allocations| {
            offers_sink
                .lock()
                .unwrap()
                .push((framework_id.clone(), allocations.clone()));
        }),
        Box::new(move |framework_id, unavailable| {
            inverse_sink
                .lock()
                .unwrap()
                .push((framework_id.clone(), unavailable.clone()));
        }),
    );

    (allocator, offers, inverse_offers)
}

pub fn role(s: &str) -> RoleName {
    RoleName::parse(s).unwrap()
}

pub fn cpus_mem(cpus: f64, mem: f64) -> Resources {
    vec![Resource::scalar("cpus", cpus), Resource::scalar("mem", mem)].into()
}

/// Registers an agent with default info and capabilities.
pub fn add_agent(allocator: &mut HierarchicalAllocator, total: Resources) -> AgentId {
    let agent_id = AgentId::new();
    allocator.add_agent(
        &agent_id,
        AgentInfo::default(),
        AgentCapabilities::default(),
        None,
        total,
        HashMap::new(),
    );
    agent_id
}

/// Registers an active framework subscribed to the given roles.
pub fn add_framework(allocator: &mut HierarchicalAllocator, roles: &[&str]) -> FrameworkId {
    add_framework_with(allocator, FrameworkInfo {
        roles: roles.iter().map(|r| role(r)).collect(),
        ..Default::default()
    })
}

/// Registers an active framework from a full info payload.
pub fn add_framework_with(
    allocator: &mut HierarchicalAllocator,
    info: FrameworkInfo,
) -> FrameworkId {
    let framework_id = FrameworkId::new();
    allocator.add_framework(&framework_id, info, HashMap::new(), true, BTreeSet::new());
    framework_id
}

/// Takes and clears the captured offers.
pub fn drain_offers(offers: &Offers) -> Vec<(FrameworkId, OfferBatch)> {
    std::mem::take(&mut *offers.lock().unwrap())
}

/// Takes and clears the captured inverse offers.
pub fn drain_inverse_offers(
    inverse_offers: &InverseOffers,
) -> Vec<(FrameworkId, BTreeMap<AgentId, UnavailableResources>)> {
    std::mem::take(&mut *inverse_offers.lock().unwrap())
}

/// Sums everything offered to one framework across a set of batches.
pub fn total_offered(batches: &[(FrameworkId, OfferBatch)], framework_id: &FrameworkId) -> Resources {
    let mut total = Resources::new();
    for (offered_to, batch) in batches {
        if offered_to != framework_id {
            continue;
        }
        for agents in batch.values() {
            for resources in agents.values() {
                total += resources;
            }
        }
    }
    total
}

/// Scalar quantities of everything offered to one framework.
pub fn total_offered_quantities(
    batches: &[(FrameworkId, OfferBatch)],
    framework_id: &FrameworkId,
) -> ResourceQuantities {
    total_offered(batches, framework_id).scalar_quantities()
}

/// Asserts the per-agent accounting invariants: allocated fits within the
/// total and available is exactly the difference.
pub fn assert_agent_invariants(allocator: &HierarchicalAllocator, agent_id: &AgentId) {
    let agent = allocator.agent(agent_id).expect("agent exists");

    let mut in_use = agent.allocated().clone();
    in_use.unallocate();

    assert!(
        agent.total().contains(&in_use),
        "agent {agent_id}: allocated {} exceeds total {}",
        agent.allocated(),
        agent.total()
    );
    assert_eq!(
        agent.available(),
        agent.total().clone() - &in_use,
        "agent {agent_id}: available diverged from total - allocated"
    );
}
