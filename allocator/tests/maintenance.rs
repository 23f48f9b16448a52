//! Maintenance scenarios: inverse offers, outstanding-offer dedup,
//! responses, and inverse-offer filters.

mod common;

use common::*;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use fairshare_allocator::{InverseOfferStatus, Refusal, Unavailability};
use fairshare_id::FrameworkId;

fn window_in_one_hour() -> Unavailability {
    Unavailability {
        start: Utc::now() + ChronoDuration::hours(1),
        duration: Some(Duration::from_secs(4 * 60 * 60)),
    }
}

/// Sets up one agent allocated to one framework, then schedules
/// maintenance on the agent.
fn allocated_agent_with_maintenance() -> (
    fairshare_allocator::HierarchicalAllocator,
    InverseOffers,
    fairshare_id::AgentId,
    FrameworkId,
) {
    let (mut allocator, offers, inverse_offers) = new_allocator(Default::default());

    let agent_id = add_agent(&mut allocator, cpus_mem(4.0, 512.0));
    let framework_id = add_framework(&mut allocator, &["r"]);

    allocator.run_allocation().expect("run executes");
    assert_eq!(drain_offers(&offers).len(), 1);

    allocator.update_unavailability(&agent_id, Some(window_in_one_hour()));

    (allocator, inverse_offers, agent_id, framework_id)
}

#[test]
fn maintenance_emits_one_inverse_offer_per_allocated_framework() {
    let (mut allocator, inverse_offers, agent_id, framework_id) =
        allocated_agent_with_maintenance();

    allocator.run_allocation().expect("run executes");

    let batches = drain_inverse_offers(&inverse_offers);
    assert_eq!(batches.len(), 1);

    let (offered_to, unavailable) = &batches[0];
    assert_eq!(offered_to, &framework_id);

    // Whole-agent maintenance: empty resources, the window tells the
    // framework what goes away.
    let entry = &unavailable[&agent_id];
    assert!(entry.resources.is_empty());
    assert_eq!(entry.unavailability, window_in_one_hour_fixed(&allocator, &agent_id));
}

// The unavailability stored on the agent is what must be echoed in the
// inverse offer; comparing against it avoids Utc::now() skew between
// construction sites.
fn window_in_one_hour_fixed(
    allocator: &fairshare_allocator::HierarchicalAllocator,
    agent_id: &fairshare_id::AgentId,
) -> Unavailability {
    allocator
        .agent(agent_id)
        .unwrap()
        .maintenance
        .as_ref()
        .unwrap()
        .unavailability
        .clone()
}

#[test]
fn outstanding_inverse_offer_suppresses_repeats() {
    let (mut allocator, inverse_offers, agent_id, _framework_id) =
        allocated_agent_with_maintenance();

    allocator.run_allocation().expect("run executes");
    assert_eq!(drain_inverse_offers(&inverse_offers).len(), 1);

    // Until the framework responds, further runs emit nothing.
    allocator.request_allocation_on(&agent_id);
    allocator.run_allocation().expect("run executes");
    assert!(drain_inverse_offers(&inverse_offers).is_empty());
}

#[test]
fn response_clears_outstanding_and_records_status() {
    let (mut allocator, inverse_offers, agent_id, framework_id) =
        allocated_agent_with_maintenance();

    allocator.run_allocation().expect("run executes");
    drain_inverse_offers(&inverse_offers);

    allocator.update_inverse_offer(
        &agent_id,
        &framework_id,
        None,
        Some(InverseOfferStatus::Accept),
        None,
    );

    let statuses = allocator.inverse_offer_statuses();
    assert_eq!(
        statuses[&agent_id][&framework_id],
        InverseOfferStatus::Accept
    );

    // The response cleared the outstanding flag; the next run asks again.
    allocator.request_allocation_on(&agent_id);
    allocator.run_allocation().expect("run executes");
    assert_eq!(drain_inverse_offers(&inverse_offers).len(), 1);
}

#[test]
fn inverse_offer_filter_blocks_until_expiry() {
    let (mut allocator, inverse_offers, agent_id, framework_id) =
        allocated_agent_with_maintenance();

    allocator.run_allocation().expect("run executes");
    drain_inverse_offers(&inverse_offers);

    // Decline with a 60 second refusal.
    allocator.update_inverse_offer(
        &agent_id,
        &framework_id,
        None,
        Some(InverseOfferStatus::Decline),
        Some(Refusal::seconds(60.0)),
    );

    allocator.request_allocation_on(&agent_id);
    allocator.run_allocation().expect("run executes");
    assert!(drain_inverse_offers(&inverse_offers).is_empty());

    // Expire the filter the way the worker's timer would.
    let deferred = allocator.take_deferred();
    for entry in deferred {
        if let fairshare_allocator::engine::Deferred::ExpireInverseOfferFilter {
            framework_id,
            agent_id,
            filter_id,
            ..
        } = entry
        {
            allocator.expire_inverse_offer_filter(&framework_id, &agent_id, filter_id);
        }
    }

    allocator.request_allocation_on(&agent_id);
    allocator.run_allocation().expect("run executes");
    assert_eq!(drain_inverse_offers(&inverse_offers).len(), 1);
}

#[test]
fn clearing_unavailability_stops_inverse_offers() {
    let (mut allocator, inverse_offers, agent_id, _framework_id) =
        allocated_agent_with_maintenance();

    allocator.run_allocation().expect("run executes");
    drain_inverse_offers(&inverse_offers);

    allocator.update_unavailability(&agent_id, None);

    allocator.run_allocation().expect("run executes");
    assert!(drain_inverse_offers(&inverse_offers).is_empty());
    assert!(allocator.inverse_offer_statuses().is_empty());
}

#[test]
fn inactive_framework_receives_no_inverse_offers() {
    let (mut allocator, inverse_offers, agent_id, framework_id) =
        allocated_agent_with_maintenance();

    allocator.deactivate_framework(&framework_id);

    allocator.request_allocation_on(&agent_id);
    allocator.run_allocation().expect("run executes");
    assert!(drain_inverse_offers(&inverse_offers).is_empty());
}
