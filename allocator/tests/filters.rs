//! Offer-filter scenarios: refusal windows, revival, suppression, and the
//! implicit capability filters.

mod common;

use common::*;

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use fairshare_allocator::engine::Deferred;
use fairshare_allocator::{
    AgentCapabilities, AgentInfo, AllocatorConfig, FrameworkCapabilities, FrameworkInfo, Refusal,
};
use fairshare_resources::{Resource, ResourceQuantities};

/// Expires every scheduled offer filter, the way the worker's timers
/// would after their sleeps elapse.
fn expire_all_offer_filters(allocator: &mut fairshare_allocator::HierarchicalAllocator) {
    for entry in allocator.take_deferred() {
        if let Deferred::ExpireOfferFilter {
            framework_id,
            role,
            agent_id,
            filter_id,
            ..
        } = entry
        {
            allocator.expire_offer_filter(&framework_id, &role, &agent_id, filter_id);
        }
    }
}

#[test]
fn declined_resources_are_filtered_until_expiry() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    let agent_id = add_agent(&mut allocator, cpus_mem(4.0, 512.0));
    let framework_id = add_framework(&mut allocator, &["r"]);

    allocator.run_allocation().expect("run executes");
    let batches = drain_offers(&offers);
    let offered = batches[0].1[&role("r")][&agent_id].clone();

    allocator.recover_resources(
        &framework_id,
        &agent_id,
        offered,
        Some(Refusal::seconds(30.0)),
    );

    // While the filter stands, runs produce nothing.
    allocator.request_allocation();
    allocator.run_allocation().expect("run executes");
    assert!(drain_offers(&offers).is_empty());
    assert_eq!(allocator.active_offer_filters(&role("r")), 1);

    expire_all_offer_filters(&mut allocator);

    allocator.request_allocation();
    allocator.run_allocation().expect("run executes");
    assert_eq!(drain_offers(&offers).len(), 1);
    assert_eq!(allocator.active_offer_filters(&role("r")), 0);
}

#[test]
fn effective_filter_timeout_is_at_least_the_allocation_interval() {
    let config = AllocatorConfig {
        allocation_interval: Duration::from_secs(45),
        ..Default::default()
    };
    let (mut allocator, offers, _) = new_allocator(config);

    let agent_id = add_agent(&mut allocator, cpus_mem(4.0, 512.0));
    let framework_id = add_framework(&mut allocator, &["r"]);

    allocator.run_allocation().expect("run executes");
    let batches = drain_offers(&offers);
    let offered = batches[0].1[&role("r")][&agent_id].clone();

    // 30 s refusal under a 45 s interval: the filter must outlive the
    // next periodic pass.
    allocator.recover_resources(
        &framework_id,
        &agent_id,
        offered,
        Some(Refusal::seconds(30.0)),
    );

    let deferred = allocator.take_deferred();
    let after = deferred
        .iter()
        .find_map(|d| match d {
            Deferred::ExpireOfferFilter { after, .. } => Some(*after),
            _ => None,
        })
        .expect("an offer filter expiry was scheduled");
    assert_eq!(after, Duration::from_secs(45));
}

#[test]
fn zero_refusal_installs_no_filter() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    let agent_id = add_agent(&mut allocator, cpus_mem(4.0, 512.0));
    let framework_id = add_framework(&mut allocator, &["r"]);

    allocator.run_allocation().expect("run executes");
    let batches = drain_offers(&offers);
    let offered = batches[0].1[&role("r")][&agent_id].clone();

    allocator.recover_resources(&framework_id, &agent_id, offered, Some(Refusal::seconds(0.0)));

    assert_eq!(allocator.active_offer_filters(&role("r")), 0);
    assert!(allocator.take_deferred().is_empty());

    // The resources are immediately offerable again.
    allocator.request_allocation();
    allocator.run_allocation().expect("run executes");
    assert_eq!(drain_offers(&offers).len(), 1);
}

#[test]
fn a_smaller_offer_is_still_filtered_a_larger_one_is_not() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    let agent_id = add_agent(&mut allocator, cpus_mem(4.0, 512.0));
    let framework_id = add_framework(&mut allocator, &["r"]);

    allocator.run_allocation().expect("run executes");
    let offered = drain_offers(&offers)[0].1[&role("r")][&agent_id].clone();

    allocator.recover_resources(
        &framework_id,
        &agent_id,
        offered,
        Some(Refusal::seconds(300.0)),
    );

    // Same resources: filtered.
    allocator.request_allocation();
    allocator.run_allocation().expect("run executes");
    assert!(drain_offers(&offers).is_empty());

    // Grow the agent: the offerable set now exceeds what was declined,
    // so the filter no longer contains it.
    allocator.update_agent(
        &agent_id,
        AgentInfo::default(),
        Some(cpus_mem(8.0, 1024.0)),
        None,
    );
    allocator.run_allocation().expect("run executes");

    let batches = drain_offers(&offers);
    assert_eq!(
        total_offered_quantities(&batches, &framework_id),
        ResourceQuantities::from([("cpus", 8.0), ("mem", 1024.0)])
    );
}

#[test]
fn revive_drops_filters_and_reallocates() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    let agent_id = add_agent(&mut allocator, cpus_mem(4.0, 512.0));
    let framework_id = add_framework(&mut allocator, &["r"]);

    allocator.run_allocation().expect("run executes");
    let offered = drain_offers(&offers)[0].1[&role("r")][&agent_id].clone();

    allocator.recover_resources(
        &framework_id,
        &agent_id,
        offered,
        Some(Refusal::seconds(3600.0)),
    );

    allocator.revive_offers(&framework_id, BTreeSet::new());
    assert_eq!(allocator.active_offer_filters(&role("r")), 0);

    allocator.run_allocation().expect("run executes");
    assert_eq!(drain_offers(&offers).len(), 1);

    // The dangling expiry is a no-op after revival.
    expire_all_offer_filters(&mut allocator);
}

#[test]
fn agent_attribute_change_drops_filters() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    let agent_id = add_agent(&mut allocator, cpus_mem(4.0, 512.0));
    let framework_id = add_framework(&mut allocator, &["r"]);

    allocator.run_allocation().expect("run executes");
    let offered = drain_offers(&offers)[0].1[&role("r")][&agent_id].clone();

    allocator.recover_resources(
        &framework_id,
        &agent_id,
        offered,
        Some(Refusal::seconds(3600.0)),
    );
    assert_eq!(allocator.active_offer_filters(&role("r")), 1);

    // Re-registration with different attributes invalidates standing
    // refusals; schedulers must reassess.
    let info = AgentInfo {
        attributes: [("rack".to_string(), "r2".to_string())].into(),
        ..Default::default()
    };
    allocator.update_agent(&agent_id, info, None, None);

    assert_eq!(allocator.active_offer_filters(&role("r")), 0);

    allocator.run_allocation().expect("run executes");
    assert_eq!(drain_offers(&offers).len(), 1);
}

#[test]
fn suppressed_role_receives_nothing_until_revived() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    add_agent(&mut allocator, cpus_mem(4.0, 512.0));

    // Subscribe to r1 and r2 with r2 suppressed from the start.
    let framework_id = fairshare_id::FrameworkId::new();
    allocator.add_framework(
        &framework_id,
        FrameworkInfo {
            roles: [role("r1"), role("r2")].into(),
            ..Default::default()
        },
        HashMap::new(),
        true,
        [role("r2")].into(),
    );

    // r2's sorter excludes the framework entirely.
    assert!(allocator
        .framework_sorter(&role("r2"))
        .unwrap()
        .sort()
        .is_empty());

    allocator.run_allocation().expect("run executes");
    let batches = drain_offers(&offers);
    assert!(batches
        .iter()
        .all(|(_, batch)| !batch.contains_key(&role("r2"))));

    // Return what r1 took and suppress it, then revive r2: the next run
    // must offer to r2.
    let offered = batches[0].1[&role("r1")].values().next().unwrap().clone();
    let agent_id = batches[0].1[&role("r1")].keys().next().unwrap().clone();
    allocator.recover_resources(&framework_id, &agent_id, offered, None);
    allocator.suppress_offers(&framework_id, [role("r1")].into());

    allocator.revive_offers(&framework_id, [role("r2")].into());
    allocator.run_allocation().expect("run executes");

    let batches = drain_offers(&offers);
    assert!(batches
        .iter()
        .any(|(_, batch)| batch.contains_key(&role("r2"))));
}

#[test]
fn multi_role_framework_is_filtered_from_incapable_agents() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    // Agent without the multi-role capability.
    let agent_id = fairshare_id::AgentId::new();
    allocator.add_agent(
        &agent_id,
        AgentInfo::default(),
        AgentCapabilities {
            multi_role: false,
            hierarchical_role: false,
        },
        None,
        cpus_mem(4.0, 512.0),
        HashMap::new(),
    );

    add_framework_with(
        &mut allocator,
        FrameworkInfo {
            roles: [role("r")].into(),
            capabilities: FrameworkCapabilities {
                multi_role: true,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    allocator.run_allocation().expect("run executes");
    assert!(drain_offers(&offers).is_empty());
}

#[test]
fn hierarchical_role_needs_a_capable_agent() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    let incapable = fairshare_id::AgentId::new();
    allocator.add_agent(
        &incapable,
        AgentInfo::default(),
        AgentCapabilities {
            multi_role: true,
            hierarchical_role: false,
        },
        None,
        cpus_mem(4.0, 512.0),
        HashMap::new(),
    );

    let framework_id = add_framework(&mut allocator, &["eng/ci"]);

    allocator.run_allocation().expect("run executes");
    assert!(drain_offers(&offers).is_empty());

    // A capable agent serves the hierarchical role fine.
    let capable = fairshare_id::AgentId::new();
    allocator.add_agent(
        &capable,
        AgentInfo::default(),
        AgentCapabilities {
            multi_role: true,
            hierarchical_role: true,
        },
        None,
        cpus_mem(4.0, 512.0),
        HashMap::new(),
    );

    allocator.run_allocation().expect("run executes");
    let batches = drain_offers(&offers);
    assert_eq!(
        total_offered_quantities(&batches, &framework_id),
        ResourceQuantities::from([("cpus", 4.0), ("mem", 512.0)])
    );
}

#[test]
fn gpu_agents_are_reserved_for_gpu_frameworks() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    let mut total = cpus_mem(4.0, 512.0);
    total.add(Resource::scalar("gpus", 2.0));
    add_agent(&mut allocator, total);

    let plain = add_framework(&mut allocator, &["r"]);
    allocator.run_allocation().expect("run executes");
    assert!(drain_offers(&offers).is_empty());

    let gpu_aware = add_framework_with(
        &mut allocator,
        FrameworkInfo {
            roles: [role("r")].into(),
            capabilities: FrameworkCapabilities {
                gpu_resources: true,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    allocator.run_allocation().expect("run executes");
    let batches = drain_offers(&offers);
    assert!(total_offered(&batches, &plain).is_empty());
    assert_eq!(
        total_offered_quantities(&batches, &gpu_aware),
        ResourceQuantities::from([("cpus", 4.0), ("mem", 512.0), ("gpus", 2.0)])
    );
}

#[test]
fn remote_region_agents_require_region_aware_frameworks() {
    let config = AllocatorConfig {
        region: Some("us-east-1".to_string()),
        ..Default::default()
    };
    let (mut allocator, offers, _) = new_allocator(config);

    let remote = fairshare_id::AgentId::new();
    allocator.add_agent(
        &remote,
        AgentInfo {
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        },
        AgentCapabilities::default(),
        None,
        cpus_mem(4.0, 512.0),
        HashMap::new(),
    );

    let local_only = add_framework(&mut allocator, &["r"]);
    allocator.run_allocation().expect("run executes");
    assert!(drain_offers(&offers).is_empty());

    let region_aware = add_framework_with(
        &mut allocator,
        FrameworkInfo {
            roles: [role("r")].into(),
            capabilities: FrameworkCapabilities {
                region_aware: true,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    allocator.run_allocation().expect("run executes");
    let batches = drain_offers(&offers);
    assert!(total_offered(&batches, &local_only).is_empty());
    assert!(!total_offered(&batches, &region_aware).is_empty());
}

#[test]
fn incapable_resources_are_stripped_not_offered() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    let mut total = cpus_mem(4.0, 512.0);
    total.add(Resource::scalar("cpus", 2.0).as_revocable());
    add_agent(&mut allocator, total);

    // No revocable capability: the revocable cpus never appear.
    let framework_id = add_framework(&mut allocator, &["r"]);

    allocator.run_allocation().expect("run executes");
    let batches = drain_offers(&offers);
    let offered = total_offered(&batches, &framework_id);
    assert_eq!(
        offered.scalar_quantities(),
        ResourceQuantities::from([("cpus", 4.0), ("mem", 512.0)])
    );
    assert!(offered.iter().all(|r| !r.revocable));
}
