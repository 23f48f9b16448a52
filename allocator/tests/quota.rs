//! Quota guarantee scenarios: stage-1 chopping, headroom protection, and
//! over-committed guarantees.

mod common;

use common::*;

use fairshare_allocator::{FrameworkCapabilities, FrameworkInfo};
use fairshare_resources::{Resource, ResourceQuantities};

#[test]
fn guaranteed_role_is_satisfied_before_the_rest_is_offered() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    allocator.set_quota(&role("q"), ResourceQuantities::from([("cpus", 4.0)]));

    add_agent(&mut allocator, cpus_mem(5.0, 512.0));
    add_agent(&mut allocator, cpus_mem(5.0, 512.0));

    let fq = add_framework(&mut allocator, &["q"]);
    let fb = add_framework(&mut allocator, &["b"]);

    allocator.run_allocation().expect("run executes");

    let batches = drain_offers(&offers);

    // Stage 1 chops the quota'ed role's cpus down to its guarantee; the
    // single agent's memory rides along inside the surplus headroom.
    assert_eq!(
        total_offered_quantities(&batches, &fq),
        ResourceQuantities::from([("cpus", 4.0), ("mem", 512.0)])
    );

    // Stage 2 hands the rest to the non-quota role.
    assert_eq!(
        total_offered_quantities(&batches, &fb),
        ResourceQuantities::from([("cpus", 6.0), ("mem", 512.0)])
    );
}

#[test]
fn headroom_is_held_back_while_a_guarantee_is_unsatisfied() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    // Guarantee 4 cpus for "q", but nobody in "q" is subscribed yet: the
    // engine must keep 4 cpus unallocated for when somebody arrives.
    allocator.set_quota(&role("q"), ResourceQuantities::from([("cpus", 4.0)]));

    add_agent(&mut allocator, cpus_mem(10.0, 1024.0));
    let fb = add_framework(&mut allocator, &["b"]);

    let stats = allocator.run_allocation().expect("run executes");

    // The whole agent would dip into required headroom, so the unreserved
    // non-revocable scalars are withheld and nothing is offerable.
    assert!(drain_offers(&offers).is_empty());
    assert!(stats.held_back.get("cpus") >= fairshare_resources::Scalar::from_units(4));
    assert!(stats.held_back_agent_count >= 1);

    // Remove the quota and everything flows to fb.
    allocator.remove_quota(&role("q"));
    allocator.request_allocation();
    allocator.run_allocation().expect("run executes");

    let batches = drain_offers(&offers);
    assert_eq!(
        total_offered_quantities(&batches, &fb),
        ResourceQuantities::from([("cpus", 10.0), ("mem", 1024.0)])
    );
}

#[test]
fn overcommitted_guarantee_holds_back_scalars_but_not_the_rest() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    // Guarantee exceeds the cluster: nothing unreserved and non-revocable
    // may be offered to other roles.
    allocator.set_quota(&role("q"), ResourceQuantities::from([("cpus", 10.0)]));

    let mut total = cpus_mem(8.0, 1024.0);
    total.add(Resource::ranges("ports", &[(31000, 32000)]));
    total.add(Resource::scalar("cpus", 1.0).as_revocable());
    let agent_id = add_agent(&mut allocator, total);

    let fb = add_framework_with(
        &mut allocator,
        FrameworkInfo {
            roles: [role("b")].into(),
            capabilities: FrameworkCapabilities {
                revocable_resources: true,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let stats = allocator.run_allocation().expect("run executes");

    // Only revocable and non-scalar resources reach fb.
    let batches = drain_offers(&offers);
    let offered = total_offered(&batches, &fb);
    assert_eq!(
        offered.scalar_quantities(),
        ResourceQuantities::from([("cpus", 1.0)])
    );
    assert!(offered.iter().any(|r| r.name == "ports"));
    assert!(offered.scalars().iter().all(|r| r.revocable));

    assert_eq!(
        stats.held_back,
        ResourceQuantities::from([("cpus", 8.0), ("mem", 1024.0)])
    );

    assert_agent_invariants(&allocator, &agent_id);
}

#[test]
fn reservations_count_toward_consumed_quota() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    allocator.set_quota(&role("q"), ResourceQuantities::from([("cpus", 4.0)]));

    // 3 of the 4 guaranteed cpus are already reserved to the role; only
    // one more cpu of guarantee remains to satisfy.
    let mut total = cpus_mem(10.0, 1024.0);
    total.add(Resource::scalar("cpus", 3.0).reserved_for(role("q")));
    add_agent(&mut allocator, total);

    let fq = add_framework(&mut allocator, &["q"]);

    allocator.run_allocation().expect("run executes");

    let batches = drain_offers(&offers);
    let offered = total_offered(&batches, &fq);

    // The role receives its reservation, the one cpu of guarantee still
    // unsatisfied, and the memory (no guarantee set for it) through
    // surplus headroom. The remaining unreserved cpus are guarantee-named
    // and a quota'ed role does not burst past its guarantee.
    assert_eq!(
        offered.scalar_quantities(),
        ResourceQuantities::from([("cpus", 4.0), ("mem", 1024.0)])
    );
    assert_eq!(
        offered
            .filter(|r| !r.is_unreserved())
            .scalar_quantities(),
        ResourceQuantities::from([("cpus", 3.0)])
    );
}

#[test]
fn quota_role_sorter_orders_quota_roles_by_share() {
    let (mut allocator, offers, _) = new_allocator(Default::default());

    allocator.set_quota(&role("q1"), ResourceQuantities::from([("cpus", 2.0)]));
    allocator.set_quota(&role("q2"), ResourceQuantities::from([("cpus", 2.0)]));

    add_agent(&mut allocator, cpus_mem(2.0, 256.0));
    add_agent(&mut allocator, cpus_mem(2.0, 256.0));

    let f1 = add_framework(&mut allocator, &["q1"]);
    let f2 = add_framework(&mut allocator, &["q2"]);

    allocator.run_allocation().expect("run executes");

    // Both guarantees are satisfiable: each role ends up with one agent's
    // worth of cpus.
    let batches = drain_offers(&offers);
    assert_eq!(
        total_offered_quantities(&batches, &f1).get("cpus"),
        fairshare_resources::Scalar::from_units(2)
    );
    assert_eq!(
        total_offered_quantities(&batches, &f2).get("cpus"),
        fairshare_resources::Scalar::from_units(2)
    );
}
