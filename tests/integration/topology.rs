//! Topology integration tests.
//!
//! Placement, adjacency, switching and teardown through the coordinator.

use hive::core::topology::{ring_neighbors, TopologyKind, TopologyStrategy};
use hive::core::worker::{WorkerConfig, WorkerId, WorkerRole, WorkerStatus, WorkerType};
use hive::orchestration::WorkerFilter;
use hive::{Error, SwarmEvent};

use crate::fixtures::TestSwarm;

/// Test: Hierarchical placement
/// Given a hierarchical topology capped at 3
/// When it is initialized
/// Then one coordinator and two workers are spawned
#[test]
fn test_hierarchical_spawns_queen_and_two_workers() {
    let mut t = TestSwarm::new();

    let topology = t
        .swarm
        .init_topology(TopologyKind::Hierarchical, 3, TopologyStrategy::Balanced, false)
        .unwrap();

    assert_eq!(topology.members.len(), 3);
    let workers = t.swarm.list_workers(&WorkerFilter::new().in_swarm(topology.id)).unwrap();
    let coordinators: Vec<_> = workers
        .iter()
        .filter(|w| w.worker_type == WorkerType::Coordinator)
        .collect();
    assert_eq!(coordinators.len(), 1);
    assert_eq!(coordinators[0].role, WorkerRole::Queen);
    assert_eq!(
        workers.iter().filter(|w| w.worker_type == WorkerType::Worker).count(),
        2
    );
    assert!(workers.iter().all(|w| w.status == WorkerStatus::Idle));
}

/// Test: Ring wiring
/// Given a ring of 4
/// Then node 0 links to nodes 3 and 1, and node 3 to nodes 2 and 0
#[test]
fn test_ring_of_four_neighbors() {
    let mut t = TestSwarm::new();

    let topology = t
        .swarm
        .init_topology(TopologyKind::Ring, 4, TopologyStrategy::Balanced, false)
        .unwrap();

    let m = &topology.members;
    assert_eq!(t.swarm.get_worker(&m[0]).unwrap().neighbors, vec![m[3], m[1]]);
    assert_eq!(t.swarm.get_worker(&m[3]).unwrap().neighbors, vec![m[2], m[0]]);
}

#[test]
fn test_ring_neighbors_hold_for_every_position() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Ring, 6, TopologyStrategy::Balanced, false)
        .unwrap();
    let m = &topology.members;
    let n = m.len();

    for (i, id) in m.iter().enumerate() {
        let (prev, next) = ring_neighbors(i, n);
        assert_eq!(t.swarm.get_worker(id).unwrap().neighbors, vec![m[prev], m[next]]);
    }
}

#[test]
fn test_member_count_never_exceeds_cap() {
    let mut t = TestSwarm::new();
    for kind in TopologyKind::ALL {
        for max in 1..=8 {
            let topology = t
                .swarm
                .init_topology(kind, max, TopologyStrategy::Balanced, false)
                .unwrap();
            assert!(
                topology.members.len() <= max,
                "{} with max {} placed {} workers",
                kind,
                max,
                topology.members.len()
            );
            assert!(!topology.members.is_empty());
        }
    }
}

#[test]
fn test_zero_max_workers_rejected() {
    let mut t = TestSwarm::new();
    let result = t
        .swarm
        .init_topology(TopologyKind::Mesh, 0, TopologyStrategy::Balanced, false);
    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(t.swarm.list_workers(&WorkerFilter::new()).unwrap().is_empty());
}

#[test]
fn test_spawn_into_full_topology_fails() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Mesh, 2, TopologyStrategy::Balanced, false)
        .unwrap();

    let result = t.swarm.spawn_worker(WorkerConfig::new(WorkerType::Coder, topology.id));

    assert!(matches!(result, Err(Error::TopologyFull { max: 2 })));
}

/// Test: Spawned workers join the topology wiring
/// Given a star with a free slot
/// When a worker is spawned into it
/// Then the hub gains it as a neighbor
#[test]
fn test_spawned_worker_is_wired_to_hub() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Star, 8, TopologyStrategy::Balanced, false)
        .unwrap();
    assert_eq!(topology.members.len(), 5);

    let worker = t
        .swarm
        .spawn_worker(WorkerConfig::new(WorkerType::Analyst, topology.id).with_name("analyst"))
        .unwrap();

    let hub = t.swarm.get_worker(&topology.members[0]).unwrap();
    assert!(hub.neighbors.contains(&worker.id));
    assert_eq!(t.swarm.get_worker(&worker.id).unwrap().neighbors, vec![hub.id]);
}

/// Test: Switching reshapes in place
/// Given a ring of 6
/// When switched to hierarchical
/// Then members are reshaped, surplus ones retired, and the cap holds
#[test]
fn test_switch_ring_to_hierarchical() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Ring, 6, TopologyStrategy::Balanced, false)
        .unwrap();
    t.take_events();

    let outcome = t.swarm.switch_topology(&topology.id, TopologyKind::Hierarchical).unwrap();

    assert_eq!(outcome.previous_kind, TopologyKind::Ring);
    assert_eq!(outcome.new_kind, TopologyKind::Hierarchical);
    assert_eq!(outcome.reshaped.len(), 4);
    assert_eq!(outcome.terminated.len(), 2);
    assert!(outcome.spawned.is_empty());

    let after = t.swarm.topologies().get(&topology.id).unwrap().clone();
    assert_eq!(after.kind, TopologyKind::Hierarchical);
    assert_eq!(after.members.len(), 4);
    let queen = t.swarm.get_worker(&after.members[0]).unwrap();
    assert_eq!(queen.role, WorkerRole::Queen);
    assert_eq!(queen.neighbors.len(), 3);

    let events = t.take_events();
    assert!(events.contains(&SwarmEvent::TopologySwitched {
        topology_id: topology.id,
        from: TopologyKind::Ring,
        to: TopologyKind::Hierarchical,
    }));
}

#[test]
fn test_switch_to_larger_shape_spawns_missing_members() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Hierarchical, 6, TopologyStrategy::Balanced, false)
        .unwrap();
    assert_eq!(topology.members.len(), 4);

    let outcome = t.swarm.switch_topology(&topology.id, TopologyKind::Ring).unwrap();

    assert_eq!(outcome.spawned.len(), 2);
    let after = t.swarm.topologies().get(&topology.id).unwrap();
    assert_eq!(after.members.len(), 6);
}

#[test]
fn test_spawn_refused_while_switch_in_flight() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Mesh, 4, TopologyStrategy::Balanced, false)
        .unwrap();
    t.swarm.terminate_worker(&topology.members[0]).unwrap();

    let plan = t.swarm.plan_switch(&topology.id, TopologyKind::Ring).unwrap();
    let result = t.swarm.spawn_worker(WorkerConfig::new(WorkerType::Peer, topology.id));
    assert!(matches!(result, Err(Error::TopologyBusy(_))));

    t.swarm.abort_switch(&plan);
    assert!(t.swarm.spawn_worker(WorkerConfig::new(WorkerType::Peer, topology.id)).is_ok());
}

/// Test: Bulk teardown
/// Given a populated star
/// When torn down
/// Then every member is terminated and the topology is gone
#[test]
fn test_teardown_terminates_all_members() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Star, 4, TopologyStrategy::Balanced, false)
        .unwrap();

    let summary = t.swarm.teardown_topology(&topology.id).unwrap();

    assert_eq!(summary.topology_id, topology.id);
    assert_eq!(summary.terminated.len(), 4);
    assert!(summary.failures.is_empty());
    assert!(t.swarm.list_workers(&WorkerFilter::new()).unwrap().is_empty());
    assert!(matches!(
        t.swarm.topologies().get(&topology.id),
        Err(Error::TopologyNotFound { .. })
    ));

    // Final snapshots stay queryable
    let history = t
        .swarm
        .list_workers(&WorkerFilter::new().in_swarm(topology.id).include_terminated())
        .unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|w| w.status == WorkerStatus::Terminated));
}

#[test]
fn test_terminate_twice_is_not_found() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Mesh, 2, TopologyStrategy::Balanced, false)
        .unwrap();
    let id = topology.members[0];

    t.swarm.terminate_worker(&id).unwrap();
    let again = t.swarm.terminate_worker(&id);

    assert!(matches!(again, Err(Error::WorkerNotFound { .. })));
    assert_eq!(t.swarm.topologies().get(&topology.id).unwrap().members.len(), 1);
}

/// Test: Members are pinned during a switch
/// Given a mesh with a switch in flight
/// When one of its members is terminated
/// Then the terminate is refused and the switch still commits cleanly
#[test]
fn test_terminate_refused_while_switch_in_flight() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Mesh, 4, TopologyStrategy::Balanced, false)
        .unwrap();
    let plan = t.swarm.plan_switch(&topology.id, TopologyKind::Star).unwrap();

    let result = t.swarm.terminate_worker(&topology.members[0]);
    assert!(matches!(result, Err(Error::TopologyBusy(_))));

    t.swarm.commit_switch(plan).unwrap();
    assert!(!t.swarm.topologies().is_busy(&topology.id));
    let after = t.swarm.topologies().get(&topology.id).unwrap();
    assert_eq!(after.kind, TopologyKind::Star);
    assert_eq!(after.members, topology.members);
    assert!(t.swarm.terminate_worker(&topology.members[0]).is_ok());
}

/// Test: Failed switch commit
/// Given a switch plan naming a member that no longer exists
/// When it is committed
/// Then the switch is rolled back and the topology can switch again
#[test]
fn test_failed_switch_commit_rolls_back() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Mesh, 6, TopologyStrategy::Balanced, false)
        .unwrap();
    assert_eq!(topology.members.len(), 5);
    let mut plan = t.swarm.plan_switch(&topology.id, TopologyKind::Ring).unwrap();
    assert_eq!(plan.spawn.len(), 1);
    let launched = plan.spawn[0].id;
    plan.reshape[0].0 = WorkerId::new();

    let result = t.swarm.commit_switch(plan);

    assert!(matches!(result, Err(Error::WorkerNotFound { .. })));
    assert!(!t.swarm.topologies().is_busy(&topology.id));
    assert!(t.swarm.get_worker(&launched).is_err());
    let retired: Vec<WorkerId> = t.swarm.drain_retired().iter().map(|w| w.id).collect();
    assert_eq!(retired, vec![launched]);
    let unchanged = t.swarm.topologies().get(&topology.id).unwrap();
    assert_eq!(unchanged.kind, TopologyKind::Mesh);
    assert_eq!(unchanged.members, topology.members);

    let outcome = t.swarm.switch_topology(&topology.id, TopologyKind::Ring).unwrap();
    assert_eq!(outcome.new_kind, TopologyKind::Ring);
    assert_eq!(t.swarm.topologies().get(&topology.id).unwrap().members.len(), 6);
}

/// Test: Hub succession
/// Given a star topology
/// When its hub is terminated
/// Then the next member takes the hub role and every spoke points at it
#[test]
fn test_hub_removal_promotes_successor() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Star, 4, TopologyStrategy::Balanced, false)
        .unwrap();
    let successor = topology.members[1];

    t.swarm.terminate_worker(&topology.members[0]).unwrap();

    let hub = t.swarm.get_worker(&successor).unwrap();
    assert_eq!(hub.role, WorkerRole::Hub);
    assert_eq!(hub.worker_type, WorkerType::Hub);
    assert_eq!(hub.neighbors, topology.members[2..].to_vec());
    for spoke in &topology.members[2..] {
        let worker = t.swarm.get_worker(spoke).unwrap();
        assert_eq!(worker.role, WorkerRole::Spoke);
        assert_eq!(worker.neighbors, vec![successor]);
    }
}
