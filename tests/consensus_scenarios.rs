//! End-to-end scenarios run against an in-process multi-node cluster
//! (§8). Each test wires up the harness in `docraft::test_utils`
//! (enabled here via the `test-util` feature) rather than real sockets,
//! matching the teacher's own `tests/` style of driving whole-node
//! behavior without a network.

use std::collections::HashMap;
use std::time::Duration;

use docraft::consensus::ConsensusHandle;
use docraft::error::Error;
use docraft::gateway::Gateway;
use docraft::test_utils::Cluster;

async fn wait_for_leader(cluster: &Cluster, handles: &HashMap<String, ConsensusHandle>) -> String {
    for _ in 0..100 {
        for (id, handle) in handles {
            if handle.server_status().await.role == "leader" {
                return id.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("no leader elected within the timeout; cluster: {:?}", cluster.nodes.keys().collect::<Vec<_>>());
}

fn gateway_for(cluster: &Cluster, handles: &HashMap<String, ConsensusHandle>, id: &str) -> Gateway {
    let peers = cluster
        .nodes
        .keys()
        .filter(|p| p.as_str() != id)
        .cloned()
        .collect();
    Gateway::new(handles[id].clone(), cluster.state_machine(id), peers)
}

#[tokio::test]
async fn three_node_cluster_elects_exactly_one_leader() {
    let cluster = Cluster::new(&["n1", "n2", "n3"]).await;
    let handles = cluster.spawn_all();

    let _leader = wait_for_leader(&cluster, &handles).await;
    let mut leader_count = 0;
    for (_, handle) in &handles {
        if handle.server_status().await.role == "leader" {
            leader_count += 1;
        }
    }
    assert_eq!(leader_count, 1, "exactly one node must be leader");

    for handle in handles.values() {
        handle.stop().await;
    }
}

#[tokio::test]
async fn register_create_and_replicate_to_followers() {
    let cluster = Cluster::new(&["n1", "n2", "n3"]).await;
    let handles = cluster.spawn_all();
    let leader = wait_for_leader(&cluster, &handles).await;
    let gw = gateway_for(&cluster, &handles, &leader);

    gw.register_user("alice", "hunter2").await.unwrap();
    let outcome = gw.create_document("Notes", "alice").await.unwrap();
    let doc_id = outcome.document_id.clone().unwrap();

    gw.update_document_content(&doc_id, "hello world", "alice")
        .await
        .unwrap();

    // Give the apply loop on every replica a moment to catch up over
    // subsequent heartbeats.
    tokio::time::sleep(Duration::from_millis(500)).await;

    for id in cluster.nodes.keys() {
        let doc = cluster
            .state_machine(id)
            .get_document(&doc_id)
            .unwrap()
            .unwrap_or_else(|| panic!("document missing on replica {id}"));
        assert_eq!(doc.data, "hello world");
        assert_eq!(doc.users, vec!["alice".to_string()]);
    }

    for handle in handles.values() {
        handle.stop().await;
    }
}

#[tokio::test]
async fn non_member_access_is_rejected() {
    let cluster = Cluster::new(&["n1", "n2", "n3"]).await;
    let handles = cluster.spawn_all();
    let leader = wait_for_leader(&cluster, &handles).await;
    let gw = gateway_for(&cluster, &handles, &leader);

    gw.register_user("alice", "pw").await.unwrap();
    gw.register_user("mallory", "pw").await.unwrap();
    let outcome = gw.create_document("Private", "alice").await.unwrap();
    let doc_id = outcome.document_id.unwrap();

    let err = gw
        .update_document_title(&doc_id, "Hijacked", "mallory")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authorization(_)));

    for handle in handles.values() {
        handle.stop().await;
    }
}

#[tokio::test]
async fn writes_against_a_follower_are_refused_with_leader_hint() {
    let cluster = Cluster::new(&["n1", "n2", "n3"]).await;
    let handles = cluster.spawn_all();
    let leader = wait_for_leader(&cluster, &handles).await;
    // Give the new leader's first heartbeat round a chance to land so
    // followers have actually learned who the leader is.
    tokio::time::sleep(Duration::from_millis(700)).await;

    let follower = cluster
        .nodes
        .keys()
        .find(|id| id.as_str() != leader)
        .unwrap()
        .clone();
    let gw = gateway_for(&cluster, &handles, &follower);

    let err = gw.register_user("bob", "pw").await.unwrap_err();
    match err {
        Error::NotLeader { leader_id } => assert_eq!(leader_id.as_deref(), Some(leader.as_str())),
        other => panic!("expected NotLeader, got {other:?}"),
    }

    for handle in handles.values() {
        handle.stop().await;
    }
}

#[tokio::test]
async fn concurrent_content_updates_merge_through_the_leader() {
    let cluster = Cluster::new(&["n1", "n2", "n3"]).await;
    let handles = cluster.spawn_all();
    let leader = wait_for_leader(&cluster, &handles).await;
    let gw = gateway_for(&cluster, &handles, &leader);

    gw.register_user("alice", "pw").await.unwrap();
    let outcome = gw.create_document("Notes", "alice").await.unwrap();
    let doc_id = outcome.document_id.unwrap();

    gw.update_document_content(&doc_id, "hello world", "alice")
        .await
        .unwrap();
    // A second writer already landed their change on top of the base.
    gw.update_document_content(&doc_id, "HELLO world", "alice")
        .await
        .unwrap();

    let merged = gw
        .update_document_content_with_merge(&doc_id, "hello world", "hello WORLD", "alice")
        .await
        .unwrap();
    assert_eq!(merged.content.as_deref(), Some("HELLO WORLD"));

    for handle in handles.values() {
        handle.stop().await;
    }
}
