use raft_kv_store::message::{self, RaftMessage, Status};
use raft_kv_store::raft::{RaftConfig, RaftNode};
use raft_kv_store::state_machine::INVALID_COMMAND;
use raft_kv_store::Address;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

static NEXT_PORT: AtomicU16 = AtomicU16::new(24000);

fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

fn test_dir(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("raft_kv_store_it_{name}_{}", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

fn test_config(dir: String) -> RaftConfig {
    RaftConfig {
        storage_dir: dir,
        heartbeat_interval: Duration::from_millis(40),
        election_timeout_min: Duration::from_millis(150),
        election_timeout_max: Duration::from_millis(300),
        rpc_timeout: Duration::from_millis(200),
        retry_count: 5,
    }
}

/// Forwards incoming framed `RaftMessage`s on `address` to `node`, mirroring
/// the server binary's connection loop.
async fn start_listener(node: Arc<RaftNode>, address: Address) {
    let listener = TcpListener::bind(address.socket_addr()).await.expect("bind test listener");
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let node = Arc::clone(&node);
            tokio::spawn(async move {
                if let Ok(request) = message::read_message(&mut stream).await {
                    if let Some(response) = node.handle_message(request).await {
                        let _ = message::write_message(&mut stream, &response).await;
                    }
                }
            });
        }
    });
}

async fn bring_up_leader(name: &str) -> (Arc<RaftNode>, Address) {
    let address = Address::new("127.0.0.1", next_port());
    let node = RaftNode::new(address.clone(), test_config(test_dir(name))).await.unwrap();
    node.bootstrap_as_leader().await;
    start_listener(Arc::clone(&node), address.clone()).await;
    node.start().await;
    (node, address)
}

async fn join_cluster(name: &str, contact: Address) -> (Arc<RaftNode>, Address) {
    let address = Address::new("127.0.0.1", next_port());
    let node = RaftNode::new(address.clone(), test_config(test_dir(name))).await.unwrap();
    start_listener(Arc::clone(&node), address.clone()).await;
    node.join(contact).await.unwrap();
    node.start().await;
    (node, address)
}

async fn execute(target: &Address, command: &str) -> RaftMessage {
    let request = RaftMessage::Execute { command: command.to_string(), value: String::new() };
    message::call(target, &request, Duration::from_millis(500)).await.unwrap()
}

#[tokio::test]
async fn single_leader_bootstrap_serves_ping() {
    let (_node, address) = bring_up_leader("single_leader_ping").await;

    let response = execute(&address, "ping").await;
    match response {
        RaftMessage::ExecuteResponse { status: Status::Success, data, .. } => assert_eq!(data, "PONG"),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_command_is_a_successful_no_op() {
    let (_node, address) = bring_up_leader("invalid_command").await;

    let response = execute(&address, "frobnicate").await;
    match response {
        RaftMessage::ExecuteResponse { status: Status::Success, data, .. } => assert_eq!(data, INVALID_COMMAND),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn follower_redirects_execute_to_the_leader() {
    let (_leader, leader_addr) = bring_up_leader("redirect_leader").await;
    let (_follower, follower_addr) = join_cluster("redirect_follower", leader_addr.clone()).await;

    let response = execute(&follower_addr, "ping").await;
    match response {
        RaftMessage::ExecuteResponse { status: Status::Redirected, address, .. } => {
            assert_eq!(address, leader_addr);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn three_node_cluster_replicates_a_transaction() {
    let (leader, leader_addr) = bring_up_leader("cluster_leader").await;
    let (follower_a, _) = join_cluster("cluster_follower_a", leader_addr.clone()).await;
    let (follower_b, _) = join_cluster("cluster_follower_b", leader_addr.clone()).await;

    let response = execute(&leader_addr, "set key value; append key 123; strln key").await;
    match response {
        RaftMessage::ExecuteResponse { status: Status::Success, data, .. } => assert_eq!(data, "8"),
        other => panic!("unexpected response: {other:?}"),
    }

    // Give the followers a few heartbeat rounds to catch up.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(leader.commit_length().await, 1);
    assert_eq!(follower_a.commit_length().await, 1);
    assert_eq!(follower_b.commit_length().await, 1);

    let leader_log = leader.log().await;
    let follower_a_log = follower_a.log().await;
    let follower_b_log = follower_b.log().await;
    assert_eq!(leader_log, follower_a_log);
    assert_eq!(leader_log, follower_b_log);
    assert_eq!(leader_log[0].value, "8");
}

#[tokio::test]
async fn request_log_is_intercepted_at_the_raft_layer() {
    let (_node, address) = bring_up_leader("request_log").await;
    execute(&address, "set a 1").await;

    let response = execute(&address, "request_log").await;
    match response {
        RaftMessage::ExecuteResponse { status: Status::Success, data, .. } => {
            let entries: Vec<raft_kv_store::LogEntry> = serde_json::from_str(&data).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].command, "set a 1");
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn restart_reloads_log_and_replays_committed_state() {
    let dir = test_dir("restart_replay");
    let address = Address::new("127.0.0.1", next_port());

    {
        let node = RaftNode::new(address.clone(), test_config(dir.clone())).await.unwrap();
        node.bootstrap_as_leader().await;
        start_listener(Arc::clone(&node), address.clone()).await;
        node.start().await;
        execute(&address, "set durable yes").await;
        assert_eq!(node.commit_length().await, 1);
    }

    let restarted = RaftNode::new(address.clone(), test_config(dir)).await.unwrap();
    assert_eq!(restarted.commit_length().await, 1);
    let log = restarted.log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].command, "set durable yes");
    assert_eq!(log[0].value, "OK");
}

#[tokio::test]
async fn a_follower_wins_election_after_the_leader_goes_silent() {
    // Three members so a majority (2) is reachable between the two followers
    // even though the deposed leader is still technically running (it just
    // stops sending heartbeats and rejects votes with a stale-term failure).
    let (leader, leader_addr) = bring_up_leader("election_leader").await;
    let (follower_a, follower_a_addr) = join_cluster("election_follower_a", leader_addr.clone()).await;
    let (follower_b, _follower_b_addr) = join_cluster("election_follower_b", leader_addr.clone()).await;

    // Let the followers observe at least one heartbeat before the leader disappears.
    tokio::time::sleep(Duration::from_millis(100)).await;
    leader.shutdown().await;

    // No more heartbeats will arrive; wait past a follower's election timeout.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let new_leader = follower_a.is_leader().await || follower_b.is_leader().await;
    assert!(new_leader, "one of the remaining followers should have elected itself leader");
    let _ = execute(&follower_a_addr, "ping").await;
}
