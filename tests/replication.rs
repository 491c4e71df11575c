use raftkv::clerk::Clerk;
use raftkv::config::{KvServerConfig, RaftConfig};
use raftkv::kvserver::op::OpKind;
use raftkv::kvserver::{GetArgs, GetReply, KvServer, PutAppendArgs, PutAppendReply};
use raftkv::persist::Persister;
use raftkv::raft::RaftPeer;
use raftkv::transport::{call_rpc, RpcServer, RpcTransport, TcpTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Node {
    raft: Arc<RaftPeer>,
    kv: Arc<KvServer>,
    persister: Arc<Persister>,
    addr: String,
    serve_handle: JoinHandle<anyhow::Result<()>>,
}

impl Node {
    fn kill(&self) {
        self.raft.kill();
        self.kv.kill();
        self.serve_handle.abort();
    }
}

/// Boots an `n`-node cluster on consecutive loopback ports starting at
/// `base_port`, each backed by an in-memory persister, and waits briefly for
/// an election to settle before returning.
async fn spawn_cluster(base_port: u16, n: u16, max_raft_state: Option<usize>) -> Vec<Node> {
    let addrs: Vec<String> = (0..n)
        .map(|i| format!("127.0.0.1:{}", base_port + i))
        .collect();

    let mut nodes = Vec::new();
    for i in 0..n as usize {
        let peers: Vec<String> = addrs
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, a)| a.clone())
            .collect();

        let mut raft_config = RaftConfig::new(addrs[i].clone(), addrs[i].clone(), peers);
        raft_config.election_timeout_min_ms = 150;
        raft_config.election_timeout_max_ms = 300;
        raft_config.heartbeat_interval_ms = 50;
        let kv_config = KvServerConfig::new(raft_config.clone()).with_max_raft_state(max_raft_state);

        let persister = Arc::new(Persister::new_in_memory());
        let transport = Arc::new(TcpTransport::default());
        let (raft, apply_rx) = RaftPeer::new(raft_config, transport, Arc::clone(&persister));
        let kv = KvServer::new(Arc::clone(&raft), Arc::clone(&persister), &kv_config);
        kv.run(apply_rx);
        raft.run();

        let server = Arc::new(RpcServer::with_kv(Arc::clone(&raft), Arc::clone(&kv)));
        let addr = addrs[i].clone();
        let serve_handle = tokio::spawn(async move { server.serve(&addr).await });

        nodes.push(Node {
            raft,
            kv,
            persister,
            addr: addrs[i].clone(),
            serve_handle,
        });
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    nodes
}

fn clerk_for(nodes: &[Node]) -> Clerk {
    let servers: Vec<String> = nodes.iter().map(|n| n.addr.clone()).collect();
    Clerk::new(servers, Arc::new(TcpTransport::default()))
}

async fn find_leader(nodes: &[Node]) -> usize {
    for _ in 0..200 {
        for (i, node) in nodes.iter().enumerate() {
            if node.raft.is_leader().await {
                return i;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no leader elected in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn put_get_round_trip_on_a_three_node_cluster() {
    let nodes = spawn_cluster(21100, 3, None).await;
    let clerk = clerk_for(&nodes);

    clerk.put("color", "blue").await;
    assert_eq!(clerk.get("color").await, "blue");

    clerk.put("color", "green").await;
    assert_eq!(clerk.get("color").await, "green");

    assert_eq!(clerk.get("missing-key").await, "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn append_prepends_ahead_of_the_existing_value() {
    let nodes = spawn_cluster(21110, 3, None).await;
    let clerk = clerk_for(&nodes);

    clerk.put("k", "a").await;
    clerk.append("k", "b").await;
    clerk.append("k", "c").await;

    assert_eq!(clerk.get("k").await, "cba");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_survives_the_leader_crashing_mid_session() {
    let nodes = spawn_cluster(21120, 3, None).await;
    let clerk = clerk_for(&nodes);

    clerk.put("x", "1").await;
    assert_eq!(clerk.get("x").await, "1");

    let leader = find_leader(&nodes).await;
    nodes[leader].kill();

    // A fresh election must happen among the two survivors before the
    // clerk's retry loop can land on the new leader.
    clerk.put("x", "2").await;
    assert_eq!(clerk.get("x").await, "2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_put_append_rpcs_apply_at_most_once() {
    let nodes = spawn_cluster(21130, 3, None).await;
    let transport = Arc::new(TcpTransport::default()) as Arc<dyn RpcTransport>;

    let leader = find_leader(&nodes).await;
    let addr = &nodes[leader].addr;

    let put_args = PutAppendArgs {
        key: "dup".to_string(),
        value: "first".to_string(),
        op: OpKind::Put,
        clerk_id: 42,
        op_id: 0,
    };
    let reply: Option<PutAppendReply> =
        call_rpc(&*transport, addr, "KVServer.PutAppend", &put_args).await;
    assert!(reply.unwrap().result.is_ok());

    let append_args = PutAppendArgs {
        key: "dup".to_string(),
        value: "-more".to_string(),
        op: OpKind::Append,
        clerk_id: 42,
        op_id: 1,
    };
    for _ in 0..3 {
        let reply: Option<PutAppendReply> =
            call_rpc(&*transport, addr, "KVServer.PutAppend", &append_args).await;
        assert!(reply.unwrap().result.is_ok());
    }

    let get_args = GetArgs {
        key: "dup".to_string(),
        clerk_id: 42,
        op_id: 2,
    };
    let reply: Option<GetReply> = call_rpc(&*transport, addr, "KVServer.Get", &get_args).await;
    assert_eq!(reply.unwrap().result.unwrap(), "-morefirst");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn raft_state_is_snapshotted_once_it_crosses_the_configured_limit() {
    let nodes = spawn_cluster(21140, 3, Some(512)).await;
    let clerk = clerk_for(&nodes);

    for i in 0..200 {
        clerk
            .put(&format!("key-{i}"), "some moderately sized value to grow the log")
            .await;
    }

    let mut snapshotted = false;
    for node in &nodes {
        if !node.persister.snapshot().is_empty() {
            snapshotted = true;
        }
    }
    assert!(snapshotted, "no node produced a snapshot under the configured limit");
}
