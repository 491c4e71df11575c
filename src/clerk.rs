use crate::kvserver::op::OpKind;
use crate::kvserver::{GetArgs, GetReply, PutAppendArgs, PutAppendReply};
use crate::transport::{call_rpc, RpcTransport};
use rand::Rng;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Client-side session: a random 62-bit id fixed for its lifetime, a
/// monotonically increasing per-session op counter, and a cached index into
/// `servers` where the last successful call landed (most calls after the
/// first hit the same leader).
pub struct Clerk {
    servers: Vec<String>,
    transport: Arc<dyn RpcTransport>,
    id: u64,
    next_op_id: AtomicU64,
    leader_hint: AtomicI64,
}

impl Clerk {
    pub fn new(servers: Vec<String>, transport: Arc<dyn RpcTransport>) -> Self {
        let id = rand::thread_rng().gen_range(0..=(1u64 << 62));
        Clerk {
            servers,
            transport,
            id,
            next_op_id: AtomicU64::new(0),
            leader_hint: AtomicI64::new(0),
        }
    }

    fn allocate_op_id(&self) -> u64 {
        self.next_op_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn get(&self, key: &str) -> String {
        let op_id = self.allocate_op_id();
        let args = GetArgs {
            key: key.to_string(),
            clerk_id: self.id,
            op_id,
        };
        loop {
            if let Some(value) = self.try_round(|server| {
                let transport = Arc::clone(&self.transport);
                let args = args.clone();
                async move {
                    let reply: Option<GetReply> =
                        call_rpc(&*transport, server, "KVServer.Get", &args).await;
                    reply.and_then(|r| r.result.ok())
                }
            }).await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn put(&self, key: &str, value: &str) {
        self.put_append(key, value, OpKind::Put).await;
    }

    pub async fn append(&self, key: &str, value: &str) {
        self.put_append(key, value, OpKind::Append).await;
    }

    async fn put_append(&self, key: &str, value: &str, kind: OpKind) {
        let op_id = self.allocate_op_id();
        let args = PutAppendArgs {
            key: key.to_string(),
            value: value.to_string(),
            op: kind,
            clerk_id: self.id,
            op_id,
        };
        loop {
            let done = self.try_round(|server| {
                let transport = Arc::clone(&self.transport);
                let args = args.clone();
                async move {
                    let reply: Option<PutAppendReply> =
                        call_rpc(&*transport, server, "KVServer.PutAppend", &args).await;
                    reply.and_then(|r| r.result.ok())
                }
            }).await;
            if done.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// One sweep round-robin from the cached leader: try every server in
    /// order starting at the hint, stopping at the first one that answers
    /// without `WrongLeader`/timeout, and caching it as the new hint.
    async fn try_round<F, Fut, T>(&self, mut call: F) -> Option<T>
    where
        F: FnMut(&str) -> Fut,
        Fut: std::future::Future<Output = Option<T>>,
    {
        let n = self.servers.len();
        let hint = self.leader_hint.load(Ordering::SeqCst) as usize % n;
        for offset in 0..n {
            let index = (hint + offset) % n;
            if let Some(result) = call(&self.servers[index]).await {
                self.leader_hint.store(index as i64, Ordering::SeqCst);
                return Some(result);
            }
        }
        None
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}
