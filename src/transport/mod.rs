pub mod wire;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::kvserver::KvServer;
use crate::raft::RaftPeer;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Generic request/reply RPC over addressable peer endpoints, named by
/// method (`"Raft.RequestVote"`, `"KVServer.Get"`, ...).
pub trait RpcTransport: Send + Sync {
    fn call(&self, peer: &str, method: &'static str, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>>>;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    method: String,
    payload: Vec<u8>,
}

/// TCP transport: one connection per call, length-prefixed JSON frames.
pub struct TcpTransport {
    pub timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        TcpTransport {
            timeout: Duration::from_millis(5000),
        }
    }
}

impl RpcTransport for TcpTransport {
    fn call(&self, peer: &str, method: &'static str, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>>> {
        let peer = peer.to_string();
        let timeout = self.timeout;
        Box::pin(async move {
            let fut = async {
                let mut stream = TcpStream::connect(&peer).await?;
                let envelope = Envelope {
                    method: method.to_string(),
                    payload,
                };
                let bytes = wire::encode(&envelope)?;
                wire::write_frame(&mut stream, &bytes).await?;
                wire::read_frame(&mut stream).await
            };
            tokio::time::timeout(timeout, fut)
                .await
                .context("rpc call timed out")?
        })
    }
}

/// Inbound side: one listener per node, dispatching by method name to
/// whichever service (`RaftPeer` or `KvServer`) owns it, so Raft and KV
/// traffic share one port per node.
pub struct RpcServer {
    raft: Arc<RaftPeer>,
    kv: Option<Arc<KvServer>>,
}

impl RpcServer {
    pub fn new(raft: Arc<RaftPeer>) -> Self {
        RpcServer { raft, kv: None }
    }

    pub fn with_kv(raft: Arc<RaftPeer>, kv: Arc<KvServer>) -> Self {
        RpcServer {
            raft,
            kv: Some(kv),
        }
    }

    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding rpc listener on {addr}"))?;
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!("rpc accept failed: {e}");
                    continue;
                }
            };
            debug!("rpc connection from {peer_addr}");
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream).await {
                    debug!("rpc connection from {peer_addr} failed: {e}");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let bytes = wire::read_frame(&mut stream).await?;
        let envelope: Envelope = wire::decode(&bytes)?;
        let reply = self.dispatch(&envelope.method, envelope.payload).await?;
        wire::write_frame(&mut stream, &reply).await
    }

    async fn dispatch(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        match method {
            "Raft.RequestVote" => {
                let args = wire::decode(&payload)?;
                let reply = self.raft.handle_request_vote(args).await;
                wire::encode(&reply)
            }
            "Raft.AppendEntries" => {
                let args = wire::decode(&payload)?;
                let reply = self.raft.handle_append_entries(args).await;
                wire::encode(&reply)
            }
            "Raft.InstallSnapshot" => {
                let args = wire::decode(&payload)?;
                let reply = self.raft.handle_install_snapshot(args).await;
                wire::encode(&reply)
            }
            "Raft.Init" => {
                let args = wire::decode(&payload)?;
                let reply = self.raft.handle_init(args).await;
                wire::encode(&reply)
            }
            "KVServer.Get" => {
                let kv = self
                    .kv
                    .as_ref()
                    .context("node has no KVServer registered")?;
                let args = wire::decode(&payload)?;
                let reply = kv.handle_get(args).await;
                wire::encode(&reply)
            }
            "KVServer.PutAppend" => {
                let kv = self
                    .kv
                    .as_ref()
                    .context("node has no KVServer registered")?;
                let args = wire::decode(&payload)?;
                let reply = kv.handle_put_append(args).await;
                wire::encode(&reply)
            }
            other => anyhow::bail!("unknown rpc method {other}"),
        }
    }
}

/// Convenience used by `RaftPeer`/`KvServer`: round-trip a single named RPC
/// through a `dyn RpcTransport`, encoding the request and decoding the
/// reply, or returning `None` on any transport/decode failure (callers treat
/// a failed call the same as a dropped message).
pub async fn call_rpc<Req: Serialize, Rep: for<'de> Deserialize<'de>>(
    transport: &dyn RpcTransport,
    peer: &str,
    method: &'static str,
    args: &Req,
) -> Option<Rep> {
    let payload = wire::encode(args).ok()?;
    let reply_bytes = transport.call(peer, method, payload).await.ok()?;
    wire::decode(&reply_bytes).ok()
}

