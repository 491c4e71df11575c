use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The KV layer's snapshot payload, serialised into the persister's snapshot
/// slot: the key-value map plus the dedup table, so a restored peer treats
/// every previously-applied op as already applied.
#[derive(Serialize, Deserialize)]
struct KvSnapshot {
    db: HashMap<String, String>,
    max_applied: HashMap<u64, u64>,
}

pub(super) fn encode_snapshot(
    db: &HashMap<String, String>,
    max_applied: &HashMap<u64, u64>,
) -> Vec<u8> {
    let snapshot = KvSnapshot {
        db: db.clone(),
        max_applied: max_applied.clone(),
    };
    bincode::serialize(&snapshot).expect("kv snapshot always encodes")
}

pub(super) fn decode_snapshot(
    bytes: &[u8],
) -> Result<(HashMap<String, String>, HashMap<u64, u64>)> {
    let snapshot: KvSnapshot = bincode::deserialize(bytes)?;
    Ok((snapshot.db, snapshot.max_applied))
}
