use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Mints a peer id "from a monotonic source" (§3) for a client that
/// connected without a `?peer_id=` query parameter: a millisecond
/// timestamp plus a process-local sequence number, so two connections
/// landing in the same millisecond still get distinct ids.
pub fn generate_peer_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("peer-{millis}-{seq}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_peer_id();
        let b = generate_peer_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
