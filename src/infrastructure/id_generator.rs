// ID Generator - Snowflake-like ids for actors, posts and comments
// 64-bit ID format: [timestamp:42][node_id:10][sequence:12]

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::current_time_millis;

const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << 42) - 1;
const NODE_MASK: u64 = (1 << NODE_BITS) - 1;

/// Generates ids that sort by creation time.
/// 1024 nodes, 4096 ids per millisecond per node.
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    // packed [timestamp:52][sequence:12] of the last issued id
    state: AtomicU64,
}

impl IdGenerator {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: (node_id as u64 & NODE_MASK) as u16,
            state: AtomicU64::new(0),
        }
    }

    /// Generate next unique id
    pub fn next_id(&self) -> i64 {
        loop {
            let now = current_time_millis().max(0) as u64;
            let prev = self.state.load(Ordering::Acquire);
            let prev_ts = prev >> SEQUENCE_BITS;
            let prev_seq = prev & SEQUENCE_MASK;

            // Clock going backwards keeps issuing from the last timestamp
            let (ts, seq) = if now > prev_ts {
                (now, 0)
            } else if prev_seq < SEQUENCE_MASK {
                (prev_ts, prev_seq + 1)
            } else {
                // Sequence exhausted for this millisecond, borrow the next one
                (prev_ts + 1, 0)
            };

            let next = (ts << SEQUENCE_BITS) | seq;
            if self
                .state
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let id = ((ts & TIMESTAMP_MASK) << (NODE_BITS + SEQUENCE_BITS))
                    | ((self.node_id as u64) << SEQUENCE_BITS)
                    | seq;
                return id as i64;
            }
        }
    }

    /// Extract timestamp (milliseconds) from an id
    pub fn extract_timestamp(id: i64) -> u64 {
        (id as u64) >> (NODE_BITS + SEQUENCE_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_id_generation() {
        let generator = IdGenerator::new(123);

        let id1 = generator.next_id();
        let id2 = generator.next_id();
        let id3 = generator.next_id();

        assert!(id1 < id2 && id2 < id3);
        let node_of = |id: i64| ((id as u64) >> SEQUENCE_BITS) & NODE_MASK;
        assert_eq!(node_of(id1), 123);
        assert_eq!(node_of(id3), 123);
        assert!(id1 > 0);
    }

    #[test]
    fn test_timestamp_extraction() {
        let generator = IdGenerator::new(7);
        let before = current_time_millis() as u64;
        let id = generator.next_id();
        let ts = IdGenerator::extract_timestamp(id);
        assert!(ts >= before);
        assert!(ts <= current_time_millis() as u64);
    }

    #[test]
    fn test_unique_across_threads() {
        let generator = Arc::new(IdGenerator::new(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..5_000).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 40_000);
    }
}
