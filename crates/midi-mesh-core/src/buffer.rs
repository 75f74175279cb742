//! Per-source ordering, reorder handling, and dedup before delivery to the
//! router (spec.md §4.7).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use midi_mesh_proto::NodeId;

/// Returns `a - b` interpreted as signed 16-bit sequence-number arithmetic,
/// so wraparound (`0xFFFF -> 0x0000`) behaves like a difference of `+1`.
fn seq_diff(a: u16, b: u16) -> i32 {
    a.wrapping_sub(b) as i16 as i32
}

struct SourceState<T> {
    /// `None` until the first packet from this source has been seen —
    /// the first packet always seeds `next_expected` and delivers
    /// immediately, regardless of its sequence value.
    next_expected: Option<u16>,
    dedup_order: VecDeque<u16>,
    dedup_set: HashSet<u16>,
    reorder: HashMap<u16, (T, Instant)>,
}

impl<T> Default for SourceState<T> {
    fn default() -> Self {
        Self {
            next_expected: None,
            dedup_order: VecDeque::new(),
            dedup_set: HashSet::new(),
            reorder: HashMap::new(),
        }
    }
}

impl<T> SourceState<T> {
    fn mark_delivered(&mut self, sequence: u16, dedup_capacity: usize) {
        if self.dedup_set.insert(sequence) {
            self.dedup_order.push_back(sequence);
            if self.dedup_order.len() > dedup_capacity {
                if let Some(oldest) = self.dedup_order.pop_front() {
                    self.dedup_set.remove(&oldest);
                }
            }
        }
    }

    fn reset(&mut self, new_next_expected: u16) {
        self.next_expected = Some(new_next_expected);
        self.dedup_order.clear();
        self.dedup_set.clear();
        self.reorder.clear();
    }
}

pub struct MessageBuffer<T> {
    lookahead: u16,
    dedup_capacity: usize,
    gap_threshold: i32,
    reorder_timeout: Duration,
    sources: Mutex<HashMap<NodeId, SourceState<T>>>,
}

impl<T: Clone> MessageBuffer<T> {
    pub fn new(lookahead: u16, dedup_capacity: usize, gap_threshold: i32, reorder_timeout: Duration) -> Self {
        Self {
            lookahead,
            dedup_capacity,
            gap_threshold,
            reorder_timeout,
            sources: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            midi_mesh_proto::REORDER_LOOKAHEAD,
            midi_mesh_proto::DEDUP_WINDOW,
            midi_mesh_proto::GAP_THRESHOLD,
            Duration::from_millis(midi_mesh_proto::REORDER_TIMEOUT_MS),
        )
    }

    /// Feeds one arrival from `source` with wire `sequence`, returning the
    /// items (in order) now ready for delivery — zero, one, or several if a
    /// gap in the reorder buffer was just closed.
    pub fn push(&self, source: NodeId, sequence: u16, item: T) -> Vec<T> {
        let mut sources = self.sources.lock().unwrap();
        let state = sources.entry(source).or_default();

        let Some(next_expected) = state.next_expected else {
            // First packet from this source: seed and deliver immediately.
            state.mark_delivered(sequence, self.dedup_capacity);
            state.next_expected = Some(sequence.wrapping_add(1));
            return vec![item];
        };

        if state.dedup_set.contains(&sequence) {
            return Vec::new();
        }

        if sequence == next_expected {
            let mut delivered = vec![item];
            state.mark_delivered(sequence, self.dedup_capacity);
            let mut expected = next_expected.wrapping_add(1);
            while let Some((buffered, _)) = state.reorder.remove(&expected) {
                delivered.push(buffered);
                state.mark_delivered(expected, self.dedup_capacity);
                expected = expected.wrapping_add(1);
            }
            state.next_expected = Some(expected);
            return delivered;
        }

        let diff = seq_diff(sequence, next_expected);

        if diff > 0 && diff <= self.lookahead as i32 {
            state.reorder.insert(sequence, (item, Instant::now()));
            return Vec::new();
        }

        if diff > self.gap_threshold {
            // Sender restart: the peer's sequence counter jumped far ahead
            // (e.g. it was restarted). Drop everything we were tracking and
            // resynchronise on this packet.
            state.reset(sequence.wrapping_add(1));
            state.mark_delivered(sequence, self.dedup_capacity);
            return vec![item];
        }

        // Either far behind (stale duplicate that fell out of the dedup
        // window) or in the dead zone between lookahead and gap_threshold —
        // neither case can be delivered in order, so it is dropped.
        Vec::new()
    }

    /// Releases any buffered packet held longer than `reorder_timeout`,
    /// accepting the implied loss of whatever sequence it was waiting on,
    /// then drains any further contiguous run that unblocks.
    pub fn expire_overdue(&self, now: Instant) -> Vec<(NodeId, T)> {
        let mut sources = self.sources.lock().unwrap();
        let mut released = Vec::new();

        for (node, state) in sources.iter_mut() {
            let Some(next_expected) = state.next_expected else {
                continue;
            };

            let overdue_seq = state
                .reorder
                .iter()
                .filter(|(_, (_, inserted))| now.duration_since(*inserted) >= self.reorder_timeout)
                .map(|(seq, _)| *seq)
                .min_by_key(|seq| seq_diff(*seq, next_expected));

            let Some(seq) = overdue_seq else {
                continue;
            };

            let (item, _) = state.reorder.remove(&seq).unwrap();
            state.mark_delivered(seq, self.dedup_capacity);
            released.push((*node, item));

            let mut expected = seq.wrapping_add(1);
            while let Some((buffered, _)) = state.reorder.remove(&expected) {
                state.mark_delivered(expected, self.dedup_capacity);
                released.push((*node, buffered));
                expected = expected.wrapping_add(1);
            }
            state.next_expected = Some(expected);
        }

        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf() -> MessageBuffer<i32> {
        MessageBuffer::new(32, 256, 50, Duration::from_millis(50))
    }

    #[test]
    fn in_order_stream_delivers_in_order() {
        let b = buf();
        let source = NodeId::new_v4();
        for s in 0..5u16 {
            assert_eq!(b.push(source, s, s as i32), vec![s as i32]);
        }
    }

    #[test]
    fn reorder_and_dedup_scenario() {
        // Scenario 6 from spec.md §8: feed [1,2,4,3,3,5], expect [1,2,3,4,5].
        let b = buf();
        let source = NodeId::new_v4();
        let mut out = Vec::new();
        for s in [1u16, 2, 4, 3, 3, 5] {
            out.extend(b.push(source, s, s));
        }
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let b = buf();
        let source = NodeId::new_v4();
        assert_eq!(b.push(source, 0, 0), vec![0]);
        assert_eq!(b.push(source, 0, 0), Vec::<i32>::new());
    }

    #[test]
    fn sequence_wraparound_is_contiguous() {
        let b = buf();
        let source = NodeId::new_v4();
        assert_eq!(b.push(source, 0xFFFE, 1), vec![1]);
        assert_eq!(b.push(source, 0xFFFF, 2), vec![2]);
        assert_eq!(b.push(source, 0x0000, 3), vec![3]);
        assert_eq!(b.push(source, 0x0001, 4), vec![4]);
    }

    #[test]
    fn gap_over_threshold_triggers_reset_and_immediate_delivery() {
        let b = buf();
        let source = NodeId::new_v4();
        assert_eq!(b.push(source, 0, 0), vec![0]);
        // Jump far beyond gap_threshold (50): treated as a sender restart.
        let delivered = b.push(source, 500, 500);
        assert_eq!(delivered, vec![500]);
        // Next sequential packet continues from the new baseline.
        assert_eq!(b.push(source, 501, 501), vec![501]);
    }

    #[test]
    fn small_gap_within_lookahead_buffers_until_filled() {
        let b = buf();
        let source = NodeId::new_v4();
        assert_eq!(b.push(source, 0, 0), vec![0]);
        assert_eq!(b.push(source, 2, 2), Vec::<i32>::new());
        assert_eq!(b.push(source, 1, 1), vec![1, 2]);
    }

    #[test]
    fn expire_overdue_releases_after_timeout() {
        let b = MessageBuffer::new(32, 256, 50, Duration::from_millis(0));
        let source = NodeId::new_v4();
        assert_eq!(b.push(source, 0, 0), vec![0]);
        // seq 1 never arrives; seq 2 buffers waiting for it.
        assert_eq!(b.push(source, 2, 2), Vec::<i32>::new());
        let released = b.expire_overdue(Instant::now());
        assert_eq!(released, vec![(source, 2)]);
    }

    #[test]
    fn independent_sources_do_not_interfere() {
        let b = buf();
        let a = NodeId::new_v4();
        let c = NodeId::new_v4();
        assert_eq!(b.push(a, 5, 100), vec![100]);
        assert_eq!(b.push(c, 5, 200), vec![200]);
        assert_eq!(b.push(a, 6, 101), vec![101]);
    }
}
