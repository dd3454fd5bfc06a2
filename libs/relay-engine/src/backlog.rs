use std::collections::VecDeque;

use relay_api::Event;

/// The reader's cursor is no longer (or not yet) covered by the backlog.
///
/// Returned instead of a truncated result; the reader must restart from
/// `head`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cursor outside retained backlog, resync from {head}")]
pub struct ResyncRequired {
    pub head: u64,
}

// ═══════════════════════════════════════════════════════════════
//  Backlog
// ═══════════════════════════════════════════════════════════════

/// Bounded ring buffer of the most recent events of one topic.
///
/// Retained events are contiguous in sequence: `oldest..=head`.
#[derive(Debug)]
pub struct Backlog {
    events: VecDeque<Event>,
    capacity: usize,
    head: u64,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(65536)),
            capacity,
            head: 0,
        }
    }

    /// Sequence the next appended event must carry.
    pub fn next_sequence(&self) -> u64 {
        self.head + 1
    }

    /// Append an event, evicting the oldest one at capacity.
    pub fn append(&mut self, event: Event) {
        debug_assert_eq!(event.sequence, self.next_sequence());
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.head = event.sequence;
        self.events.push_back(event);
    }

    /// Sequence of the newest event, 0 before the first append.
    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn oldest(&self) -> Option<u64> {
        self.events.front().map(|e| e.sequence)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the whole retained backlog.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Every retained event with a sequence greater than `after`.
    pub fn read_from(&self, after: u64) -> Result<Vec<Event>, ResyncRequired> {
        if after > self.head {
            return Err(ResyncRequired { head: self.head });
        }
        if after == self.head {
            return Ok(Vec::new());
        }
        let oldest = match self.oldest() {
            Some(seq) => seq,
            None => return Err(ResyncRequired { head: self.head }),
        };
        if after + 1 < oldest {
            return Err(ResyncRequired { head: self.head });
        }
        let skip = (after + 1 - oldest) as usize;
        Ok(self.events.iter().skip(skip).cloned().collect())
    }

    /// `read_from(cursor)`, or the whole backlog when there is no cursor.
    pub fn read(&self, cursor: Option<u64>) -> Result<Vec<Event>, ResyncRequired> {
        match cursor {
            Some(after) => self.read_from(after),
            None => Ok(self.snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_api::Payload;

    fn filled(capacity: usize, count: u64) -> Backlog {
        let mut backlog = Backlog::new(capacity);
        for _ in 0..count {
            let sequence = backlog.next_sequence();
            backlog.append(Event {
                sequence,
                topic: "t".into(),
                payload: Payload::text(format!("e{sequence}")),
                ts_ms: 0,
            });
        }
        backlog
    }

    fn seqs(events: &[Event]) -> Vec<u64> {
        events.iter().map(|e| e.sequence).collect()
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let backlog = filled(3, 5);
        assert_eq!(backlog.len(), 3);
        assert_eq!(backlog.head(), 5);
        assert_eq!(backlog.oldest(), Some(3));
        assert_eq!(seqs(&backlog.snapshot()), vec![3, 4, 5]);
    }

    #[test]
    fn read_from_evicted_cursor_requires_resync() {
        let backlog = filled(3, 5);
        assert_eq!(backlog.read_from(1), Err(ResyncRequired { head: 5 }));
        assert_eq!(seqs(&backlog.read_from(2).unwrap()), vec![3, 4, 5]);
        assert_eq!(seqs(&backlog.read_from(3).unwrap()), vec![4, 5]);
    }

    #[test]
    fn cursor_at_head_is_empty() {
        let backlog = filled(3, 5);
        assert!(backlog.read_from(5).unwrap().is_empty());
    }

    #[test]
    fn cursor_ahead_of_head_requires_resync() {
        let backlog = filled(3, 5);
        assert_eq!(backlog.read_from(9), Err(ResyncRequired { head: 5 }));

        let empty = Backlog::new(3);
        assert_eq!(empty.read_from(4), Err(ResyncRequired { head: 0 }));
        assert!(empty.read_from(0).unwrap().is_empty());
    }

    #[test]
    fn no_cursor_reads_whole_backlog() {
        let backlog = filled(10, 4);
        assert_eq!(seqs(&backlog.read(None).unwrap()), vec![1, 2, 3, 4]);
        assert_eq!(seqs(&backlog.read(Some(0)).unwrap()), vec![1, 2, 3, 4]);
    }
}
