use crate::kvserver::op::Op;
use serde::{Deserialize, Serialize};

/// One slot in the replicated log. Index 1-origin; the entry at position 0
/// of `Log::entries` is always a sentinel carrying only `(index, term)` —
/// its `command` is `None` and it doubles as the compaction anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub command: Option<Op>,
}

impl Entry {
    fn sentinel(index: u64, term: u64) -> Self {
        Entry {
            index,
            term,
            command: None,
        }
    }
}

/// An ordered sequence of entries plus the index of the sentinel at
/// position 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    entries: Vec<Entry>,
    first_index: u64,
}

impl Log {
    pub fn new() -> Self {
        Log {
            entries: vec![Entry::sentinel(0, 0)],
            first_index: 0,
        }
    }

    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    pub fn last(&self) -> &Entry {
        self.entries.last().expect("log always has a sentinel")
    }

    /// Defined only for `index >= first_index`; callers must check
    /// `first_index` before calling. Panics otherwise.
    pub fn at(&self, index: u64) -> &Entry {
        assert!(
            index >= self.first_index,
            "log access at {index} below first_index {}",
            self.first_index
        );
        let offset = (index - self.first_index) as usize;
        &self.entries[offset]
    }

    /// `None` if `index` isn't actually present (useful for the
    /// `prev_log_index` existence check in AppendEntries, which must not
    /// panic on an out-of-range index).
    pub fn get(&self, index: u64) -> Option<&Entry> {
        if index < self.first_index {
            return None;
        }
        let offset = (index - self.first_index) as usize;
        self.entries.get(offset)
    }

    /// Entries from `start` (inclusive) to the end of the log.
    pub fn slice_to_end(&self, start: u64) -> Vec<Entry> {
        let offset = (start.saturating_sub(self.first_index)) as usize;
        if offset >= self.entries.len() {
            Vec::new()
        } else {
            self.entries[offset..].to_vec()
        }
    }

    /// Entries up to (exclusive) `end`, i.e. a prefix truncation.
    pub fn slice_from_start(&self, end: u64) -> Vec<Entry> {
        let offset = (end.saturating_sub(self.first_index)) as usize;
        let offset = offset.min(self.entries.len());
        self.entries[..offset].to_vec()
    }

    pub fn append(&mut self, entries: impl IntoIterator<Item = Entry>) {
        self.entries.extend(entries);
    }

    pub fn truncate_from(&mut self, index: u64) {
        let offset = (index.saturating_sub(self.first_index)) as usize;
        self.entries.truncate(offset.min(self.entries.len()));
    }

    /// Highest index whose term equals `term`, scanning backward from the
    /// last entry. Terms are monotonic non-decreasing along the log, so the
    /// scan stops as soon as it sees a strictly smaller term.
    pub fn find_last_in_term(&self, term: u64) -> i64 {
        let last_index = self.last().index;
        let mut i = last_index;
        while i > self.first_index {
            let t = self.at(i).term;
            if t == term {
                return i as i64;
            }
            if t < term {
                break;
            }
            i -= 1;
        }
        -1
    }

    /// Earliest index at or below `before` whose term equals `term`, bounded
    /// at `first_index`. Used for the AppendEntries conflict-hint XIndex:
    /// unlike `find_last_in_term`, which scans from the end of the whole log
    /// and can land past `before`, this starts at `before` and only walks
    /// downward, so it never returns an index the leader would need to
    /// overwrite again.
    pub fn find_first_in_term_at_or_before(&self, before: u64, term: u64) -> u64 {
        let start = before.min(self.last().index);
        let mut earliest = start;
        let mut i = start;
        while i > self.first_index {
            if self.at(i - 1).term != term {
                break;
            }
            i -= 1;
            earliest = i;
        }
        earliest
    }

    /// Replaces the prefix `<= index` with a fresh sentinel `{index, term}`,
    /// retaining any suffix `> index` verbatim. If `index` exceeds the
    /// current last index, the entire log collapses to just the sentinel.
    pub fn compacted_to(&mut self, index: u64, term: u64) {
        let suffix: Vec<Entry> = if index < self.last().index {
            let start = (index + 1).saturating_sub(self.first_index) as usize;
            self.entries.get(start..).map(|s| s.to_vec()).unwrap_or_default()
        } else {
            Vec::new()
        };
        self.entries = Vec::with_capacity(suffix.len() + 1);
        self.entries.push(Entry::sentinel(index, term));
        self.entries.extend(suffix);
        self.first_index = index;
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvserver::op::OpKind;

    fn entry(index: u64, term: u64) -> Entry {
        Entry {
            index,
            term,
            command: Some(Op {
                kind: OpKind::Put,
                key: "k".into(),
                value: "v".into(),
                clerk_id: 1,
                op_id: index,
            }),
        }
    }

    #[test]
    fn sentinel_at_zero() {
        let log = Log::new();
        assert_eq!(log.last().index, 0);
        assert_eq!(log.first_index(), 0);
    }

    #[test]
    fn append_and_at() {
        let mut log = Log::new();
        log.append([entry(1, 1), entry(2, 1), entry(3, 2)]);
        assert_eq!(log.last().index, 3);
        assert_eq!(log.at(2).term, 1);
        assert_eq!(log.at(3).term, 2);
    }

    #[test]
    fn find_last_in_term_scans_backward() {
        let mut log = Log::new();
        log.append([entry(1, 1), entry(2, 1), entry(3, 2), entry(4, 2)]);
        assert_eq!(log.find_last_in_term(2), 4);
        assert_eq!(log.find_last_in_term(1), 2);
        assert_eq!(log.find_last_in_term(5), -1);
    }

    #[test]
    fn find_first_in_term_at_or_before_stops_at_the_term_boundary() {
        let mut log = Log::new();
        log.append([
            entry(1, 1),
            entry(2, 2),
            entry(3, 2),
            entry(4, 3),
            entry(5, 3),
            entry(6, 3),
            entry(7, 3),
            entry(8, 4),
        ]);
        assert_eq!(log.find_first_in_term_at_or_before(6, 3), 4);
        assert_eq!(log.find_first_in_term_at_or_before(7, 3), 4);
        assert_eq!(log.find_first_in_term_at_or_before(2, 2), 2);
    }

    #[test]
    fn compacted_to_keeps_suffix() {
        let mut log = Log::new();
        log.append([entry(1, 1), entry(2, 1), entry(3, 2), entry(4, 2)]);
        log.compacted_to(2, 1);
        assert_eq!(log.first_index(), 2);
        assert_eq!(log.at(2).command, None);
        assert_eq!(log.last().index, 4);
        assert_eq!(log.at(3).term, 2);
    }

    #[test]
    fn compacted_to_past_end_collapses_to_sentinel() {
        let mut log = Log::new();
        log.append([entry(1, 1), entry(2, 1)]);
        log.compacted_to(5, 3);
        assert_eq!(log.first_index(), 5);
        assert_eq!(log.last().index, 5);
    }

    #[test]
    fn truncate_from_drops_suffix() {
        let mut log = Log::new();
        log.append([entry(1, 1), entry(2, 1), entry(3, 2)]);
        log.truncate_from(2);
        assert_eq!(log.last().index, 1);
    }
}
