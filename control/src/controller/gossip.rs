//! Per-link version logs reconciled by anti-entropy.
//!
//! Each controller records every link event it learns (`version -> state`) in a [GossipLog].
//! Periodically it advertises, per link, the highest version it knows (`max`) and the
//! uncommitted ranges below it (gaps). A peer answers with every committed entry the
//! requester lacks, and the requester merges the answer without ever overwriting what it
//! already committed. Merging is idempotent and commutative, so responses can be lost,
//! duplicated, or reordered.

use crate::{link::State, Version};
use std::collections::BTreeMap;
use tracing::debug;

/// Initial number of version slots per link.
pub const INITIAL_SIZE: usize = 16;

/// Below this size storage doubles on growth; above it storage grows to the needed
/// version plus [GROW].
pub const HWM: usize = 1024;

/// Slack added when growing beyond [HWM].
pub const GROW: usize = 64;

/// Uncommitted `[start, end)` version ranges, by link.
pub type Gaps = BTreeMap<String, Vec<(Version, Version)>>;

/// A committed `(link, version, state)` tuple sent in a gossip response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub link: String,
    pub version: Version,
    pub state: State,
}

/// Version-indexed history of a single link.
#[derive(Clone, Debug)]
struct History {
    states: Vec<State>,
    committed: Vec<bool>,
    /// Highest committed version.
    max: Version,
    /// Every version below this is committed.
    marked: Version,
}

impl History {
    fn new() -> Self {
        let mut history = Self {
            states: vec![State::Down; INITIAL_SIZE],
            committed: vec![false; INITIAL_SIZE],
            max: 0,
            marked: 1,
        };
        history.committed[0] = true;
        history
    }

    fn is_committed(&self, version: Version) -> bool {
        index(version)
            .and_then(|index| self.committed.get(index))
            .copied()
            .unwrap_or(false)
    }

    fn state(&self, version: Version) -> Option<State> {
        if !self.is_committed(version) {
            return None;
        }
        index(version).and_then(|index| self.states.get(index)).copied()
    }

    /// Ensure `version` has a slot, returning its index.
    fn reserve(&mut self, version: Version) -> Option<usize> {
        let index = index(version)?;
        let mut size = self.committed.len();
        while index >= size {
            size = if size < HWM {
                size * 2
            } else {
                index.checked_add(GROW)?
            };
        }
        if size != self.committed.len() {
            debug!(from = self.committed.len(), to = size, "growing log");
            self.states.resize(size, State::Down);
            self.committed.resize(size, false);
        }
        Some(index)
    }

    fn write(&mut self, version: Version, state: State) {
        let Some(index) = self.reserve(version) else {
            return;
        };
        self.states[index] = state;
        self.committed[index] = true;
        self.max = self.max.max(version);
    }

    /// Advance `marked` past the committed prefix and collect gaps below `max`.
    fn gaps(&mut self) -> Vec<(Version, Version)> {
        let mut cursor = self.marked;
        while cursor <= self.max && self.is_committed(cursor) {
            cursor += 1;
        }
        self.marked = cursor;

        let mut gaps = Vec::new();
        while cursor < self.max {
            let start = cursor;
            while cursor < self.max && !self.is_committed(cursor) {
                cursor += 1;
            }
            gaps.push((start, cursor));
            while cursor < self.max && self.is_committed(cursor) {
                cursor += 1;
            }
        }
        gaps
    }
}

fn index(version: Version) -> Option<usize> {
    usize::try_from(version).ok()
}

/// Anti-entropy log of link events, keyed by link name.
#[derive(Clone, Debug, Default)]
pub struct GossipLog {
    links: BTreeMap<String, History>,
}

impl GossipLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `link`, with version 0 committed as down.
    ///
    /// Opening a link that is already tracked has no effect.
    pub fn open(&mut self, link: &str) {
        if !self.links.contains_key(link) {
            self.links.insert(link.to_string(), History::new());
        }
    }

    /// Returns `true` if `link` is tracked.
    pub fn contains(&self, link: &str) -> bool {
        self.links.contains_key(link)
    }

    /// Record a locally learned event, committing `version` (opening `link` if needed).
    pub fn record(&mut self, link: &str, version: Version, state: State) {
        self.open(link);
        if let Some(history) = self.links.get_mut(link) {
            history.write(version, state);
        }
    }

    /// Highest committed version of `link`.
    pub fn max(&self, link: &str) -> Option<Version> {
        self.links.get(link).map(|history| history.max)
    }

    /// Lowest version of `link` not known to be part of a committed prefix.
    pub fn marked(&self, link: &str) -> Option<Version> {
        self.links.get(link).map(|history| history.marked)
    }

    pub fn is_committed(&self, link: &str, version: Version) -> bool {
        self.links
            .get(link)
            .is_some_and(|history| history.is_committed(version))
    }

    /// State committed for `version` of `link`, if any.
    pub fn state(&self, link: &str, version: Version) -> Option<State> {
        self.links.get(link).and_then(|history| history.state(version))
    }

    /// Build an anti-entropy request: the highest version and the gaps of every link.
    pub fn compute_gaps(&mut self) -> (BTreeMap<String, Version>, Gaps) {
        let mut max = BTreeMap::new();
        let mut gaps = Gaps::new();
        for (link, history) in self.links.iter_mut() {
            max.insert(link.clone(), history.max);
            gaps.insert(link.clone(), history.gaps());
        }
        (max, gaps)
    }

    /// Answer a request with every committed entry the requester lacks.
    ///
    /// That is, entries above the requester's `max` for a link and entries inside the
    /// requester's gaps. Links this log does not track are skipped.
    pub fn compute_response(&self, max: &BTreeMap<String, Version>, gaps: &Gaps) -> Vec<Entry> {
        let mut entries = Vec::new();
        for (link, &theirs) in max {
            let Some(history) = self.links.get(link) else {
                continue;
            };
            let mut push = |version: Version| {
                if let Some(state) = history.state(version) {
                    entries.push(Entry {
                        link: link.clone(),
                        version,
                        state,
                    });
                }
            };

            // Newer than anything the requester knows
            if theirs < history.max {
                for version in theirs + 1..=history.max {
                    push(version);
                }
            }

            // Holes the requester reported
            for &(start, end) in gaps.get(link).into_iter().flatten() {
                let end = end.min(history.max.saturating_add(1));
                for version in start..end {
                    push(version);
                }
            }
        }
        entries
    }

    /// Merge a response, committing only versions not already committed.
    ///
    /// Returns the number of newly committed entries.
    pub fn merge(&mut self, entries: &[Entry]) -> usize {
        let mut merged = 0;
        for entry in entries {
            let Some(history) = self.links.get_mut(&entry.link) else {
                debug!(link = %entry.link, "skipping untracked link");
                continue;
            };
            if history.is_committed(entry.version) {
                continue;
            }
            history.write(entry.version, entry.state);
            merged += 1;
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str = "s1-s2";

    /// Log with versions 0 through 5 committed except 3.
    fn holey() -> GossipLog {
        let mut log = GossipLog::new();
        log.open(LINK);
        log.record(LINK, 1, State::Up);
        log.record(LINK, 2, State::Down);
        log.record(LINK, 4, State::Down);
        log.record(LINK, 5, State::Up);
        log
    }

    #[test]
    fn test_open() {
        let mut log = GossipLog::new();
        log.open(LINK);
        assert_eq!(log.max(LINK), Some(0));
        assert_eq!(log.marked(LINK), Some(1));
        assert_eq!(log.state(LINK, 0), Some(State::Down));
        assert!(!log.is_committed(LINK, 1));

        // Re-opening keeps history
        log.record(LINK, 1, State::Up);
        log.open(LINK);
        assert_eq!(log.state(LINK, 1), Some(State::Up));
    }

    #[test]
    fn test_gap_closed_by_peer() {
        let mut log = holey();
        let (max, gaps) = log.compute_gaps();
        assert_eq!(max[LINK], 5);
        assert_eq!(gaps[LINK], vec![(3, 4)]);
        assert_eq!(log.marked(LINK), Some(3));

        // Peer holding version 3 answers
        let mut peer = GossipLog::new();
        for version in 1..=5 {
            peer.record(LINK, version, State::Up);
        }
        let response = peer.compute_response(&max, &gaps);
        assert_eq!(
            response,
            vec![Entry {
                link: LINK.into(),
                version: 3,
                state: State::Up
            }]
        );

        assert_eq!(log.merge(&response), 1);
        let (_, gaps) = log.compute_gaps();
        assert!(gaps[LINK].is_empty());
        assert_eq!(log.marked(LINK), Some(6));
    }

    #[test]
    fn test_multiple_gaps() {
        let mut log = GossipLog::new();
        log.record(LINK, 2, State::Up);
        log.record(LINK, 5, State::Down);
        log.record(LINK, 9, State::Up);
        let (_, gaps) = log.compute_gaps();
        assert_eq!(gaps[LINK], vec![(1, 2), (3, 5), (6, 9)]);
        assert_eq!(log.marked(LINK), Some(1));
    }

    #[test]
    fn test_response_includes_newer_entries() {
        let log = holey();
        let mut max = BTreeMap::new();
        max.insert(LINK.to_string(), 2);
        max.insert("unknown".to_string(), 7);
        let response = log.compute_response(&max, &Gaps::new());
        let versions: Vec<_> = response.iter().map(|entry| entry.version).collect();
        assert_eq!(versions, vec![4, 5]);
    }

    #[test]
    fn test_response_clips_gaps_to_max() {
        let log = holey();
        let mut max = BTreeMap::new();
        max.insert(LINK.to_string(), 100);
        let mut gaps = Gaps::new();
        gaps.insert(LINK.to_string(), vec![(0, 3), (4, 100)]);
        let response = log.compute_response(&max, &gaps);
        let versions: Vec<_> = response.iter().map(|entry| entry.version).collect();
        assert_eq!(versions, vec![0, 1, 2, 4, 5]);
    }

    #[test]
    fn test_merge_never_overwrites() {
        let mut log = holey();
        let conflicting = vec![
            Entry {
                link: LINK.into(),
                version: 1,
                state: State::Down,
            },
            Entry {
                link: "unknown".into(),
                version: 1,
                state: State::Up,
            },
        ];
        assert_eq!(log.merge(&conflicting), 0);
        assert_eq!(log.state(LINK, 1), Some(State::Up));
        assert!(!log.contains("unknown"));
    }

    #[test]
    fn test_merge_idempotent_and_commutative() {
        let first = vec![
            Entry {
                link: LINK.into(),
                version: 3,
                state: State::Up,
            },
            Entry {
                link: LINK.into(),
                version: 7,
                state: State::Down,
            },
        ];
        let second = vec![
            Entry {
                link: LINK.into(),
                version: 7,
                state: State::Down,
            },
            Entry {
                link: LINK.into(),
                version: 8,
                state: State::Up,
            },
        ];

        let mut forward = holey();
        forward.merge(&first);
        forward.merge(&second);
        forward.merge(&first);

        let mut backward = holey();
        backward.merge(&second);
        backward.merge(&first);

        for version in 0..10 {
            assert_eq!(
                forward.state(LINK, version),
                backward.state(LINK, version),
                "version {version}"
            );
        }
        assert_eq!(forward.max(LINK), Some(8));
        assert_eq!(backward.max(LINK), Some(8));
    }

    #[test]
    fn test_growth() {
        let mut log = GossipLog::new();
        log.record(LINK, 40, State::Up);
        assert_eq!(log.state(LINK, 40), Some(State::Up));

        // Beyond the high-water mark storage grows to the version plus slack
        log.record(LINK, 5_000, State::Down);
        assert_eq!(log.max(LINK), Some(5_000));
        assert_eq!(log.state(LINK, 5_000), Some(State::Down));
        assert_eq!(log.state(LINK, 4_999), None);
    }
}
