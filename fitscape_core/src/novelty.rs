use crate::sequence::Sequence;
use std::collections::HashSet;

/// Tracks which sequences have already been seen (measured or proposed) by digest and
/// decides whether a new candidate is worth keeping.
#[derive(Default, Debug, Clone)]
pub struct NoveltyFilter {
    known_hashes: HashSet<[u8; 16]>,
}

impl NoveltyFilter {
    pub fn new() -> Self {
        Self {
            known_hashes: HashSet::new(),
        }
    }

    /// Starts from a set of sequences that must never be proposed again.
    pub fn seeded<'a>(known: impl IntoIterator<Item = &'a Sequence>) -> Self {
        let mut filter = Self::new();
        for seq in known {
            filter.add_known(seq);
        }
        filter
    }

    pub fn add_known(&mut self, sequence: &Sequence) {
        self.known_hashes.insert(sequence.digest());
    }

    pub fn is_interesting(&self, sequence: &Sequence) -> bool {
        !self.known_hashes.contains(&sequence.digest())
    }

    /// Marks `sequence` as seen and reports whether it was new.
    pub fn report_interesting(&mut self, sequence: &Sequence) -> bool {
        self.known_hashes.insert(sequence.digest())
    }

    pub fn len(&self) -> usize {
        self.known_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known_hashes.is_empty()
    }
}
