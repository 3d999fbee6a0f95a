use crate::sequence::Sequence;
use serde::{Deserialize, Serialize};

/// One proposed sequence together with the scores around its measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub sequence: Sequence,
    /// The model's prediction before the sequence was measured.
    pub model_score: f64,
    /// The model's answer after the measurement was folded in, i.e. the measured value.
    pub true_score: f64,
}

/// One round's measured sequences, in proposal order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn new(entries: Vec<BatchEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.entries.iter().map(|e| &e.sequence)
    }

    pub fn get(&self, sequence: &Sequence) -> Option<&BatchEntry> {
        self.entries.iter().find(|e| &e.sequence == sequence)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append-only arena of batches. The index of a batch is its round number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchHistory {
    batches: Vec<Batch>,
}

impl BatchHistory {
    pub fn new() -> Self {
        Self {
            batches: Vec::new(),
        }
    }

    /// Appends a batch and returns its index.
    pub fn push(&mut self, batch: Batch) -> usize {
        let id = self.batches.len();
        self.batches.push(batch);
        id
    }

    pub fn get(&self, id: usize) -> Option<&Batch> {
        self.batches.get(id)
    }

    /// Index of the newest batch, `None` before the first one.
    pub fn last_index(&self) -> Option<usize> {
        self.batches.len().checked_sub(1)
    }

    pub fn last(&self) -> Option<&Batch> {
        self.batches.last()
    }

    /// Newest batch that holds at least one sequence.
    pub fn last_non_empty(&self) -> Option<&Batch> {
        self.batches.iter().rev().find(|b| !b.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Batch)> {
        self.batches.iter().enumerate()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: &str, score: f64) -> BatchEntry {
        BatchEntry {
            sequence: Sequence::from(seq),
            model_score: score,
            true_score: score,
        }
    }

    #[test]
    fn history_indices_are_contiguous() {
        let mut history = BatchHistory::new();
        assert_eq!(history.last_index(), None);
        assert_eq!(history.push(Batch::new(vec![entry("UC", 0.0)])), 0);
        assert_eq!(history.last_index(), Some(0));
        assert_eq!(history.push(Batch::default()), 1);
        assert_eq!(history.last_index(), Some(1));
        assert_eq!(history.len(), 2);

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.last_index(), None);
    }

    #[test]
    fn last_non_empty_skips_empty_rounds() {
        let mut history = BatchHistory::new();
        history.push(Batch::new(vec![entry("GG", 2.0), entry("GA", 1.0)]));
        history.push(Batch::default());
        let batch = history.last_non_empty().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(&Sequence::from("GA")).unwrap().true_score, 1.0);
        assert!(history.last().unwrap().is_empty());
    }
}
