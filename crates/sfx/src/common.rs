//! 📦 Common data structures: the cargo that rides the handoff queue.
//!
//! 🎬 COLD OPEN. INT. FETCH THREAD. 3:47 AM.
//!
//! A reader returns from a long blocking call, clutching a fistful of records.
//! Some belong to split `range-0`. Some belong to `range-1`. One split just ran
//! dry and wants the world to know. All of it gets stuffed into a [`SplitBatch`],
//! pushed through the queue, and handed to a consumer who will read every record,
//! note every finished split, and then recycle the container like a responsible adult.
//!
//! 🦆

use std::collections::{BTreeSet, VecDeque};

/// 🎯 One record, as produced by the built-in readers.
///
/// `offset` is the record's position inside its split (generated integer for the
/// in-memory reader, line number for the file reader). `payload` is the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub payload: String,
}

impl Record {
    pub fn new(offset: u64, payload: impl Into<String>) -> Self {
        Self {
            offset,
            payload: payload.into(),
        }
    }
}

type Recycler = Box<dyn FnOnce() + Send>;

/// 📦 The result of one fetch call: records grouped by split, plus the splits that finished.
///
/// Groups keep the order they were added in. A batch with no groups and no finished
/// splits is a legal "nothing happened" signal. Consumers walk it with
/// [`SplitBatch::next_split`] / [`SplitBatch::next_record_from_split`] and then hand it back
/// via [`SplitBatch::recycle`] so any pooled buffers can go home.
pub struct SplitBatch<T> {
    groups: VecDeque<(String, VecDeque<T>)>,
    current: Option<(String, VecDeque<T>)>,
    finished: BTreeSet<String>,
    recycler: Option<Recycler>,
}

impl<T> std::fmt::Debug for SplitBatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 records are opaque cargo, we only print the shipping label
        f.debug_struct("SplitBatch")
            .field("split_ids", &self.split_ids())
            .field("record_count", &self.record_count())
            .field("finished", &self.finished)
            .field("has_recycler", &self.recycler.is_some())
            .finish()
    }
}

impl<T> Default for SplitBatch<T> {
    fn default() -> Self {
        Self {
            groups: VecDeque::new(),
            current: None,
            finished: BTreeSet::new(),
            recycler: None,
        }
    }
}

impl<T> SplitBatch<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 💤 The no-op batch. Nothing fetched, nothing finished, nothing to see here.
    pub fn empty() -> Self {
        Self::default()
    }

    /// 🏁 A batch that only announces finished splits.
    pub fn finished_only<I, S>(split_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut batch = Self::default();
        for split_id in split_ids {
            batch.finish_split(split_id);
        }
        batch
    }

    /// ➕ Appends one record. Consecutive records of the same split share a group.
    pub fn add_record(&mut self, split_id: &str, record: T) {
        match self.groups.back_mut() {
            Some((last_id, records)) if last_id == split_id => records.push_back(record),
            _ => self
                .groups
                .push_back((split_id.to_string(), VecDeque::from([record]))),
        }
    }

    pub fn add_records<I: IntoIterator<Item = T>>(&mut self, split_id: &str, records: I) {
        for record in records {
            self.add_record(split_id, record);
        }
    }

    /// 🏁 Marks a split as done. No more records will ever arrive for it.
    pub fn finish_split(&mut self, split_id: impl Into<String>) {
        self.finished.insert(split_id.into());
    }

    /// ♻️ Registers a callback that runs when the consumer recycles this batch.
    pub fn with_recycler<F>(mut self, recycler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.recycler = Some(Box::new(recycler));
        self
    }

    /// ➡️ Moves the cursor to the next split group and returns its id.
    ///
    /// Records left unread in the previous group are skipped.
    pub fn next_split(&mut self) -> Option<String> {
        self.current = self.groups.pop_front();
        self.current.as_ref().map(|(split_id, _)| split_id.clone())
    }

    /// 📄 Next record of the split the cursor is on, `None` when that group is exhausted.
    pub fn next_record_from_split(&mut self) -> Option<T> {
        self.current
            .as_mut()
            .and_then(|(_, records)| records.pop_front())
    }

    pub fn finished_splits(&self) -> &BTreeSet<String> {
        &self.finished
    }

    /// 🔢 Records not yet handed out by the cursor.
    pub fn record_count(&self) -> usize {
        let current = self.current.as_ref().map_or(0, |(_, r)| r.len());
        current + self.groups.iter().map(|(_, r)| r.len()).sum::<usize>()
    }

    /// 🏷️ Split ids that still have records waiting, in order.
    pub fn split_ids(&self) -> Vec<String> {
        self.current
            .iter()
            .chain(self.groups.iter())
            .map(|(split_id, _)| split_id.clone())
            .collect()
    }

    /// 🕳️ No records and no finished splits: the legal no-op.
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0 && self.finished.is_empty()
    }

    /// 🧹 Keeps only groups and finished markers whose split id passes `keep`.
    pub fn retain_splits<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.groups.retain(|(split_id, _)| keep(split_id));
        if let Some((split_id, _)) = &self.current {
            if !keep(split_id) {
                self.current = None;
            }
        }
        self.finished.retain(|split_id| keep(split_id));
    }

    /// 🔓 Takes the batch apart: unread groups in order, plus the finished set.
    ///
    /// The recycler (if any) runs here, since the container is gone afterwards.
    pub fn into_parts(mut self) -> (Vec<(String, Vec<T>)>, BTreeSet<String>) {
        let mut groups = Vec::with_capacity(self.groups.len() + 1);
        if let Some((split_id, records)) = self.current.take() {
            groups.push((split_id, Vec::from(records)));
        }
        groups.extend(
            self.groups
                .drain(..)
                .map(|(split_id, records)| (split_id, Vec::from(records))),
        );
        let finished = std::mem::take(&mut self.finished);
        if let Some(recycler) = self.recycler.take() {
            recycler();
        }
        (groups, finished)
    }

    /// ♻️ Done with it. Returns pooled buffers (if anyone registered a recycler) and drops the rest.
    pub fn recycle(mut self) {
        if let Some(recycler) = self.recycler.take() {
            recycler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn the_one_where_records_walk_out_in_split_order() {
        let mut batch = SplitBatch::new();
        batch.add_record("a", 1);
        batch.add_record("a", 2);
        batch.add_record("b", 3);
        batch.finish_split("a");

        assert_eq!(batch.record_count(), 3);
        assert_eq!(batch.split_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(batch.next_split().as_deref(), Some("a"));
        assert_eq!(batch.next_record_from_split(), Some(1));
        assert_eq!(batch.next_record_from_split(), Some(2));
        assert_eq!(batch.next_record_from_split(), None);
        assert_eq!(batch.next_split().as_deref(), Some("b"));
        assert_eq!(batch.next_record_from_split(), Some(3));
        assert_eq!(batch.next_split(), None);
        assert!(batch.finished_splits().contains("a"));
    }

    #[test]
    fn the_one_where_the_empty_batch_is_a_legal_shrug() {
        let batch: SplitBatch<u64> = SplitBatch::empty();
        assert!(batch.is_empty());
        let finished: SplitBatch<u64> = SplitBatch::finished_only(["x"]);
        assert!(!finished.is_empty());
        assert_eq!(finished.record_count(), 0);
    }

    #[test]
    fn the_one_where_recycling_returns_the_buffers_exactly_once() {
        let returned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&returned);
        let mut batch = SplitBatch::new().with_recycler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        batch.add_record("a", "doc");
        batch.recycle();
        assert_eq!(returned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn the_one_where_removed_splits_get_filtered_out() {
        let mut batch = SplitBatch::new();
        batch.add_records("keep", [1, 2]);
        batch.add_records("drop", [3]);
        batch.finish_split("drop");
        batch.retain_splits(|split_id| split_id == "keep");
        assert_eq!(batch.split_ids(), vec!["keep".to_string()]);
        assert!(batch.finished_splits().is_empty());

        let (groups, finished) = batch.into_parts();
        assert_eq!(groups, vec![("keep".to_string(), vec![1, 2])]);
        assert!(finished.is_empty());
    }
}
