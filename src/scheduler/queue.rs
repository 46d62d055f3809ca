//! In-memory arena of admitted jobs.
//!
//! Entries are indexed by job id with the name as a secondary index. The
//! queue is bounded: waiting and running entries both count against the
//! capacity.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::models::JobItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Waiting,
    Running { since: DateTime<Utc> },
}

#[derive(Debug)]
struct Entry {
    item: JobItem,
    state: EntryState,
}

#[derive(Debug)]
pub(crate) struct JobQueue {
    capacity: usize,
    entries: HashMap<i64, Entry>,
    names: HashMap<String, i64>,
    /// Admission order of waiting entries.
    waiting: VecDeque<i64>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            names: HashMap::new(),
            waiting: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Free slots left for admission.
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<i64> {
        self.names.get(name).copied()
    }

    pub fn running(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.state, EntryState::Running { .. }))
            .count()
    }

    /// Start times of every running entry.
    pub fn running_since(&self) -> Vec<DateTime<Utc>> {
        self.entries
            .values()
            .filter_map(|e| match e.state {
                EntryState::Running { since } => Some(since),
                EntryState::Waiting => None,
            })
            .collect()
    }

    /// Admit a job. Returns false when it is already queued or the queue is full.
    pub fn admit(&mut self, item: JobItem) -> bool {
        if self.contains(item.id) || self.is_full() {
            return false;
        }
        let id = item.id;
        self.names.insert(item.name.clone(), id);
        self.entries.insert(
            id,
            Entry {
                item,
                state: EntryState::Waiting,
            },
        );
        self.waiting.push_back(id);
        true
    }

    /// Move the oldest waiting entry to running and return a copy of it.
    pub fn start_next(&mut self, now: DateTime<Utc>) -> Option<JobItem> {
        while let Some(id) = self.waiting.pop_front() {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.state = EntryState::Running { since: now };
                entry.item.mark_running(now);
                return Some(entry.item.clone());
            }
        }
        None
    }

    /// Drop a finished entry.
    pub fn finish(&mut self, id: i64) -> Option<JobItem> {
        let entry = self.entries.remove(&id)?;
        self.waiting.retain(|w| *w != id);
        if self.names.get(&entry.item.name) == Some(&id) {
            self.names.remove(&entry.item.name);
        }
        Some(entry.item)
    }

    /// Drop an entry that has not started yet.
    pub fn remove_waiting(&mut self, id: i64) -> bool {
        let waiting = matches!(
            self.entries.get(&id).map(|e| e.state),
            Some(EntryState::Waiting)
        );
        if waiting {
            self.finish(id);
        }
        waiting
    }

    /// Discard every waiting entry. Running entries are left alone.
    pub fn clear_waiting(&mut self) -> usize {
        let ids: Vec<i64> = self.waiting.drain(..).collect();
        for id in &ids {
            if let Some(entry) = self.entries.remove(id) {
                self.names.remove(&entry.item.name);
            }
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobState, JobType};

    fn item(id: i64) -> JobItem {
        JobItem {
            id,
            name: format!("job-{}", id),
            job_type: JobType::Toc,
            arguments: None,
            state: JobState::Waiting,
            interval: 0,
            next_run: None,
            last_run: None,
            running_since: None,
            delete_after_run: true,
            run_after: None,
        }
    }

    #[test]
    fn test_admission_is_bounded_and_unique() {
        let mut queue = JobQueue::new(2);
        assert!(queue.admit(item(1)));
        assert!(!queue.admit(item(1)));
        assert!(queue.admit(item(2)));
        assert!(queue.is_full());
        assert!(!queue.admit(item(3)));
        assert_eq!(queue.id_of("job-2"), Some(2));
    }

    #[test]
    fn test_start_in_admission_order() {
        let mut queue = JobQueue::new(4);
        queue.admit(item(7));
        queue.admit(item(3));
        let now = Utc::now();

        let first = queue.start_next(now).unwrap();
        assert_eq!(first.id, 7);
        assert_eq!(first.state, JobState::Running);
        assert_eq!(queue.running(), 1);
        assert_eq!(queue.running_since(), vec![now]);

        assert_eq!(queue.start_next(now).map(|i| i.id), Some(3));
        assert!(queue.start_next(now).is_none());

        queue.finish(7);
        assert_eq!(queue.len(), 1);
        assert!(queue.id_of("job-7").is_none());
    }

    #[test]
    fn test_clear_waiting_keeps_running() {
        let mut queue = JobQueue::new(4);
        queue.admit(item(1));
        queue.admit(item(2));
        queue.admit(item(3));
        queue.start_next(Utc::now());

        assert!(!queue.remove_waiting(1));
        assert!(queue.remove_waiting(2));
        assert_eq!(queue.clear_waiting(), 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(1));
        assert_eq!(queue.free(), 3);
        assert!(queue.id_of("job-3").is_none());
    }
}
