//! Deduplicating URL queue. Every URL lives in at most one of three
//! disjoint sets (queued, in-progress, processed) which is what breaks
//! cycles in the link graph. Batches come out priority-ordered with a
//! per-host cap so one domain cannot monopolise a batch.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::Serialize;

use crate::models::UrlTask;

/// Priority given to tasks re-enqueued after a retryable failure
const RETRY_PRIORITY: u32 = 100;

/// Signals observable by subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    UrlAdded { url: String, depth: u32 },
    UrlComplete { url: String },
    UrlFailed { url: String, requeued: bool },
    Overflow { url: String },
    DiscoveryComplete,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub in_progress: usize,
    pub processed: usize,
    pub duplicates: u64,
    pub dropped: u64,
}

struct QueueInner {
    queued: HashMap<String, (UrlTask, u64)>,
    in_progress: HashMap<String, UrlTask>,
    processed: HashSet<String>,
    discovery_complete: bool,
    duplicates: u64,
    dropped: u64,
    seq: u64,
}

pub struct UrlQueue {
    inner: Mutex<QueueInner>,
    subscribers: Mutex<Vec<flume::Sender<QueueEvent>>>,
    max_size: usize,
    batch_size: usize,
    domain_batch_size: usize,
}

impl UrlQueue {
    pub fn new(max_size: usize, batch_size: usize, domain_batch_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queued: HashMap::new(),
                in_progress: HashMap::new(),
                processed: HashSet::new(),
                discovery_complete: false,
                duplicates: 0,
                dropped: 0,
                seq: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
            max_size,
            batch_size: batch_size.max(1),
            domain_batch_size: domain_batch_size.max(1),
        }
    }

    /// Register an event listener. Events fire for adds, completions,
    /// failures, overflow drops, and the discovery-complete signal.
    pub fn subscribe(&self) -> flume::Receiver<QueueEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: QueueEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Enqueue a URL. Duplicates (in any of the three sets) are rejected;
    /// a full queue drops the URL and emits an overflow signal.
    pub fn add(&self, url: &str, depth: u32, parent_url: Option<String>) -> bool {
        self.add_with_priority(url, depth, parent_url, depth)
    }

    pub fn add_with_priority(
        &self,
        url: &str,
        depth: u32,
        parent_url: Option<String>,
        priority: u32,
    ) -> bool {
        let event = {
            let mut inner = self.inner.lock();

            if inner.queued.contains_key(url)
                || inner.in_progress.contains_key(url)
                || inner.processed.contains(url)
            {
                inner.duplicates += 1;
                return false;
            }

            if inner.queued.len() >= self.max_size {
                inner.dropped += 1;
                QueueEvent::Overflow {
                    url: url.to_string(),
                }
            } else {
                let task = UrlTask::new(url.to_string(), depth, parent_url, priority);
                inner.seq += 1;
                let seq = inner.seq;
                inner.queued.insert(url.to_string(), (task, seq));
                QueueEvent::UrlAdded {
                    url: url.to_string(),
                    depth,
                }
            }
        };

        let added = matches!(event, QueueEvent::UrlAdded { .. });
        self.emit(event);
        added
    }

    /// Pull the next batch: priority ascending (FIFO within a priority),
    /// at most `domain_batch_size` per host. Selected tasks move to
    /// in-progress.
    pub fn get_batch(&self) -> Vec<UrlTask> {
        let mut inner = self.inner.lock();

        let mut candidates: Vec<(u32, u64, String)> = inner
            .queued
            .values()
            .map(|(task, seq)| (task.priority, *seq, task.url.clone()))
            .collect();
        candidates.sort();

        let mut per_host: HashMap<String, usize> = HashMap::new();
        let mut batch = Vec::new();

        for (_, _, url) in candidates {
            if batch.len() >= self.batch_size {
                break;
            }
            let host = inner
                .queued
                .get(&url)
                .map(|(task, _)| task.host.clone())
                .unwrap_or_default();
            let count = per_host.entry(host).or_insert(0);
            if *count >= self.domain_batch_size {
                continue;
            }
            *count += 1;

            if let Some((task, _)) = inner.queued.remove(&url) {
                inner.in_progress.insert(url, task.clone());
                batch.push(task);
            }
        }

        batch
    }

    /// Mark a dispatched URL done. Moves in-progress to processed.
    pub fn complete(&self, url: &str) {
        let moved = {
            let mut inner = self.inner.lock();
            inner.in_progress.remove(url).map(|_| {
                inner.processed.insert(url.to_string());
            })
        };
        if moved.is_some() {
            self.emit(QueueEvent::UrlComplete {
                url: url.to_string(),
            });
        }
    }

    /// Mark a dispatched URL failed. With `retry` the task re-enters the
    /// queue at a deprioritised position; otherwise the failure is
    /// terminal and the URL counts as processed.
    pub fn fail(&self, url: &str, retry: bool) {
        let requeued = {
            let mut inner = self.inner.lock();
            match inner.in_progress.remove(url) {
                Some(task) => {
                    if retry {
                        let mut task = task;
                        task.priority = RETRY_PRIORITY;
                        inner.seq += 1;
                        let seq = inner.seq;
                        inner.queued.insert(url.to_string(), (task, seq));
                        true
                    } else {
                        inner.processed.insert(url.to_string());
                        false
                    }
                }
                None => return,
            }
        };
        self.emit(QueueEvent::UrlFailed {
            url: url.to_string(),
            requeued,
        });
    }

    /// Signal that no producer will add further URLs
    pub fn mark_discovery_complete(&self) {
        self.inner.lock().discovery_complete = true;
        self.emit(QueueEvent::DiscoveryComplete);
    }

    /// True once discovery is complete and no work is queued or in flight
    pub fn is_finished(&self) -> bool {
        let inner = self.inner.lock();
        inner.discovery_complete && inner.queued.is_empty() && inner.in_progress.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.queued.is_empty() && inner.in_progress.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            queued: inner.queued.len(),
            in_progress: inner.in_progress.len(),
            processed: inner.processed.len(),
            duplicates: inner.duplicates,
            dropped: inner.dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> UrlQueue {
        UrlQueue::new(100, 10, 3)
    }

    #[test]
    fn test_add_and_duplicate_rejection() {
        let q = queue();
        assert!(q.add("https://ex.com/a", 0, None));
        assert!(!q.add("https://ex.com/a", 1, None));
        assert_eq!(q.stats().duplicates, 1);
        assert_eq!(q.stats().queued, 1);
    }

    #[test]
    fn test_duplicates_rejected_across_all_sets() {
        let q = queue();
        q.add("https://ex.com/a", 0, None);
        let batch = q.get_batch();
        assert_eq!(batch.len(), 1);
        // Now in-progress
        assert!(!q.add("https://ex.com/a", 0, None));
        q.complete("https://ex.com/a");
        // Now processed
        assert!(!q.add("https://ex.com/a", 0, None));
        assert_eq!(q.stats().duplicates, 2);
    }

    #[test]
    fn test_batch_priority_order() {
        let q = queue();
        q.add("https://ex.com/deep", 3, None);
        q.add("https://ex.com/shallow", 0, None);
        q.add("https://ex.com/mid", 1, None);

        let batch = q.get_batch();
        let urls: Vec<&str> = batch.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://ex.com/shallow",
                "https://ex.com/mid",
                "https://ex.com/deep"
            ]
        );
        assert_eq!(q.stats().in_progress, 3);
    }

    #[test]
    fn test_batch_respects_domain_cap() {
        let q = UrlQueue::new(100, 10, 2);
        for i in 0..5 {
            q.add(&format!("https://a.com/{}", i), 0, None);
        }
        q.add("https://b.com/x", 0, None);

        let batch = q.get_batch();
        let a_count = batch.iter().filter(|t| t.host == "a.com").count();
        assert_eq!(a_count, 2);
        assert!(batch.iter().any(|t| t.host == "b.com"));
    }

    #[test]
    fn test_overflow_emits_and_drops() {
        let q = UrlQueue::new(2, 10, 10);
        let events = q.subscribe();
        assert!(q.add("https://ex.com/1", 0, None));
        assert!(q.add("https://ex.com/2", 0, None));
        assert!(!q.add("https://ex.com/3", 0, None));
        assert_eq!(q.stats().dropped, 1);

        let collected: Vec<QueueEvent> = events.drain().collect();
        assert!(collected
            .iter()
            .any(|e| matches!(e, QueueEvent::Overflow { url } if url == "https://ex.com/3")));
    }

    #[test]
    fn test_fail_with_retry_deprioritises() {
        let q = queue();
        q.add("https://ex.com/a", 0, None);
        q.get_batch();
        q.fail("https://ex.com/a", true);

        q.add("https://ex.com/b", 2, None);
        let batch = q.get_batch();
        // The fresh depth-2 task outranks the priority-100 retry
        assert_eq!(batch[0].url, "https://ex.com/b");
        assert_eq!(batch[1].url, "https://ex.com/a");
        assert_eq!(batch[1].priority, 100);
    }

    #[test]
    fn test_fail_terminal_moves_to_processed() {
        let q = queue();
        q.add("https://ex.com/a", 0, None);
        q.get_batch();
        q.fail("https://ex.com/a", false);
        let stats = q.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.in_progress, 0);
        assert!(!q.add("https://ex.com/a", 0, None));
    }

    #[test]
    fn test_is_finished_requires_signal_and_empty_sets() {
        let q = queue();
        q.add("https://ex.com/a", 0, None);
        assert!(!q.is_finished());

        q.mark_discovery_complete();
        assert!(!q.is_finished());

        q.get_batch();
        assert!(!q.is_finished());

        q.complete("https://ex.com/a");
        assert!(q.is_finished());
    }

    #[test]
    fn test_event_stream() {
        let q = queue();
        let events = q.subscribe();

        q.add("https://ex.com/a", 0, None);
        q.get_batch();
        q.complete("https://ex.com/a");
        q.mark_discovery_complete();

        let collected: Vec<QueueEvent> = events.drain().collect();
        assert_eq!(
            collected,
            vec![
                QueueEvent::UrlAdded {
                    url: "https://ex.com/a".to_string(),
                    depth: 0
                },
                QueueEvent::UrlComplete {
                    url: "https://ex.com/a".to_string()
                },
                QueueEvent::DiscoveryComplete,
            ]
        );
    }

    #[test]
    fn test_fifo_within_priority() {
        let q = queue();
        q.add("https://ex.com/first", 1, None);
        q.add("https://ex.com/second", 1, None);
        let batch = q.get_batch();
        assert_eq!(batch[0].url, "https://ex.com/first");
        assert_eq!(batch[1].url, "https://ex.com/second");
    }
}
