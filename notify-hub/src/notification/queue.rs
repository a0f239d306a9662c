//! Dispatch queue between producers and the dispatch worker.
//!
//! FIFO by default. [`QueueMode::Priority`] pops the highest priority first
//! and keeps FIFO order among equal priorities.
//!
//! Requests scheduled in the future wait in a separate set ordered by
//! `scheduled_at` and join the ready order once due, so a not-yet-due
//! request never blocks a ready one.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::request::NotificationRequest;
use crate::{Error, Result};

/// Ordering policy of the dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Submission order.
    #[default]
    Fifo,
    /// Request priority, then submission order.
    Priority,
}

impl std::str::FromStr for QueueMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "priority" => Ok(Self::Priority),
            other => Err(Error::config(format!("unknown queue mode: {other}"))),
        }
    }
}

#[derive(Debug)]
struct Prioritized {
    priority: u8,
    seq: u64,
    request: NotificationRequest,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    // Max-heap: higher priority wins, then the lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
enum Pending {
    Fifo(VecDeque<NotificationRequest>),
    Priority {
        heap: BinaryHeap<Prioritized>,
        next_seq: u64,
    },
}

impl Pending {
    fn len(&self) -> usize {
        match self {
            Self::Fifo(items) => items.len(),
            Self::Priority { heap, .. } => heap.len(),
        }
    }

    fn push(&mut self, request: NotificationRequest) {
        match self {
            Self::Fifo(items) => items.push_back(request),
            Self::Priority { heap, next_seq } => {
                let seq = *next_seq;
                *next_seq += 1;
                heap.push(Prioritized {
                    priority: request.priority(),
                    seq,
                    request,
                });
            }
        }
    }

    fn pop(&mut self) -> Option<NotificationRequest> {
        match self {
            Self::Fifo(items) => items.pop_front(),
            Self::Priority { heap, .. } => heap.pop().map(|p| p.request),
        }
    }
}

/// Request held back until its `scheduled_at`.
#[derive(Debug)]
struct Scheduled {
    due: DateTime<Utc>,
    seq: u64,
    request: NotificationRequest,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Stored as `Reverse`, so the earliest due time pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug)]
struct QueueState {
    ready: Pending,
    scheduled: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

impl QueueState {
    fn len(&self) -> usize {
        self.ready.len() + self.scheduled.len()
    }

    fn insert(&mut self, request: NotificationRequest, now: DateTime<Utc>) {
        match request.scheduled_at() {
            Some(due) if due > now => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.scheduled.push(Reverse(Scheduled { due, seq, request }));
            }
            _ => self.ready.push(request),
        }
    }

    /// Move every scheduled request that is due at `now` into the ready order.
    fn promote(&mut self, now: DateTime<Utc>) {
        while self
            .scheduled
            .peek()
            .is_some_and(|Reverse(next)| next.due <= now)
        {
            if let Some(Reverse(entry)) = self.scheduled.pop() {
                self.ready.push(entry.request);
            }
        }
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.scheduled.peek().map(|Reverse(next)| next.due)
    }
}

/// Queue of requests waiting for the dispatch worker.
#[derive(Debug)]
pub struct DispatchQueue {
    mode: QueueMode,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DispatchQueue {
    /// Create a queue holding at most `capacity` submitted requests.
    pub fn new(mode: QueueMode, capacity: usize) -> Self {
        let ready = match mode {
            QueueMode::Fifo => Pending::Fifo(VecDeque::new()),
            QueueMode::Priority => Pending::Priority {
                heap: BinaryHeap::new(),
                next_seq: 0,
            },
        };

        Self {
            mode,
            capacity,
            state: Mutex::new(QueueState {
                ready,
                scheduled: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queued requests, due or not.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests waiting for their scheduled time.
    pub fn scheduled_len(&self) -> usize {
        self.state.lock().scheduled.len()
    }

    /// Enqueue a newly submitted request.
    pub fn push(&self, request: NotificationRequest) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.len() >= self.capacity {
                return Err(Error::QueueFull {
                    capacity: self.capacity,
                });
            }
            state.insert(request, Utc::now());
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Put back a request the worker popped but could not dispatch yet.
    ///
    /// Bypasses the capacity check: the request was already accepted.
    pub fn requeue(&self, request: NotificationRequest) {
        self.state.lock().insert(request, Utc::now());
        self.notify.notify_one();
    }

    /// Pop the next ready request without waiting.
    pub fn try_pop(&self) -> Option<NotificationRequest> {
        self.try_pop_at(Utc::now())
    }

    fn try_pop_at(&self, now: DateTime<Utc>) -> Option<NotificationRequest> {
        let mut state = self.state.lock();
        state.promote(now);
        state.ready.pop()
    }

    /// Pop the next ready request, waiting at most `timeout` for one.
    ///
    /// Wakes on a push or when the earliest scheduled request comes due.
    pub async fn pop(&self, timeout: Duration) -> Option<NotificationRequest> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(request) = self.try_pop() {
                return Some(request);
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // A push may have landed between the first check and `enable`.
            if let Some(request) = self.try_pop() {
                return Some(request);
            }

            let next_due = self.state.lock().next_due();
            let wake = match next_due {
                Some(due) => {
                    let until_due = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    deadline.min(Instant::now() + until_due)
                }
                None => deadline,
            };

            if tokio::time::timeout_at(wake, notified).await.is_err() && wake >= deadline {
                return self.try_pop();
            }
        }
    }
}
