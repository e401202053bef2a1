//! Three-lane priority work queue.
//!
//! FIFO within a lane, strict priority across lanes. Dequeue waits on a
//! [`Notify`] with a deadline instead of polling.

use std::collections::VecDeque;
use std::time::Duration;

use riskflow_state::{JobId, Lane};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::error::{QueueError, QueueResult};

/// A job handed to an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub lane: Lane,
}

#[derive(Debug, Default)]
struct Lanes {
    lanes: [VecDeque<JobId>; 3],
    closed: bool,
}

impl Lanes {
    fn pop(&mut self) -> Option<QueueEntry> {
        Lane::ALL.into_iter().find_map(|lane| {
            self.lanes[lane.index()]
                .pop_front()
                .map(|job_id| QueueEntry { job_id, lane })
        })
    }

    /// 1-based place in global dequeue order.
    fn position(&self, job_id: &JobId) -> Option<usize> {
        let mut ahead = 0;
        for lane in &self.lanes {
            if let Some(idx) = lane.iter().position(|id| id == job_id) {
                return Some(ahead + idx + 1);
            }
            ahead += lane.len();
        }
        None
    }
}

/// Priority queue of job ids.
#[derive(Debug)]
pub struct PriorityQueue {
    inner: Mutex<Lanes>,
    notify: Notify,
    capacity: Option<usize>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl PriorityQueue {
    /// `capacity` bounds each lane; `None` is unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Lanes::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Append to the tail of `lane`. Returns the job's queue position.
    pub async fn enqueue(&self, lane: Lane, job_id: JobId) -> QueueResult<usize> {
        let positions = self.enqueue_all(lane, &[job_id]).await?;
        Ok(positions.first().copied().unwrap_or_default())
    }

    /// Append several jobs to `lane`, all or none.
    pub async fn enqueue_all(&self, lane: Lane, job_ids: &[JobId]) -> QueueResult<Vec<usize>> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(QueueError::Closed);
        }
        let queue = &inner.lanes[lane.index()];
        if let Some(capacity) = self.capacity {
            if queue.len() + job_ids.len() > capacity {
                return Err(QueueError::Full { lane, capacity });
            }
        }

        let ahead: usize = inner.lanes[..=lane.index()].iter().map(VecDeque::len).sum();
        inner.lanes[lane.index()].extend(job_ids.iter().copied());
        drop(inner);

        for _ in job_ids {
            self.notify.notify_one();
        }
        Ok((1..=job_ids.len()).map(|i| ahead + i).collect())
    }

    /// Pop the head of the highest-priority non-empty lane without waiting.
    pub async fn try_dequeue(&self) -> Option<QueueEntry> {
        self.inner.lock().await.pop()
    }

    /// Pop the next job, waiting up to `wait` for one to arrive.
    ///
    /// Returns `Ok(None)` on timeout and `Err(Closed)` once the queue is closed
    /// and drained. A `wait` past the clock's range waits without a deadline.
    pub async fn dequeue(&self, wait: Duration) -> QueueResult<Option<QueueEntry>> {
        let deadline = Instant::now().checked_add(wait);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.pop() {
                    return Ok(Some(entry));
                }
                if inner.closed {
                    return Err(QueueError::Closed);
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Remove a job that has not been dequeued yet.
    pub async fn remove(&self, job_id: &JobId) -> bool {
        let mut inner = self.inner.lock().await;
        for lane in inner.lanes.iter_mut() {
            if let Some(idx) = lane.iter().position(|id| id == job_id) {
                lane.remove(idx);
                return true;
            }
        }
        false
    }

    pub async fn position(&self, job_id: &JobId) -> Option<usize> {
        self.inner.lock().await.position(job_id)
    }

    /// Jobs waiting per lane, highest priority first.
    pub async fn depths(&self) -> [usize; 3] {
        let inner = self.inner.lock().await;
        Lane::ALL.map(|lane| inner.lanes[lane.index()].len())
    }

    pub async fn len(&self) -> usize {
        self.depths().await.iter().sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Refuse new work and wake every waiting executor.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
