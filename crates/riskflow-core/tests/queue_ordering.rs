//! Priority queue ordering and blocking behaviour.

use std::sync::Arc;
use std::time::Duration;

use riskflow_core::{PriorityQueue, QueueError};
use riskflow_state::{JobId, Lane};

#[tokio::test]
async fn fifo_within_a_lane() {
    let queue = PriorityQueue::unbounded();
    let ids: Vec<JobId> = (0..5).map(|_| JobId::new()).collect();
    for id in &ids {
        queue.enqueue(Lane::Medium, *id).await.unwrap();
    }
    for id in &ids {
        assert_eq!(queue.try_dequeue().await.unwrap().job_id, *id);
    }
    assert!(queue.try_dequeue().await.is_none());
}

#[tokio::test]
async fn later_high_job_overtakes_earlier_lower_jobs() {
    let queue = PriorityQueue::unbounded();
    let low = JobId::new();
    let medium = JobId::new();
    let high = JobId::new();
    queue.enqueue(Lane::Low, low).await.unwrap();
    queue.enqueue(Lane::Medium, medium).await.unwrap();
    queue.enqueue(Lane::High, high).await.unwrap();

    let order: Vec<(JobId, Lane)> = [
        queue.try_dequeue().await.unwrap(),
        queue.try_dequeue().await.unwrap(),
        queue.try_dequeue().await.unwrap(),
    ]
    .iter()
    .map(|e| (e.job_id, e.lane))
    .collect();
    assert_eq!(
        order,
        vec![(high, Lane::High), (medium, Lane::Medium), (low, Lane::Low)]
    );
}

#[tokio::test(start_paused = true)]
async fn dequeue_times_out_when_empty() {
    let queue = PriorityQueue::unbounded();
    let started = tokio::time::Instant::now();
    let got = queue.dequeue(Duration::from_secs(2)).await.unwrap();
    assert!(got.is_none());
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn waiting_dequeue_wakes_on_enqueue() {
    let queue = Arc::new(PriorityQueue::unbounded());
    let id = JobId::new();

    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.dequeue(Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    queue.enqueue(Lane::Low, id).await.unwrap();

    let entry = waiter.await.unwrap().unwrap().expect("woken with a job");
    assert_eq!(entry.job_id, id);
}

#[tokio::test(start_paused = true)]
async fn unbounded_wait_still_wakes() {
    let queue = Arc::new(PriorityQueue::unbounded());
    let id = JobId::new();

    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.dequeue(Duration::MAX).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    queue.enqueue(Lane::High, id).await.unwrap();
    let entry = waiter.await.unwrap().unwrap().expect("woken with a job");
    assert_eq!(entry.job_id, id);

    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.dequeue(Duration::MAX).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    queue.close().await;
    assert!(waiter.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn close_wakes_waiters_after_draining() {
    let queue = Arc::new(PriorityQueue::unbounded());
    let id = JobId::new();
    queue.enqueue(Lane::High, id).await.unwrap();
    queue.close().await;

    // Work already queued is still handed out.
    let entry = queue.dequeue(Duration::from_secs(1)).await.unwrap();
    assert_eq!(entry.map(|e| e.job_id), Some(id));
    assert_eq!(
        queue.dequeue(Duration::from_secs(1)).await,
        Err(QueueError::Closed)
    );
    assert_eq!(
        queue.enqueue(Lane::High, JobId::new()).await,
        Err(QueueError::Closed)
    );

    let blocked = Arc::new(PriorityQueue::unbounded());
    let waiter = {
        let blocked = Arc::clone(&blocked);
        tokio::spawn(async move { blocked.dequeue(Duration::from_secs(3600)).await })
    };
    tokio::task::yield_now().await;
    blocked.close().await;
    assert_eq!(waiter.await.unwrap(), Err(QueueError::Closed));
}

#[tokio::test]
async fn removed_jobs_are_never_dequeued() {
    let queue = PriorityQueue::unbounded();
    let keep = JobId::new();
    let gone = JobId::new();
    queue.enqueue(Lane::Low, gone).await.unwrap();
    queue.enqueue(Lane::Low, keep).await.unwrap();
    assert_eq!(queue.position(&keep).await, Some(2));

    assert!(queue.remove(&gone).await);
    assert_eq!(queue.position(&keep).await, Some(1));
    assert_eq!(queue.try_dequeue().await.unwrap().job_id, keep);
}
