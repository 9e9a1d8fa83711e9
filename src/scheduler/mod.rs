//! Timed echo scheduling
//!
//! The scheduler turns one decoded request into `times` delayed sends
//! against the originating connection. Pending sends wait in a
//! deadline-ordered queue owned by a timer task; only sends that are
//! actually due are handed to the fixed delivery pool shared across
//! all connections. Workers therefore never sleep on a deadline, so a
//! batch of long-delay sends cannot starve zero-delay traffic, and the
//! bounded intake queue back-pressures a flooding producer instead of
//! growing without bound.

use crate::core::message::{EchoReply, EchoRequest};
use crate::error::{EchoError, Result};
use crate::session::{ConnectionHandle, Delivery};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Deadlines are capped this far out; it also bounds `delay * times`
/// arithmetic against overflow
const MAX_SCHEDULE_HORIZON: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of delivery worker tasks shared across connections
    pub workers: usize,
    /// Maximum pending scheduled sends before enqueue back-pressures
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            queue_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker count
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set queue capacity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// One timed unit of work: deliver a single reply frame at a deadline
struct ScheduledSend {
    /// Absolute fire time: request receipt + k * delay
    deadline: Instant,
    /// Pre-encoded reply frame, shared across a request's repetitions
    frame: Arc<str>,
    handle: ConnectionHandle,
}

// Heap ordering is by deadline alone; frames and handles don't compare
impl PartialEq for ScheduledSend {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for ScheduledSend {}

impl PartialOrd for ScheduledSend {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledSend {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

/// Per-connection echo scheduler running on a shared worker pool
///
/// Stateless across requests: each inbound request is scheduled
/// independently, and replies from overlapping requests on one
/// connection may interleave. Only the ordering within a single
/// request's repetition sequence is guaranteed, via strictly
/// increasing deadlines.
pub struct EchoScheduler {
    intake_tx: mpsc::Sender<ScheduledSend>,
    timer: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl EchoScheduler {
    /// Create a scheduler and spawn its timer task and worker pool
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.queue_capacity);
        // Due-job hand-off stays shallow; workers provide the real
        // delivery back-pressure
        let (due_tx, due_rx) = mpsc::channel(config.workers.max(1));
        let due_rx = Arc::new(Mutex::new(due_rx));

        let timer = tokio::spawn(Self::timer_loop(intake_rx, due_tx));

        let workers = (0..config.workers)
            .map(|_| {
                let due_rx = Arc::clone(&due_rx);
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next
                        // due job; delivery itself runs unlocked
                        let job = {
                            let mut rx = due_rx.lock().await;
                            rx.recv().await
                        };
                        match job {
                            Some(job) => Self::deliver(job).await,
                            None => break,
                        }
                    }
                })
            })
            .collect();

        Self {
            intake_tx,
            timer,
            workers,
        }
    }

    /// Create a scheduler with default configuration
    #[must_use]
    pub fn with_default_config() -> Self {
        Self::new(SchedulerConfig::default())
    }

    /// Schedule the reply sequence for one request
    ///
    /// Normalizes `times`/`delay`, builds one reply, and enqueues the
    /// k-th send to fire `k * delay` after now (1-based, so the first
    /// reply waits a full delay period). Returns once all sends are
    /// enqueued; delivery happens asynchronously on the worker pool.
    pub async fn schedule(&self, request: &EchoRequest, handle: &ConnectionHandle) -> Result<()> {
        let times = request.normalized_times();
        let delay = request.normalized_delay();
        let received = Instant::now();

        let reply = EchoReply::for_request(request);
        let frame: Arc<str> = reply.encode()?.into();

        for k in 1..=times {
            let offset = delay.saturating_mul(k).min(MAX_SCHEDULE_HORIZON);
            let job = ScheduledSend {
                deadline: received + offset,
                frame: Arc::clone(&frame),
                handle: handle.clone(),
            };
            self.intake_tx
                .send(job)
                .await
                .map_err(|_| EchoError::channel("scheduler queue closed"))?;
        }

        Ok(())
    }

    /// Timer task: holds pending sends in a min-heap and releases them
    /// to the workers as they come due
    async fn timer_loop(
        mut intake_rx: mpsc::Receiver<ScheduledSend>,
        due_tx: mpsc::Sender<ScheduledSend>,
    ) {
        let mut pending: BinaryHeap<Reverse<ScheduledSend>> = BinaryHeap::new();

        loop {
            // Wait for either new work or the earliest deadline
            match pending.peek().map(|Reverse(job)| job.deadline) {
                Some(deadline) => {
                    tokio::select! {
                        job = intake_rx.recv() => match job {
                            Some(job) => pending.push(Reverse(job)),
                            None => break,
                        },
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => match intake_rx.recv().await {
                    Some(job) => pending.push(Reverse(job)),
                    None => break,
                },
            }

            // Release everything that is due
            let now = Instant::now();
            loop {
                match pending.peek() {
                    Some(Reverse(job)) if job.deadline <= now => {}
                    _ => break,
                }
                if let Some(Reverse(job)) = pending.pop() {
                    if due_tx.send(job).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Deliver one due send unless the connection closed
    async fn deliver(job: ScheduledSend) {
        if !job.handle.is_open() {
            // Expected terminal condition, not a failure
            return;
        }

        match job.handle.deliver(Arc::clone(&job.frame)).await {
            Delivery::Accepted => {
                tracing::info!(">> [{} ({})]", job.frame, job.handle.peer_addr());
            }
            Delivery::ConnectionClosed => {}
        }
    }
}

impl Drop for EchoScheduler {
    fn drop(&mut self) {
        self.timer.abort();
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn test_handle(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Arc<str>>) {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::for_tests(addr, tx), rx)
    }

    async fn collect_frames(
        rx: &mut mpsc::Receiver<Arc<str>>,
        expected: usize,
        deadline: Duration,
    ) -> Vec<(Arc<str>, Instant)> {
        let mut frames = Vec::new();
        let stop = Instant::now() + deadline;
        while frames.len() < expected {
            match tokio::time::timeout_at(stop, rx.recv()).await {
                Ok(Some(frame)) => frames.push((frame, Instant::now())),
                _ => break,
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_exact_reply_count() {
        let scheduler = EchoScheduler::with_default_config();
        let (handle, mut rx) = test_handle(16);

        let request = EchoRequest::new("hello", 3, 0);
        scheduler.schedule(&request, &handle).await.unwrap();

        let frames = collect_frames(&mut rx, 4, Duration::from_millis(500)).await;
        assert_eq!(frames.len(), 3);
        for (frame, _) in &frames {
            assert_eq!(frame.as_ref(), r#"{"msg":"hello"}"#);
        }
    }

    #[tokio::test]
    async fn test_times_zero_sends_once() {
        let scheduler = EchoScheduler::with_default_config();
        let (handle, mut rx) = test_handle(16);

        let request = EchoRequest::new("x", 0, 0);
        scheduler.schedule(&request, &handle).await.unwrap();

        let frames = collect_frames(&mut rx, 2, Duration::from_millis(300)).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.as_ref(), r#"{"msg":"x"}"#);
    }

    #[tokio::test]
    async fn test_negative_fields_normalize() {
        let scheduler = EchoScheduler::with_default_config();
        let (handle, mut rx) = test_handle(16);

        let request = EchoRequest::new("n", -4, -250);
        let start = Instant::now();
        scheduler.schedule(&request, &handle).await.unwrap();

        let frames = collect_frames(&mut rx, 2, Duration::from_millis(300)).await;
        assert_eq!(frames.len(), 1);
        // Negative delay fires as soon as scheduled
        assert!(frames[0].1.duration_since(start) < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_kth_send_waits_k_delay_periods() {
        let scheduler = EchoScheduler::with_default_config();
        let (handle, mut rx) = test_handle(16);

        let request = EchoRequest::new("tick", 3, 50);
        let start = Instant::now();
        scheduler.schedule(&request, &handle).await.unwrap();

        let frames = collect_frames(&mut rx, 3, Duration::from_secs(2)).await;
        assert_eq!(frames.len(), 3);
        for (k, (_, at)) in frames.iter().enumerate() {
            let floor = Duration::from_millis(50 * (k as u64 + 1));
            assert!(
                at.duration_since(start) >= floor,
                "send {} fired before its {}ms floor",
                k + 1,
                floor.as_millis()
            );
        }
    }

    #[tokio::test]
    async fn test_closed_connection_gets_zero_writes() {
        let scheduler = EchoScheduler::with_default_config();
        let (handle, mut rx) = test_handle(16);

        let request = EchoRequest::new("late", 3, 40);
        scheduler.schedule(&request, &handle).await.unwrap();
        handle.close();

        let frames = collect_frames(&mut rx, 1, Duration::from_millis(300)).await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_requests_keep_their_counts() {
        let scheduler = EchoScheduler::with_default_config();
        let (handle, mut rx) = test_handle(32);

        let start = Instant::now();
        scheduler
            .schedule(&EchoRequest::new("a", 3, 100), &handle)
            .await
            .unwrap();
        scheduler
            .schedule(&EchoRequest::new("b", 3, 100), &handle)
            .await
            .unwrap();

        let frames = collect_frames(&mut rx, 6, Duration::from_secs(2)).await;
        assert_eq!(frames.len(), 6);

        let count_a = frames
            .iter()
            .filter(|(f, _)| f.as_ref() == r#"{"msg":"a"}"#)
            .count();
        assert_eq!(count_a, 3);
        assert_eq!(frames.len() - count_a, 3);

        // Intra-request spacing holds for each request independently
        for tag in [r#"{"msg":"a"}"#, r#"{"msg":"b"}"#] {
            for (k, at) in frames
                .iter()
                .filter(|(f, _)| f.as_ref() == tag)
                .map(|(_, at)| at)
                .enumerate()
            {
                let floor = Duration::from_millis(100 * (k as u64 + 1));
                assert!(at.duration_since(start) >= floor);
            }
        }
    }

    #[tokio::test]
    async fn test_long_delays_do_not_starve_due_sends() {
        // More pending long-delay sends than the pool has workers must
        // not hold up a zero-delay send; the timer only releases due
        // jobs to the workers
        let scheduler = EchoScheduler::with_default_config();
        let (slow_handle, _slow_rx) = test_handle(32);
        let (fast_handle, mut fast_rx) = test_handle(4);

        scheduler
            .schedule(&EchoRequest::new("slow", 16, 5_000), &slow_handle)
            .await
            .unwrap();
        scheduler
            .schedule(&EchoRequest::new("fast", 1, 0), &fast_handle)
            .await
            .unwrap();

        let frames = collect_frames(&mut fast_rx, 1, Duration::from_millis(500)).await;
        assert_eq!(frames.len(), 1, "zero-delay send stuck behind long delays");
        assert_eq!(frames[0].0.as_ref(), r#"{"msg":"fast"}"#);
    }

    #[tokio::test]
    async fn test_extreme_delay_values_schedule_without_panic() {
        let scheduler = EchoScheduler::with_default_config();
        let (handle, mut rx) = test_handle(8);

        // delay * k would overflow without the horizon cap
        let request = EchoRequest::new("far", 3, i64::MAX);
        scheduler.schedule(&request, &handle).await.unwrap();

        // Nothing comes due anywhere near now
        let frames = collect_frames(&mut rx, 1, Duration::from_millis(200)).await;
        assert!(frames.is_empty());
    }
}
