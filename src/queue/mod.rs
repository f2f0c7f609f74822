//! Per-source task queues with at-least-once delivery.
//!
//! One named queue exists per task kind. A reserved task is exclusively
//! owned by its worker until acked, nacked, or its visibility deadline
//! expires; expired claims are requeued on the next reserve pass, which is
//! what makes delivery at-least-once. Workers are idempotent at the
//! (provider, kind, attempt) level, so redelivery is safe.
//!
//! FIFO holds among tasks of the same priority; higher-priority bands
//! preempt lower ones at dequeue time. Cancelled jobs' tasks are
//! tombstoned: they still flow to workers, which ack them without invoking
//! a connector.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

use crate::model::{JobPriority, TaskKind, WorkerTask};

const RESERVE_POLL: Duration = Duration::from_millis(250);

struct InFlight {
    task: WorkerTask,
    deadline: Instant,
}

#[derive(Default)]
struct QueueInner {
    ready: BTreeMap<JobPriority, VecDeque<WorkerTask>>,
    delayed: Vec<(Instant, WorkerTask)>,
    in_flight: HashMap<String, InFlight>,
    tombstoned_jobs: HashSet<String>,
}

impl QueueInner {
    /// Promote due delayed tasks and expired in-flight claims back to ready.
    fn sweep(&mut self, now: Instant) {
        let mut due = Vec::new();
        self.delayed.retain(|(at, task)| {
            if *at <= now {
                due.push(task.clone());
                false
            } else {
                true
            }
        });
        for task in due {
            self.ready.entry(task.priority).or_default().push_back(task);
        }

        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, claim)| claim.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in expired {
            if let Some(claim) = self.in_flight.remove(&task_id) {
                debug!(task_id, "visibility deadline expired, requeueing");
                self.ready
                    .entry(claim.task.priority)
                    .or_default()
                    .push_back(claim.task);
            }
        }
    }

    fn pop_best(&mut self) -> Option<WorkerTask> {
        // Highest priority band first.
        let priority = self
            .ready
            .iter()
            .rev()
            .find(|(_, band)| !band.is_empty())
            .map(|(priority, _)| *priority)?;
        self.ready.get_mut(&priority)?.pop_front()
    }
}

/// One named FIFO of worker tasks.
pub struct TaskQueue {
    kind: TaskKind,
    visibility_timeout: Duration,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(kind: TaskKind, visibility_timeout: Duration) -> Self {
        Self {
            kind,
            visibility_timeout,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn enqueue(&self, task: WorkerTask) {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            inner.ready.entry(task.priority).or_default().push_back(task);
        }
        self.notify.notify_one();
    }

    /// Claim one task, waiting up to `timeout` for one to become available.
    ///
    /// The claim carries a visibility deadline; a worker that neither acks
    /// nor nacks before it expires loses ownership.
    pub async fn reserve(&self, timeout: Duration) -> Option<WorkerTask> {
        let deadline = Instant::now() + timeout;
        loop {
            // Arm the notification before checking, so an enqueue between
            // the check and the wait is not lost.
            let notified = self.notify.notified();

            if let Some(task) = self.try_reserve() {
                return Some(task);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = (deadline - now).min(RESERVE_POLL);
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn try_reserve(&self) -> Option<WorkerTask> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.sweep(Instant::now());
        let task = inner.pop_best()?;
        inner.in_flight.insert(
            task.task_id.clone(),
            InFlight {
                task: task.clone(),
                deadline: Instant::now() + self.visibility_timeout,
            },
        );
        Some(task)
    }

    /// Settle a claim. Unknown ids are ignored (the claim may have expired
    /// and been redelivered).
    pub fn ack(&self, task_id: &str) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.in_flight.remove(task_id);
    }

    /// Return a claimed task to the queue after `delay`, with its attempt
    /// counter advanced.
    pub fn nack(&self, task_id: &str, delay: Duration) {
        let requeued = {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            match inner.in_flight.remove(task_id) {
                Some(claim) => {
                    let mut task = claim.task;
                    task.attempt += 1;
                    inner.delayed.push((Instant::now() + delay, task));
                    true
                }
                None => false,
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Mark every task of a job as droppable without connector invocation.
    pub fn tombstone_job(&self, job_id: &str) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.tombstoned_jobs.insert(job_id.to_string());
    }

    pub fn is_tombstoned(&self, job_id: &str) -> bool {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.tombstoned_jobs.contains(job_id)
    }

    /// Ready + delayed tasks, for operator visibility.
    pub fn depth(&self) -> usize {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.ready.values().map(VecDeque::len).sum::<usize>() + inner.delayed.len()
    }
}

/// The set of per-kind queues, routing by task kind.
pub struct ValidationQueues {
    queues: BTreeMap<TaskKind, TaskQueue>,
}

impl ValidationQueues {
    pub fn new(visibility_timeout: Duration) -> Self {
        let queues = TaskKind::ALL
            .iter()
            .map(|kind| (*kind, TaskQueue::new(*kind, visibility_timeout)))
            .collect();
        Self { queues }
    }

    pub fn enqueue(&self, task: WorkerTask) {
        // All five kinds are constructed up front.
        self.queues[&task.kind].enqueue(task);
    }

    pub fn queue(&self, kind: TaskKind) -> &TaskQueue {
        &self.queues[&kind]
    }

    pub fn tombstone_job(&self, job_id: &str) {
        for queue in self.queues.values() {
            queue.tombstone_job(job_id);
        }
    }

    pub fn depths(&self) -> BTreeMap<TaskKind, usize> {
        self.queues
            .iter()
            .map(|(kind, queue)| (*kind, queue.depth()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderRecord;
    use chrono::Utc;

    fn task(id: &str, priority: JobPriority) -> WorkerTask {
        WorkerTask {
            task_id: id.to_string(),
            job_id: "job1".to_string(),
            provider_id: format!("provider-{id}"),
            kind: TaskKind::IdentifierCheck,
            payload: ProviderRecord::default(),
            attempt: 1,
            priority,
            scheduled_at: Utc::now(),
            timeout_seconds: 300,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn fifo_within_priority() {
        let queue = TaskQueue::new(TaskKind::IdentifierCheck, Duration::from_secs(30));
        queue.enqueue(task("a", JobPriority::Normal));
        queue.enqueue(task("b", JobPriority::Normal));

        let first = queue.reserve(Duration::from_millis(50)).await.unwrap();
        let second = queue.reserve(Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.task_id, "a");
        assert_eq!(second.task_id, "b");
    }

    #[tokio::test]
    async fn higher_priority_preempts() {
        let queue = TaskQueue::new(TaskKind::IdentifierCheck, Duration::from_secs(30));
        queue.enqueue(task("low", JobPriority::Low));
        queue.enqueue(task("urgent", JobPriority::Urgent));
        queue.enqueue(task("normal", JobPriority::Normal));

        let order: Vec<String> = [
            queue.reserve(Duration::from_millis(50)).await.unwrap(),
            queue.reserve(Duration::from_millis(50)).await.unwrap(),
            queue.reserve(Duration::from_millis(50)).await.unwrap(),
        ]
        .into_iter()
        .map(|t| t.task_id)
        .collect();

        assert_eq!(order, vec!["urgent", "normal", "low"]);
    }

    #[tokio::test]
    async fn reserve_times_out_on_empty_queue() {
        let queue = TaskQueue::new(TaskKind::IdentifierCheck, Duration::from_secs(30));
        let start = Instant::now();
        assert!(queue.reserve(Duration::from_millis(60)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn nack_redelivers_with_advanced_attempt() {
        let queue = TaskQueue::new(TaskKind::IdentifierCheck, Duration::from_secs(30));
        queue.enqueue(task("a", JobPriority::Normal));

        let claimed = queue.reserve(Duration::from_millis(50)).await.unwrap();
        assert_eq!(claimed.attempt, 1);
        queue.nack(&claimed.task_id, Duration::from_millis(10));

        let redelivered = queue.reserve(Duration::from_secs(1)).await.unwrap();
        assert_eq!(redelivered.task_id, "a");
        assert_eq!(redelivered.attempt, 2);
    }

    #[tokio::test]
    async fn ack_settles_claim() {
        let queue = TaskQueue::new(TaskKind::IdentifierCheck, Duration::from_millis(50));
        queue.enqueue(task("a", JobPriority::Normal));

        let claimed = queue.reserve(Duration::from_millis(50)).await.unwrap();
        queue.ack(&claimed.task_id);

        // Past the visibility timeout, an acked task must not come back.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(queue.reserve(Duration::from_millis(60)).await.is_none());
    }

    #[tokio::test]
    async fn expired_visibility_requeues() {
        let queue = TaskQueue::new(TaskKind::IdentifierCheck, Duration::from_millis(30));
        queue.enqueue(task("a", JobPriority::Normal));

        let claimed = queue.reserve(Duration::from_millis(50)).await.unwrap();
        // Never acked; the claim lapses.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let redelivered = queue.reserve(Duration::from_millis(500)).await.unwrap();
        assert_eq!(redelivered.task_id, claimed.task_id);
    }

    #[tokio::test]
    async fn tombstone_marks_job() {
        let queues = ValidationQueues::new(Duration::from_secs(30));
        queues.enqueue(task("a", JobPriority::Normal));
        queues.tombstone_job("job1");

        for kind in TaskKind::ALL {
            assert!(queues.queue(kind).is_tombstoned("job1"));
        }
        // The task still flows out; the worker is responsible for dropping it.
        let claimed = queues
            .queue(TaskKind::IdentifierCheck)
            .reserve(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(claimed.task_id, "a");
    }
}
