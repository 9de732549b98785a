//! Job & Event Bus (C11): process-wide job registry plus per-job event
//! fanout. Job-map mutations are serialized under one mutex; event
//! emission only touches the per-job subscriber list, never the map, so a
//! slow subscriber can't stall unrelated jobs.
//!
//! Each subscriber gets its own bounded `tokio::sync::mpsc` channel
//! (default capacity 100, §4.11). A full subscriber channel drops the new
//! event *for that subscriber only* — `try_send` and discard on `Full`,
//! matching the teacher's "never block the emitter" backpressure stance
//! from its own streaming CLI paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use crate::model::{Job, JobStatus, PhaseEvent};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

struct JobEntry {
    job: Job,
    subscribers: Vec<mpsc::Sender<PhaseEvent>>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct JobBus {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    channel_capacity: usize,
}

impl JobBus {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub async fn create_job(&self, job_id: impl Into<String>) -> Job {
        let job = Job::new(job_id);
        let mut jobs = self.jobs.lock().await;
        jobs.insert(
            job.job_id.clone(),
            JobEntry {
                job: job.clone(),
                subscribers: Vec::new(),
                cancelled: Arc::new(AtomicBool::new(false)),
            },
        );
        job
    }

    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id).map(|e| e.job.clone())
    }

    pub async fn list_jobs(&self, limit: usize) -> Vec<Job> {
        let jobs = self.jobs.lock().await;
        let mut list: Vec<Job> = jobs.values().map(|e| e.job.clone()).collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(limit);
        list
    }

    pub async fn update_status(&self, job_id: &str, status: JobStatus) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.job.status = status;
            match status {
                JobStatus::Running if entry.job.started_at.is_none() => {
                    entry.job.started_at = Some(Utc::now());
                }
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                    entry.job.completed_at = Some(Utc::now());
                }
                _ => {}
            }
        }
    }

    pub async fn set_error(&self, job_id: &str, error: impl Into<String>) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.job.error = Some(error.into());
        }
    }

    pub async fn start_phase(&self, job_id: &str, phase_id: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.job.current_phase = Some(phase_id.to_string());
        }
    }

    pub async fn record_phase_result(
        &self,
        job_id: &str,
        record: crate::model::JobPhaseRecord,
    ) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.job.phases.push(record);
        }
    }

    /// Subscribe to a job's events; returns `None` if the job doesn't exist.
    pub async fn subscribe(&self, job_id: &str) -> Option<mpsc::Receiver<PhaseEvent>> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs.get_mut(job_id)?;
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        entry.subscribers.push(tx);
        Some(rx)
    }

    /// Enqueue an event to every live subscriber of `job_id`. A full
    /// subscriber channel silently drops this event for that subscriber.
    pub async fn emit(&self, job_id: &str, event: PhaseEvent) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry
                .subscribers
                .retain(|tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
        }
    }

    /// Non-blocking variant of [`emit`](Self::emit) for callers that can't
    /// `.await` (e.g. a synchronous [`crate::agent_runner::ProgressSink`]
    /// invoked from inside a subprocess read loop). Uses `try_lock` on the
    /// job map instead of `lock`; if the map is momentarily held by
    /// another task, or the job is unknown, the event is silently dropped
    /// — consistent with the bus's "never block the emitter" backpressure
    /// stance (§4.11), just applied to the map lock instead of only the
    /// per-subscriber channel.
    pub fn try_emit(&self, job_id: &str, event: PhaseEvent) {
        if let Ok(mut jobs) = self.jobs.try_lock() {
            if let Some(entry) = jobs.get_mut(job_id) {
                entry
                    .subscribers
                    .retain(|tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
            }
        }
    }

    /// Request cancellation of a running job (the `stop` command, §6). The
    /// orchestrator loop checks this at phase boundaries -- cancellation
    /// takes effect after the in-flight phase finishes, not mid-subprocess.
    /// Returns `false` if the job is unknown.
    pub async fn request_cancel(&self, job_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        match jobs.get(job_id) {
            Some(entry) => {
                entry.cancelled.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub async fn is_cancel_requested(&self, job_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id)
            .map(|e| e.cancelled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Close all subscriber channels for a job, after a terminal event.
    pub async fn close_subscribers(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.subscribers.clear();
        }
    }

    /// Spawn a background task that emits `Keepalive` to `job_id`'s
    /// subscribers every 30s until `stop` fires. Callers tear it down when
    /// the job reaches a terminal state.
    pub fn spawn_keepalive(&self, job_id: String, mut stop: tokio::sync::oneshot::Receiver<()>) {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        bus.emit(&job_id, PhaseEvent::Keepalive).await;
                    }
                    _ = &mut stop => break,
                }
            }
        });
    }
}

impl Default for JobBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get_job_round_trips() {
        let bus = JobBus::new();
        bus.create_job("job-1").await;
        let job = bus.get_job("job-1").await.unwrap();
        assert_eq!(job.job_id, "job-1");
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn update_status_to_running_sets_started_at() {
        let bus = JobBus::new();
        bus.create_job("job-1").await;
        bus.update_status("job-1", JobStatus::Running).await;
        let job = bus.get_job("job-1").await.unwrap();
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = JobBus::new();
        bus.create_job("job-1").await;
        let mut rx = bus.subscribe("job-1").await.unwrap();
        bus.emit("job-1", PhaseEvent::JobStarted).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PhaseEvent::JobStarted));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let bus = JobBus::new();
        bus.create_job("job-1").await;
        let mut rx1 = bus.subscribe("job-1").await.unwrap();
        let mut rx2 = bus.subscribe("job-1").await.unwrap();
        bus.emit("job-1", PhaseEvent::JobCompleted).await;
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn close_subscribers_drops_the_channel() {
        let bus = JobBus::new();
        bus.create_job("job-1").await;
        let mut rx = bus.subscribe("job-1").await.unwrap();
        bus.close_subscribers("job-1").await;
        bus.emit("job-1", PhaseEvent::JobCompleted).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn request_cancel_flags_an_existing_job() {
        let bus = JobBus::new();
        bus.create_job("job-1").await;
        assert!(!bus.is_cancel_requested("job-1").await);
        assert!(bus.request_cancel("job-1").await);
        assert!(bus.is_cancel_requested("job-1").await);
    }

    #[tokio::test]
    async fn request_cancel_of_unknown_job_returns_false() {
        let bus = JobBus::new();
        assert!(!bus.request_cancel("ghost").await);
    }

    #[tokio::test]
    async fn list_jobs_respects_limit() {
        let bus = JobBus::new();
        bus.create_job("a").await;
        bus.create_job("b").await;
        bus.create_job("c").await;
        let list = bus.list_jobs(2).await;
        assert_eq!(list.len(), 2);
    }

    #[tokio::test]
    async fn try_emit_reaches_subscribers_without_awaiting() {
        let bus = JobBus::new();
        bus.create_job("job-1").await;
        let mut rx = bus.subscribe("job-1").await.unwrap();
        bus.try_emit("job-1", PhaseEvent::JobStarted);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PhaseEvent::JobStarted));
    }

    #[tokio::test]
    async fn try_emit_on_unknown_job_is_a_silent_no_op() {
        let bus = JobBus::new();
        bus.try_emit("ghost", PhaseEvent::JobStarted);
    }
}
