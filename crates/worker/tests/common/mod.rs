//! Shared harness for monitor tests: an in-memory job store, a scripted
//! container runtime, and a subscriber on the event bus.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use trackq_core::job_type::{JOB_TYPE_AWS, JOB_TYPE_DOCKER};
use trackq_core::status::MediaStatus;
use trackq_core::types::DbId;
use trackq_db::memory::MemoryJobStore;
use trackq_db::models::job::CreateJob;
use trackq_db::models::media::CreateMedia;
use trackq_docker::fake::FakeRuntime;
use trackq_events::{EventBus, JobEvent};
use trackq_runner::{Runner, RunnerConfig};
use trackq_worker::{Monitor, MonitorConfig, PollPolicy};

pub const NAME_PREFIX: &str = "trackq-runner";
pub const OWNER: &str = "owner@example.org";

pub struct Harness {
    pub store: MemoryJobStore,
    pub runtime: FakeRuntime,
    pub events: Arc<EventBus>,
    pub monitor: Monitor,
    receiver: broadcast::Receiver<JobEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryJobStore::new();
        let runtime = FakeRuntime::new();
        let events = Arc::new(EventBus::default());
        let receiver = events.subscribe();

        let runner = Runner::new(
            Arc::new(runtime.clone()),
            RunnerConfig {
                image: "tracker:test".to_string(),
                name_prefix: NAME_PREFIX.to_string(),
            },
        );
        let monitor = Monitor::new(
            Arc::new(store.clone()),
            runner,
            Arc::clone(&events),
            MonitorConfig {
                bucket: "bucket1".to_string(),
                track_prefix: "tracks".to_string(),
                track_config: "s3://configs/strong_sort.yaml".to_string(),
                args: "--iou-thres 0.5 --max-det 100".to_string(),
                poll: PollPolicy {
                    interval: Duration::from_secs(30),
                    attempts: 3,
                },
            },
        );

        Self {
            store,
            runtime,
            events,
            monitor,
            receiver,
        }
    }

    /// Submit a docker job with one media item.
    pub fn queue_job(&self, media_url: &str) -> DbId {
        self.insert(JOB_TYPE_DOCKER, &[media_url])
    }

    /// Submit a docker job with several media items; only the first runs.
    pub fn queue_job_with_media(&self, media_urls: &[&str]) -> DbId {
        self.insert(JOB_TYPE_DOCKER, media_urls)
    }

    /// Submit a job that a different backend handles.
    pub fn queue_aws_job(&self, media_url: &str) -> DbId {
        self.insert(JOB_TYPE_AWS, &[media_url])
    }

    fn insert(&self, job_type: &str, media_urls: &[&str]) -> DbId {
        self.store
            .insert(&CreateJob {
                name: format!("track {}", media_urls.join(",")),
                job_type: job_type.to_string(),
                email: OWNER.to_string(),
                model: "s3://models/yolov5.tar.gz".to_string(),
                media: media_urls
                    .iter()
                    .map(|url| CreateMedia {
                        name: url.to_string(),
                    })
                    .collect(),
            })
            .job
            .id
    }

    /// Derived status of a job.
    pub fn status(&self, job_id: DbId) -> Option<MediaStatus> {
        self.store.job(job_id).and_then(|j| j.status())
    }

    /// Persisted engine handle of a job.
    pub fn engine(&self, job_id: DbId) -> Option<String> {
        self.store.job(job_id).and_then(|j| j.job.engine)
    }

    /// Notifications published so far, as `(job_id, status)`.
    pub fn notifications(&mut self) -> Vec<(DbId, MediaStatus)> {
        let mut out = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            out.push((event.job_id, event.status));
        }
        out
    }
}
