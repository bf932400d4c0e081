// File: agent/src/jobs.rs
//
// Tracks in-flight and completed monitor actions dispatched from the HTTP
// surface, ported from the reference workspace's JobManager and generalized
// from "node operations" to "monitor action triggers". Idempotency keys map
// to a job id so a retried request with the same key resolves to the
// existing job instead of starting a second one.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub job_id: String,
    pub monitor: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

#[derive(Default)]
pub struct JobManager {
    jobs: RwLock<HashMap<String, JobInfo>>,
    by_idempotency_key: RwLock<HashMap<String, String>>,
}

impl JobManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the existing job id for `idempotency_key` if one is already
    /// tracked, otherwise registers a new running job and returns its id.
    pub async fn dispatch(&self, monitor: &str, idempotency_key: &str) -> (String, bool) {
        if let Some(existing) = self.by_idempotency_key.read().await.get(idempotency_key) {
            return (existing.clone(), false);
        }

        let job_id = Uuid::new_v4().to_string();
        let info = JobInfo {
            job_id: job_id.clone(),
            monitor: monitor.to_string(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error_message: None,
        };
        self.jobs.write().await.insert(job_id.clone(), info);
        self.by_idempotency_key
            .write()
            .await
            .insert(idempotency_key.to_string(), job_id.clone());
        (job_id, true)
    }

    pub async fn complete(&self, job_id: &str, result: serde_json::Value) {
        if let Some(job) = self.jobs.write().await.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = Some(result);
        }
    }

    pub async fn fail(&self, job_id: &str, error_message: String) {
        if let Some(job) = self.jobs.write().await.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.error_message = Some(error_message);
        }
    }

    pub async fn get(&self, job_id: &str) -> Option<JobInfo> {
        self.jobs.read().await.get(job_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_idempotency_key_returns_same_job() {
        let manager = JobManager::new();
        let (first, created_first) = manager.dispatch("speedtest", "key-1").await;
        let (second, created_second) = manager.dispatch("speedtest", "key-1").await;
        assert_eq!(first, second);
        assert!(created_first);
        assert!(!created_second);
    }

    #[tokio::test]
    async fn complete_updates_status_and_result() {
        let manager = JobManager::new();
        let (job_id, _) = manager.dispatch("speedtest", "key-2").await;
        manager.complete(&job_id, serde_json::json!({"download_mbps": 100})).await;
        let job = manager.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
}
