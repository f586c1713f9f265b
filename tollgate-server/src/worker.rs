//! The processing seam behind the admission gate.
//!
//! The gate does not care what the work is, only that something turns an
//! admitted job into a JSON result. Production deployments plug a real
//! backend in here; the default implementation produces a deterministic
//! canned result so the pipeline runs end-to-end without one.

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

use tollgate::error::UpstreamUnavailable;
use tollgate::timestamp::UnixTimestamp;
use tollgate::types::{AgentId, ServiceKind};

/// Everything a processor gets to see about an admitted job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Identifier assigned at admission.
    pub job_id: String,
    /// The admitted caller.
    pub agent: AgentId,
    /// The media to process.
    pub resource_url: Url,
    /// The paid (or free-tier) operation.
    pub kind: ServiceKind,
}

/// Turns an admitted job into a result payload.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Processes the job's media resource.
    async fn process(&self, job: &JobContext) -> Result<Value, UpstreamUnavailable>;
}

/// Deterministic stand-in processor. Returns a canned transcript shaped
/// like a real backend's output, keyed off the resource filename.
#[derive(Debug, Clone, Copy, Default)]
pub struct CannedProcessor;

#[async_trait]
impl MediaProcessor for CannedProcessor {
    async fn process(&self, job: &JobContext) -> Result<Value, UpstreamUnavailable> {
        let filename = job
            .resource_url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("resource");

        Ok(json!({
            "job_id": job.job_id,
            "resource": filename,
            "transcript": format!(
                "[canned transcript of {filename} for {}]",
                job.agent.as_str()
            ),
            "duration_secs": 42,
            "language": "en",
            "priority": job.kind == ServiceKind::Priority,
            "processed_at": UnixTimestamp::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[tokio::test]
    async fn canned_result_names_the_resource() {
        let job = JobContext {
            job_id: "job-1".to_owned(),
            agent: AgentId::from_str("agent-7").unwrap(),
            resource_url: Url::parse("https://cdn.example.com/calls/monday.mp3").unwrap(),
            kind: ServiceKind::Standard,
        };
        let result = CannedProcessor.process(&job).await.unwrap();
        assert_eq!(result["resource"], "monday.mp3");
        assert_eq!(result["priority"], false);
        assert!(result["transcript"].as_str().unwrap().contains("monday.mp3"));
    }

    #[tokio::test]
    async fn priority_jobs_are_flagged() {
        let job = JobContext {
            job_id: "job-2".to_owned(),
            agent: AgentId::from_str("agent-7").unwrap(),
            resource_url: Url::parse("https://cdn.example.com/call.wav").unwrap(),
            kind: ServiceKind::Priority,
        };
        let result = CannedProcessor.process(&job).await.unwrap();
        assert_eq!(result["priority"], true);
    }
}
