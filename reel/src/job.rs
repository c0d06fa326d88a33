use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::error::ReelError;

/// Monotonically assigned job identifier.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(JobId)
            .map_err(|_| ReelError::NotFound(s.to_string()))
    }
}

/// Per-job task identifier, starting at 1.
pub type TaskId = u64;

/// Structured queue entry key.
///
/// Serialized as `{job_id}_{task_id}` only when written to a store.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct TaskKey {
    /// Job the task belongs to.
    pub job_id: JobId,
    /// Position in the job's allocation order, from the queued counter.
    pub task_id: TaskId,
}

impl TaskKey {
    /// Key of task `task_id` of `job_id`.
    pub fn new(job_id: JobId, task_id: TaskId) -> Self {
        Self { job_id, task_id }
    }

    /// Store-boundary encoding.
    pub fn encode(&self) -> String {
        format!("{}_{}", self.job_id.0, self.task_id)
    }

    /// Parse the store-boundary encoding.
    pub fn decode(raw: &str) -> Option<Self> {
        let (job, task) = raw.split_once('_')?;
        Some(Self {
            job_id: JobId(job.parse().ok()?),
            task_id: task.parse().ok()?,
        })
    }
}

impl Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.job_id.0, self.task_id)
    }
}

/// Lifecycle state of a job as seen by pollers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Tasks are still outstanding, or fan-in has not finished.
    #[default]
    Pending,
    /// The final artifact is published.
    Done,
    /// A state written by a newer or foreign writer.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted job record.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Public location of the final artifact; empty until `Done`.
    #[serde(default)]
    pub final_path: String,
}

impl JobRecord {
    /// Record of a freshly created job.
    pub fn pending() -> Self {
        Self::default()
    }

    /// Record of a finished job.
    pub fn done(final_path: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Done,
            final_path: final_path.into(),
        }
    }
}

/// Product artwork a job renders.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    /// gRPC mascot, slug `grpc`.
    Grpc,
    /// Kubernetes logo, slug `k8s`.
    Kubernetes,
    /// Go gopher, the fallback for unrecognised requests.
    #[default]
    Gopher,
}

impl Product {
    /// Short name used for scene template files.
    pub fn slug(&self) -> &'static str {
        match self {
            Product::Grpc => "grpc",
            Product::Kubernetes => "k8s",
            Product::Gopher => "gopher",
        }
    }
}

impl Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Product {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grpc" => Ok(Product::Grpc),
            "kubernetes" | "k8s" => Ok(Product::Kubernetes),
            "gopher" | "go" => Ok(Product::Gopher),
            other => Err(ReelError::config(
                "product",
                format!("unknown product `{other}`"),
            )),
        }
    }
}

/// Payload of a single frame task.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RenderTask {
    /// Zero-based frame index within the job.
    pub frame: u32,
    /// Text drawn on the job's badge.
    pub caption: String,
    /// Artwork to render.
    pub product: Product,
}

impl RenderTask {
    /// JSON payload stored with the queue entry.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a payload written by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_encoding() {
        let key = TaskKey::new(JobId(1), 15);
        assert_eq!(key.encode(), "1_15");
        assert_eq!(TaskKey::decode("1_15"), Some(key));
        assert_eq!(TaskKey::decode("1-15"), None);
        assert_eq!(TaskKey::decode("x_1"), None);
    }

    #[test]
    fn test_job_id_parse() {
        assert_eq!("42".parse::<JobId>().unwrap(), JobId(42));
        assert!(matches!("nope".parse::<JobId>(), Err(ReelError::NotFound(_))));
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let record: JobRecord =
            serde_json::from_str(r#"{"status":"exploded","final_path":""}"#).unwrap();
        assert_eq!(record.status, JobStatus::Unknown);
    }

    #[test]
    fn test_pending_record_has_empty_path() {
        let record: JobRecord = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(record, JobRecord::pending());
    }

    #[test]
    fn test_product_aliases() {
        assert_eq!("kubernetes".parse::<Product>().unwrap(), Product::Kubernetes);
        assert_eq!("K8S".parse::<Product>().unwrap(), Product::Kubernetes);
        assert_eq!(Product::Kubernetes.slug(), "k8s");
        assert!("cobol".parse::<Product>().is_err());
    }

    #[test]
    fn test_render_task_decode_rejects_garbage() {
        assert!(RenderTask::decode(b"{not json").is_err());
        let task = RenderTask {
            frame: 3,
            caption: "alice".into(),
            product: Product::Grpc,
        };
        assert_eq!(RenderTask::decode(&task.encode().unwrap()).unwrap(), task);
    }
}
