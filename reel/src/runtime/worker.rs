use serde::{Deserialize, Serialize};

/// Configuration for the workers of one process.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix for worker identifiers; each loop appends `-w{n}`.
    pub worker_id: String,
    /// Number of worker loops to run in this process.
    pub parallelism: usize,
}

impl WorkerConfig {
    /// Create a new worker configuration with the given worker ID.
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Self::default()
        }
    }

    /// Set the number of worker loops.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Identifier of the `index`-th loop in this process.
    pub fn loop_id(&self, index: usize) -> String {
        format!("{}-w{}", self.worker_id, index)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("reel-{}", std::process::id()),
            parallelism: 1,
        }
    }
}
