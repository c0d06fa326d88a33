use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::artifact::Bucket;
use crate::error::ReelError;
use crate::lease::LeaseRetryConfig;
use crate::runtime::WorkerConfig;

/// Configuration for job shape and output publication.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Number of frame tasks a job fans out into.
    pub frames_per_job: u32,
    /// Bucket receiving frames and final artifacts.
    pub bucket: String,
    /// Display duration of every frame in the compiled artifact.
    pub frame_delay_ms: u32,
    /// Make the final artifact world-readable.
    pub public_output: bool,
    /// Base URL of the render service.
    pub renderer_url: String,
    /// Per-request timeout for the render service.
    pub render_timeout_secs: u64,
    /// Local directory backing the artifact store.
    pub artifact_root: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_per_job: 15,
            bucket: "reel-artifacts".to_string(),
            frame_delay_ms: 0,
            public_output: true,
            renderer_url: "http://127.0.0.1:8081".to_string(),
            render_timeout_secs: 120,
            artifact_root: "artifacts".to_string(),
        }
    }
}

/// Where per-job scene assets come from and how the badge is captioned.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Directory holding `{product}.obj.tmpl`, `{product}.mtl.tmpl` and the
    /// badge image.
    pub scene_dir: String,
    /// Badge image inside `scene_dir`.
    pub badge_file: String,
    /// TrueType font for the caption; the bundled bold face when unset.
    pub font_file: Option<String>,
    /// Left edge of the caption, in pixels.
    pub caption_x: u32,
    /// Top of the caption's line box, in pixels.
    pub caption_y: u32,
    /// Caption size in pixels.
    pub caption_px: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            scene_dir: "scene".to_string(),
            badge_file: "gcp_next_badge.png".to_string(),
            font_file: None,
            caption_x: 90,
            caption_y: 120,
            caption_px: 120.0,
        }
    }
}

/// Configuration for queue leasing behavior and retry policies.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Lease time-to-live in seconds before the sweep may reclaim a task.
    pub lease_ttl_secs: i64,
    /// Interval between reclaim sweeps in milliseconds.
    pub sweep_interval_ms: u64,
    /// Attempts (failures plus reclaims) before a task is dead-lettered.
    pub max_attempts: u32,
    /// Longest single wait inside a blocking lease call.
    pub lease_wait_ms: u64,
    /// Fixed delay after a store error before the next lease attempt.
    pub store_error_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 300,
            sweep_interval_ms: 30_000,
            max_attempts: 3,
            lease_wait_ms: 1_000,
            store_error_backoff_ms: 100,
        }
    }
}

impl QueueConfig {
    /// Retry policy derived from this configuration.
    pub fn retry(&self) -> LeaseRetryConfig {
        LeaseRetryConfig {
            max_attempts: self.max_attempts,
            lease_ttl_secs: self.lease_ttl_secs,
        }
    }
}

/// Configuration for the store connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Connection string (e.g., "redis://127.0.0.1:6379/0").
    pub redis_url: String,
    /// Prefix prepended to every store key.
    pub key_prefix: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "reel".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "reel=info".to_string(),
            json: false,
        }
    }
}

/// Complete settings tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReelSettings {
    /// Job shape and output publication.
    pub render: RenderConfig,
    /// Scene assets staged per job.
    pub scene: SceneConfig,
    /// Leasing, sweeping and retries.
    pub queue: QueueConfig,
    /// Store connection.
    pub persistence: PersistenceConfig,
    /// Worker identity and parallelism.
    pub worker: WorkerConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl ReelSettings {
    /// Load settings: optional `reel.toml`, an explicit file, then
    /// `REEL__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ReelError> {
        let mut builder =
            Config::builder().add_source(File::with_name("reel").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("REEL").separator("__"));

        let settings: ReelSettings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ReelError::config("settings", e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ReelError> {
        if self.render.frames_per_job == 0 {
            return Err(ReelError::config(
                "render.frames_per_job",
                "must be at least 1",
            ));
        }
        if !Bucket::new(self.render.bucket.clone()).is_valid() {
            return Err(ReelError::config(
                "render.bucket",
                format!("`{}` is not a valid bucket name", self.render.bucket),
            ));
        }
        if self.scene.caption_px.is_nan() || self.scene.caption_px <= 0.0 {
            return Err(ReelError::config("scene.caption_px", "must be positive"));
        }
        if self.queue.max_attempts == 0 {
            return Err(ReelError::config("queue.max_attempts", "must be at least 1"));
        }
        if self.queue.lease_ttl_secs <= 0 {
            return Err(ReelError::config("queue.lease_ttl_secs", "must be positive"));
        }
        if self.worker.parallelism == 0 {
            return Err(ReelError::config("worker.parallelism", "must be at least 1"));
        }
        Ok(())
    }
}
