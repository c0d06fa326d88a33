use async_trait::async_trait;
use parking_lot::Mutex;
use reel::*;
use std::sync::Arc;

/// One `compile` invocation.
#[derive(Clone, Debug)]
pub struct CompileRecord {
    pub job_id: JobId,
    pub frames: Vec<ObjectRef>,
    pub output: ObjectRef,
}

/// Compiler that records its input and writes the frame names, one per
/// line, as the output artifact.
#[derive(Clone)]
pub struct RecordingCompiler {
    artifacts: Arc<dyn ArtifactStore>,
    compiles: Arc<Mutex<Vec<CompileRecord>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingCompiler {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifacts,
            compiles: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn record(&self) -> Vec<CompileRecord> {
        self.compiles.lock().clone()
    }

    /// Compilations recorded for `job_id`.
    pub fn compiles_for(&self, job_id: JobId) -> usize {
        self.compiles
            .lock()
            .iter()
            .filter(|record| record.job_id == job_id)
            .count()
    }

    pub fn assert_compile_count_eq(&self, expected: usize) {
        assert_eq!(
            self.compiles.lock().len(),
            expected,
            "Expected {} compilations, got {}",
            expected,
            self.compiles.lock().len()
        );
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl ArtifactCompiler for RecordingCompiler {
    async fn compile(
        &self,
        job_id: JobId,
        frames: &[ObjectRef],
        output: &ObjectRef,
    ) -> Result<(), CompileError> {
        self.compiles.lock().push(CompileRecord {
            job_id,
            frames: frames.to_vec(),
            output: output.clone(),
        });

        if *self.fail.lock() {
            return Err(CompileError::Codec("mock compile failure".to_string()));
        }

        let manifest = frames
            .iter()
            .map(|frame| frame.name.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.artifacts
            .put(output, manifest.into_bytes(), "text/plain")
            .await?;
        Ok(())
    }
}
