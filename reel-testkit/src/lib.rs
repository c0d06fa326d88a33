//! In-memory fakes for exercising reel dispatchers, workers and the
//! aggregator without a render service, an object store or scene files,
//! plus a store wrapper that injects faults.

pub mod artifact;
pub mod compiler;
pub mod fixture;
pub mod render;
pub mod stager;
pub mod store;

pub use artifact::InMemoryArtifactStore;
pub use compiler::RecordingCompiler;
pub use fixture::{TestHarness, drain};
pub use render::{MockRenderer, png_frame};
pub use stager::{RecordingStager, StageRecord};
pub use store::{FlakyStore, StoreOp};
