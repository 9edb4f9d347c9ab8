//! Seams between the orchestrator and the outside world.
//!
//! Primers, models, and artifacts are reached only through these traits, so
//! the chain logic runs the same against the filesystem and HTTP generator as
//! against in-memory fakes in tests.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sequence::Sequence;
use crate::timebase::TimeBase;
use crate::window::Window;

/// Sampling and conditioning knobs handed to a generator, plus the window to fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub beam_size: u32,
    pub branch_factor: u32,
    pub steps_per_iteration: u32,
    pub condition_on_primer: bool,
    /// Keep the primer out of the generated sequence.
    pub suppress_primer_injection: bool,
    pub window: Window,
}

/// A locally available model bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleHandle {
    pub name: String,
    pub path: PathBuf,
}

/// One generator invocation.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub stage: usize,
    pub bundle: &'a BundleHandle,
    pub generator_id: &'a str,
    pub primer: &'a Sequence,
    /// Tempo and step resolution the window was computed in.
    pub time_base: TimeBase,
    pub options: &'a GenerationOptions,
}

/// Where a persisted stage output ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub note_count: usize,
}

/// Loads fixed primer files by name.
#[async_trait]
pub trait PrimerSource: Send + Sync {
    /// Fails with `NotFound` when the name does not resolve.
    async fn load_primer(&self, name: &str) -> Result<Sequence>;
}

/// Runs a sequence model.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Sequence>;
}

/// Persists stage outputs and reads them back for later stages.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(&self, sequence: &Sequence, name: &str) -> Result<ArtifactRef>;

    /// The sequence exactly as persisted, which may differ from what was handed
    /// to `persist` once the storage format has quantized it.
    async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Sequence>;
}

/// Makes a named bundle available locally.
#[async_trait]
pub trait BundleResolver: Send + Sync {
    async fn resolve_bundle(&self, name: &str) -> Result<BundleHandle>;
}
