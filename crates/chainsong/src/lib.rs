//! Chained, primer-seeded MIDI generation.
//!
//! A [`Schedule`] lists stages. Each stage continues a primer (silence, a
//! fixed MIDI file, or the output of an earlier stage) with a sequence model
//! and persists the result. The [`WindowCalculator`] works out exactly which
//! span of time the model must fill so that consecutive stages line up on
//! step boundaries, and the [`ChainOrchestrator`] runs the stages in order,
//! stopping at the first failure.
//!
//! The orchestrator reaches primers, models, bundles, and storage only
//! through the traits in [`capabilities`]. [`FileStorage`], [`BundleCache`]
//! and [`HttpGenerator`] are the filesystem and HTTP implementations.

pub mod bundles;
pub mod capabilities;
pub mod error;
pub mod midi;
pub mod orchestrator;
pub mod remote;
pub mod schedule;
pub mod sequence;
pub mod storage;
pub mod timebase;
pub mod window;

pub use bundles::BundleCache;
pub use capabilities::{
    ArtifactRef, ArtifactSink, BundleHandle, BundleResolver, GenerationOptions, GenerationRequest,
    Generator, PrimerSource,
};
pub use error::{ChainError, Result};
pub use orchestrator::{
    ChainOrchestrator, ChainReport, RecordingObserver, StageEvent, StageFailure, StageObserver,
    StageOutcome, StagePreview, StageState, TracingObserver,
};
pub use remote::HttpGenerator;
pub use schedule::{
    PrimerRef, Schedule, ScheduleColumns, ScheduleDefaults, ScheduleFile, StageDescriptor,
    StageSpec,
};
pub use sequence::{Note, Sequence, Tempo};
pub use storage::FileStorage;
pub use timebase::{seconds_per_step, TimeBase};
pub use window::{Window, WindowCalculator, WindowPlan, DEFAULT_BOUNDARY_EPSILON};
