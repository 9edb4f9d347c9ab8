//! Runs a schedule stage by stage.
//!
//! Each stage walks `Pending → ResolvingPrimer → Windowing → Generating →
//! Persisting → Done`, or drops to `Failed` from wherever it was. The first
//! failure ends the chain; artifacts persisted before it stay on disk and are
//! listed in the [`ChainReport`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{
    ArtifactRef, ArtifactSink, BundleResolver, GenerationOptions, GenerationRequest, Generator,
    PrimerSource,
};
use crate::error::{ChainError, Result};
use crate::schedule::{PrimerRef, Schedule, StageDescriptor};
use crate::sequence::Sequence;
use crate::window::{WindowCalculator, WindowPlan};

/// Where a stage is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    ResolvingPrimer,
    Windowing,
    Generating,
    Persisting,
    Done,
    Failed,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageState::Pending => "pending",
            StageState::ResolvingPrimer => "resolving_primer",
            StageState::Windowing => "windowing",
            StageState::Generating => "generating",
            StageState::Persisting => "persisting",
            StageState::Done => "done",
            StageState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress reported to a [`StageObserver`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    Started {
        index: usize,
        output_name: String,
        bundle_id: String,
    },
    StateChanged {
        index: usize,
        state: StageState,
    },
    Succeeded {
        index: usize,
        artifact: ArtifactRef,
        elapsed: Duration,
    },
    Failed {
        index: usize,
        state: StageState,
        error: String,
    },
}

/// Receives stage events as they happen.
pub trait StageObserver: Send + Sync {
    fn on_event(&self, event: &StageEvent);
}

/// Writes stage events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn on_event(&self, event: &StageEvent) {
        match event {
            StageEvent::Started {
                index,
                output_name,
                bundle_id,
            } => tracing::info!(
                stage.index = index,
                stage.output = %output_name,
                stage.bundle = %bundle_id,
                "Stage started"
            ),
            StageEvent::StateChanged { index, state } => {
                tracing::debug!(stage.index = index, stage.state = %state, "Stage state changed")
            }
            StageEvent::Succeeded {
                index,
                artifact,
                elapsed,
            } => tracing::info!(
                stage.index = index,
                stage.output = %artifact.path.display(),
                stage.notes = artifact.note_count,
                stage.duration_secs = elapsed.as_secs_f64(),
                "Stage completed successfully"
            ),
            StageEvent::Failed { index, state, error } => tracing::error!(
                stage.index = index,
                stage.state = %state,
                stage.error = %error,
                "Stage failed"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StageEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl StageObserver for RecordingObserver {
    fn on_event(&self, event: &StageEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// A stage that finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub index: usize,
    pub output_name: String,
    pub artifact: ArtifactRef,
    pub plan: WindowPlan,
    pub elapsed: Duration,
}

/// The stage that stopped the chain.
#[derive(Debug)]
pub struct StageFailure {
    pub index: usize,
    pub output_name: String,
    pub error: ChainError,
}

/// Result of a run: everything that completed, plus the failure if any.
#[derive(Debug, Default)]
pub struct ChainReport {
    pub completed: Vec<StageOutcome>,
    pub failure: Option<StageFailure>,
}

impl ChainReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The outcomes, or the error that stopped the chain.
    pub fn into_result(self) -> Result<Vec<StageOutcome>> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self.completed),
        }
    }
}

/// What `preview` can say about a stage without running anything.
#[derive(Debug)]
pub struct StagePreview {
    pub index: usize,
    pub output_name: String,
    pub primer_source: PrimerRef,
    pub total_length_steps: u64,
    /// `None` when the primer is produced by an earlier stage.
    pub plan: Option<Result<WindowPlan>>,
}

/// Sequential, fail-fast chain runner.
pub struct ChainOrchestrator {
    primers: Arc<dyn PrimerSource>,
    generator: Arc<dyn Generator>,
    sink: Arc<dyn ArtifactSink>,
    bundles: Arc<dyn BundleResolver>,
    windows: WindowCalculator,
    observer: Arc<dyn StageObserver>,
    cancel: CancellationToken,
}

impl ChainOrchestrator {
    pub fn new(
        primers: Arc<dyn PrimerSource>,
        generator: Arc<dyn Generator>,
        sink: Arc<dyn ArtifactSink>,
        bundles: Arc<dyn BundleResolver>,
    ) -> Self {
        Self {
            primers,
            generator,
            sink,
            bundles,
            windows: WindowCalculator::default(),
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_window_calculator(mut self, windows: WindowCalculator) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the chain before its next stage starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every stage in order, stopping at the first failure.
    #[tracing::instrument(skip_all, fields(stages = schedule.len()))]
    pub async fn run(&self, schedule: &Schedule) -> ChainReport {
        let mut report = ChainReport::default();

        for (index, stage) in schedule.stages().iter().enumerate() {
            if self.cancel.is_cancelled() {
                let error = ChainError::Cancelled { stage: index };
                self.observer.on_event(&StageEvent::Failed {
                    index,
                    state: StageState::Pending,
                    error: error.to_string(),
                });
                report.failure = Some(StageFailure {
                    index,
                    output_name: stage.output_name.clone(),
                    error,
                });
                break;
            }

            self.observer.on_event(&StageEvent::Started {
                index,
                output_name: stage.output_name.clone(),
                bundle_id: stage.bundle_id.clone(),
            });

            let started = Instant::now();
            let mut state = StageState::Pending;
            match self.run_stage(index, stage, &report.completed, &mut state).await {
                Ok((artifact, plan)) => {
                    self.transition(index, &mut state, StageState::Done);
                    let elapsed = started.elapsed();
                    self.observer.on_event(&StageEvent::Succeeded {
                        index,
                        artifact: artifact.clone(),
                        elapsed,
                    });
                    report.completed.push(StageOutcome {
                        index,
                        output_name: stage.output_name.clone(),
                        artifact,
                        plan,
                        elapsed,
                    });
                }
                Err(error) => {
                    let failed_in = state;
                    self.transition(index, &mut state, StageState::Failed);
                    self.observer.on_event(&StageEvent::Failed {
                        index,
                        state: failed_in,
                        error: error.to_string(),
                    });
                    report.failure = Some(StageFailure {
                        index,
                        output_name: stage.output_name.clone(),
                        error,
                    });
                    break;
                }
            }
        }

        tracing::info!(
            completed = report.completed.len(),
            failed = report.failure.is_some(),
            "Chain finished"
        );
        report
    }

    async fn run_stage(
        &self,
        index: usize,
        stage: &StageDescriptor,
        completed: &[StageOutcome],
        state: &mut StageState,
    ) -> Result<(ArtifactRef, WindowPlan)> {
        self.transition(index, state, StageState::ResolvingPrimer);
        let primer = self.resolve_primer(&stage.primer_source, completed).await?;

        self.transition(index, state, StageState::Windowing);
        let plan = self
            .windows
            .plan(&primer, stage.time_base, stage.total_length_steps)?;

        let bundle = self.bundles.resolve_bundle(&stage.bundle_id).await?;
        let options = GenerationOptions {
            temperature: stage.temperature,
            beam_size: stage.beam_size,
            branch_factor: stage.branch_factor,
            steps_per_iteration: stage.steps_per_iteration,
            condition_on_primer: stage.condition_on_primer,
            suppress_primer_injection: !stage.inject_primer,
            window: plan.generation_window,
        };

        self.transition(index, state, StageState::Generating);
        let generated = self
            .generator
            .generate(GenerationRequest {
                stage: index,
                bundle: &bundle,
                generator_id: &stage.generator_id,
                primer: &primer,
                time_base: plan.time_base,
                options: &options,
            })
            .await
            .map_err(|e| match e {
                ChainError::Generation { .. } => e,
                other => ChainError::Generation {
                    stage: index,
                    message: other.to_string(),
                },
            })?;

        self.transition(index, state, StageState::Persisting);
        let artifact = self.sink.persist(&generated, &stage.output_name).await?;

        Ok((artifact, plan))
    }

    /// Earlier stages prime from their artifact as persisted, not the generator's raw output.
    async fn resolve_primer(
        &self,
        source: &PrimerRef,
        completed: &[StageOutcome],
    ) -> Result<Sequence> {
        match source {
            PrimerRef::Empty => Ok(Sequence::empty()),
            PrimerRef::File(name) => self.primers.load_primer(name).await,
            PrimerRef::Stage(source) => {
                let outcome = completed
                    .iter()
                    .find(|outcome| outcome.index == *source)
                    .ok_or_else(|| ChainError::NotFound {
                        reference: format!("output of stage {source}"),
                    })?;
                self.sink.load_artifact(&outcome.artifact).await
            }
        }
    }

    fn transition(&self, index: usize, current: &mut StageState, next: StageState) {
        *current = next;
        self.observer.on_event(&StageEvent::StateChanged { index, state: next });
    }

    /// Window plans for every stage whose primer exists before the run.
    pub async fn preview(&self, schedule: &Schedule) -> Vec<StagePreview> {
        let mut previews = Vec::with_capacity(schedule.len());
        for (index, stage) in schedule.stages().iter().enumerate() {
            let plan = match &stage.primer_source {
                PrimerRef::Stage(_) => None,
                source => Some(match self.resolve_primer(source, &[]).await {
                    Ok(primer) => self
                        .windows
                        .plan(&primer, stage.time_base, stage.total_length_steps),
                    Err(e) => Err(e),
                }),
            };
            previews.push(StagePreview {
                index,
                output_name: stage.output_name.clone(),
                primer_source: stage.primer_source.clone(),
                total_length_steps: stage.total_length_steps,
                plan,
            });
        }
        previews
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::BundleHandle;
    use crate::midi;
    use crate::schedule::{ScheduleDefaults, StageSpec};
    use crate::sequence::Note;
    use crate::storage::FileStorage;
    use crate::timebase::TimeBase;
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct MapPrimers(HashMap<String, Sequence>);

    #[async_trait]
    impl PrimerSource for MapPrimers {
        async fn load_primer(&self, name: &str) -> Result<Sequence> {
            self.0.get(name).cloned().ok_or_else(|| ChainError::NotFound {
                reference: name.to_string(),
            })
        }
    }

    /// Returns a single note filling the requested window, and records every call.
    #[derive(Default)]
    struct WindowEcho {
        calls: Mutex<Vec<(usize, GenerationOptions, f64)>>,
        time_bases: Mutex<Vec<TimeBase>>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl Generator for WindowEcho {
        async fn generate(&self, request: GenerationRequest<'_>) -> Result<Sequence> {
            self.calls
                .lock()
                .unwrap()
                .push((request.stage, *request.options, request.primer.total_time));
            self.time_bases.lock().unwrap().push(request.time_base);
            if self.fail_at == Some(request.stage) {
                return Err(ChainError::Midi("model crashed".to_string()));
            }
            let window = request.options.window;
            let mut notes = request.primer.notes.clone();
            notes.push(Note::new(72, 90, window.start_time, window.end_time));
            Ok(Sequence::from_notes(notes))
        }
    }

    /// Keeps artifacts as the MIDI codec would write them.
    #[derive(Default)]
    struct MemorySink {
        names: Mutex<Vec<String>>,
        stored: Mutex<HashMap<String, Sequence>>,
    }

    #[async_trait]
    impl ArtifactSink for MemorySink {
        async fn persist(&self, sequence: &Sequence, name: &str) -> Result<ArtifactRef> {
            let written = midi::decode(&midi::encode(sequence)?)?;
            self.names.lock().unwrap().push(name.to_string());
            self.stored.lock().unwrap().insert(name.to_string(), written);
            Ok(ArtifactRef {
                name: name.to_string(),
                path: name.into(),
                created_at: Utc::now(),
                note_count: sequence.notes.len(),
            })
        }

        async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Sequence> {
            self.stored
                .lock()
                .unwrap()
                .get(&artifact.name)
                .cloned()
                .ok_or_else(|| ChainError::NotFound {
                    reference: artifact.name.clone(),
                })
        }
    }

    /// Ends its first stage between MIDI ticks, like a model writing at another resolution.
    struct OffGridModel;

    #[async_trait]
    impl Generator for OffGridModel {
        async fn generate(&self, request: GenerationRequest<'_>) -> Result<Sequence> {
            let mut notes = request.primer.notes.clone();
            if request.stage == 0 {
                notes.push(Note::new(60, 90, 0.0, 447.0 / 440.0));
            } else {
                let window = request.options.window;
                notes.push(Note::new(64, 90, window.start_time, window.end_time));
            }
            Ok(Sequence::from_notes(notes))
        }
    }

    /// Cancels the run from inside the first generation call.
    struct CancelDuringStage(CancellationToken);

    #[async_trait]
    impl Generator for CancelDuringStage {
        async fn generate(&self, request: GenerationRequest<'_>) -> Result<Sequence> {
            self.0.cancel();
            let window = request.options.window;
            Ok(Sequence::from_notes(vec![Note::new(60, 90, window.start_time, window.end_time)]))
        }
    }

    struct AnyBundle;

    #[async_trait]
    impl BundleResolver for AnyBundle {
        async fn resolve_bundle(&self, name: &str) -> Result<BundleHandle> {
            Ok(BundleHandle {
                name: name.to_string(),
                path: name.into(),
            })
        }
    }

    fn orchestrator(
        primers: HashMap<String, Sequence>,
        generator: Arc<WindowEcho>,
        sink: Arc<MemorySink>,
        observer: Arc<RecordingObserver>,
    ) -> ChainOrchestrator {
        ChainOrchestrator::new(Arc::new(MapPrimers(primers)), generator, sink, Arc::new(AnyBundle))
            .with_observer(observer)
    }

    fn two_stage_schedule() -> Schedule {
        Schedule::from_specs(
            vec![
                StageSpec::new("a.mag", "one.mid", 1, 4),
                StageSpec::new("b.mag", "two.mid", 1, 4).with_primer("one.mid"),
            ],
            &ScheduleDefaults::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_chain_feeds_output_forward() {
        let generator = Arc::new(WindowEcho::default());
        let sink = Arc::new(MemorySink::default());
        let observer = Arc::new(RecordingObserver::new());
        let chain = orchestrator(HashMap::new(), generator.clone(), sink.clone(), observer.clone());

        let report = chain.run(&two_stage_schedule()).await;
        assert!(report.is_success());
        assert_eq!(report.completed.len(), 2);
        assert_eq!(*sink.names.lock().unwrap(), vec!["one.mid".to_string(), "two.mid".to_string()]);

        let calls = generator.calls.lock().unwrap().clone();
        // Stage 0: 1 bar of 4 spq at 120 qpm, empty primer
        assert_eq!(calls[0].1.window.start_time, 0.0);
        assert_eq!(calls[0].1.window.end_time, 2.0);
        assert!(calls[0].1.suppress_primer_injection);
        // Stage 1 is primed by stage 0's 2 seconds and extends to 2 bars
        assert_eq!(calls[1].2, 2.0);
        assert!((calls[1].1.window.start_time - 1.99999).abs() < 1e-9);
        assert!((calls[1].1.window.end_time - 4.0).abs() < 1e-9);

        let plan = &report.completed[1].plan;
        assert_eq!(plan.primer_length_steps, 16);
        assert_eq!(plan.generation_length_steps, 16);
    }

    #[tokio::test]
    async fn test_state_sequence_for_successful_stage() {
        let generator = Arc::new(WindowEcho::default());
        let observer = Arc::new(RecordingObserver::new());
        let chain = orchestrator(
            HashMap::new(),
            generator,
            Arc::new(MemorySink::default()),
            observer.clone(),
        );
        let schedule = Schedule::from_specs(
            vec![StageSpec::new("a.mag", "x.mid", 1, 4)],
            &ScheduleDefaults::default(),
        )
        .unwrap();
        chain.run(&schedule).await;

        let states: Vec<StageState> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                StageEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                StageState::ResolvingPrimer,
                StageState::Windowing,
                StageState::Generating,
                StageState::Persisting,
                StageState::Done,
            ]
        );
        assert!(matches!(observer.events()[0], StageEvent::Started { index: 0, .. }));
        assert!(matches!(observer.events().last(), Some(StageEvent::Succeeded { index: 0, .. })));
    }

    #[tokio::test]
    async fn test_generator_failure_stops_chain() {
        let generator = Arc::new(WindowEcho {
            fail_at: Some(1),
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let observer = Arc::new(RecordingObserver::new());
        let chain = orchestrator(HashMap::new(), generator.clone(), sink.clone(), observer.clone());

        let schedule = Schedule::from_specs(
            vec![
                StageSpec::new("a.mag", "one.mid", 1, 4),
                StageSpec::new("a.mag", "two.mid", 1, 4).with_primer("one.mid"),
                StageSpec::new("a.mag", "three.mid", 1, 4).with_primer("two.mid"),
            ],
            &ScheduleDefaults::default(),
        )
        .unwrap();
        let report = chain.run(&schedule).await;

        assert_eq!(report.completed.len(), 1);
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.index, 1);
        match &failure.error {
            ChainError::Generation { stage, message } => {
                assert_eq!(*stage, 1);
                assert!(message.contains("model crashed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Nothing after the failed stage ran or was written
        assert_eq!(generator.calls.lock().unwrap().len(), 2);
        assert_eq!(*sink.names.lock().unwrap(), vec!["one.mid".to_string()]);
        assert!(matches!(
            observer.events().last(),
            Some(StageEvent::Failed {
                index: 1,
                state: StageState::Generating,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_insufficient_length_is_reported_before_generation() {
        let mut primers = HashMap::new();
        primers.insert(
            "long.mid".to_string(),
            Sequence::from_notes(vec![Note::new(60, 90, 0.0, 2.0)]).with_tempo(120.0),
        );
        let generator = Arc::new(WindowEcho::default());
        let chain = orchestrator(
            primers,
            generator.clone(),
            Arc::new(MemorySink::default()),
            Arc::new(RecordingObserver::new()),
        );
        // One bar of 4 spq is 16 steps, exactly the primer
        let schedule = Schedule::from_specs(
            vec![StageSpec::new("a.mag", "x.mid", 1, 4).with_primer("long.mid")],
            &ScheduleDefaults::default(),
        )
        .unwrap();

        let err = chain.run(&schedule).await.into_result().unwrap_err();
        assert!(matches!(
            err,
            ChainError::InsufficientLength {
                total_steps: 16,
                primer_steps: 16
            }
        ));
        assert!(generator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_primer_file() {
        let chain = orchestrator(
            HashMap::new(),
            Arc::new(WindowEcho::default()),
            Arc::new(MemorySink::default()),
            Arc::new(RecordingObserver::new()),
        );
        let schedule = Schedule::from_specs(
            vec![StageSpec::new("a.mag", "x.mid", 1, 4).with_primer("seed.mid")],
            &ScheduleDefaults::default(),
        )
        .unwrap();
        let report = chain.run(&schedule).await;
        assert!(matches!(
            report.failure.map(|f| f.error),
            Some(ChainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let generator = Arc::new(WindowEcho::default());
        let chain = orchestrator(
            HashMap::new(),
            generator.clone(),
            Arc::new(MemorySink::default()),
            Arc::new(RecordingObserver::new()),
        );
        chain.cancellation_token().cancel();

        let report = chain.run(&two_stage_schedule()).await;
        assert!(report.completed.is_empty());
        assert!(matches!(
            report.failure.map(|f| f.error),
            Some(ChainError::Cancelled { stage: 0 })
        ));
        assert!(generator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_stage_lets_it_finish() {
        let cancel = CancellationToken::new();
        let sink = Arc::new(MemorySink::default());
        let chain = ChainOrchestrator::new(
            Arc::new(MapPrimers(HashMap::new())),
            Arc::new(CancelDuringStage(cancel.clone())),
            sink.clone(),
            Arc::new(AnyBundle),
        )
        .with_observer(Arc::new(RecordingObserver::new()))
        .with_cancellation(cancel);

        let report = chain.run(&two_stage_schedule()).await;

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].output_name, "one.mid");
        assert_eq!(*sink.names.lock().unwrap(), vec!["one.mid".to_string()]);
        let failure = report.failure.unwrap();
        assert_eq!(failure.index, 1);
        assert!(matches!(failure.error, ChainError::Cancelled { stage: 1 }));
    }

    #[tokio::test]
    async fn test_chained_primer_is_the_persisted_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path(), dir.path()));
        let chain = ChainOrchestrator::new(
            storage.clone(),
            Arc::new(OffGridModel),
            storage,
            Arc::new(AnyBundle),
        )
        .with_observer(Arc::new(RecordingObserver::new()));
        let schedule = Schedule::from_specs(
            vec![
                StageSpec::new("a.mag", "one.mid", 1, 32),
                StageSpec::new("a.mag", "two.mid", 1, 32).with_primer("one.mid"),
            ],
            &ScheduleDefaults::default(),
        )
        .unwrap();

        let report = chain.run(&schedule).await;
        assert!(report.is_success(), "{:?}", report.failure);

        // 447/440 s is 65.02 steps raw, but the file stores tick 975 = 1.015625 s = 65 steps.
        let on_disk = midi::decode(&std::fs::read(dir.path().join("one.mid")).unwrap()).unwrap();
        assert_eq!(on_disk.total_time, 1.015625);
        let plan = &report.completed[1].plan;
        assert_eq!(plan.primer_length_steps, 65);
        assert_eq!(plan.generation_length_steps, 256 - 65);
        assert!((plan.generation_window.start_time - (1.015625 - 1e-5)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_generator_receives_effective_time_base() {
        let mut primers = HashMap::new();
        primers.insert(
            "slow.mid".to_string(),
            Sequence::from_notes(vec![Note::new(60, 90, 0.0, 1.0)]).with_tempo(60.0),
        );
        let generator = Arc::new(WindowEcho::default());
        let chain = orchestrator(
            primers,
            generator.clone(),
            Arc::new(MemorySink::default()),
            Arc::new(RecordingObserver::new()),
        );
        let schedule = Schedule::from_specs(
            vec![StageSpec::new("a.mag", "x.mid", 2, 16).with_primer("slow.mid")],
            &ScheduleDefaults::default(),
        )
        .unwrap();

        assert!(chain.run(&schedule).await.is_success());
        assert_eq!(*generator.time_bases.lock().unwrap(), vec![TimeBase::new(60.0, 16).unwrap()]);
    }

    #[tokio::test]
    async fn test_preview_plans_only_known_primers() {
        let chain = orchestrator(
            HashMap::new(),
            Arc::new(WindowEcho::default()),
            Arc::new(MemorySink::default()),
            Arc::new(RecordingObserver::new()),
        );
        let previews = chain.preview(&two_stage_schedule()).await;
        assert_eq!(previews.len(), 2);

        let first = previews[0].plan.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(first.generation_length_steps, 16);
        assert!(previews[1].plan.is_none());
        assert_eq!(previews[1].primer_source, PrimerRef::Stage(0));
    }
}
