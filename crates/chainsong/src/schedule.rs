//! Stage descriptors and the validated, ordered schedule.
//!
//! A schedule is written either as a list of `[[stage]]` records or as
//! parallel per-field columns. Either way it is turned into a [`Schedule`]
//! and validated completely before the first stage runs.
//!
//! Lengths are given in bars and accumulate: a stage's total length covers all
//! bars of the stages before it plus its own, because its primer already
//! contains the earlier material.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};
use crate::timebase::TimeBase;

/// Where a stage gets its primer from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimerRef {
    /// Start from silence.
    Empty,
    /// A fixed file from the primer directory.
    File(String),
    /// The persisted output of an earlier stage.
    Stage(usize),
}

/// Everything one generation stage needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub bundle_id: String,
    pub generator_id: String,
    pub primer_source: PrimerRef,
    /// Primer plus generated material, in steps.
    pub total_length_steps: u64,
    /// Requested time base; a primer tempo replaces the qpm at run time.
    pub time_base: TimeBase,
    pub condition_on_primer: bool,
    pub inject_primer: bool,
    pub temperature: f64,
    pub beam_size: u32,
    pub branch_factor: u32,
    pub steps_per_iteration: u32,
    pub output_name: String,
}

/// Values a stage inherits when the schedule does not set them.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDefaults {
    pub generator_id: String,
    pub qpm: f64,
}

impl Default for ScheduleDefaults {
    fn default() -> Self {
        let defaults = chainconf::DefaultsConfig::default();
        Self {
            generator_id: defaults.generator_id,
            qpm: defaults.qpm,
        }
    }
}

impl From<&chainconf::DefaultsConfig> for ScheduleDefaults {
    fn from(config: &chainconf::DefaultsConfig) -> Self {
        Self {
            generator_id: config.generator_id.clone(),
            qpm: config.qpm,
        }
    }
}

fn default_temperature() -> f64 {
    1.0
}

fn default_one() -> u32 {
    1
}

/// One stage as written in a schedule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub bundle: String,
    pub output: String,
    /// Primer file name; an earlier stage's output name chains to that stage.
    #[serde(default)]
    pub primer: Option<String>,
    /// Bars this stage adds.
    pub bars: u64,
    pub steps_per_quarter: u32,
    #[serde(default)]
    pub condition_on_primer: bool,
    #[serde(default)]
    pub inject_primer: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub generator: Option<String>,
    #[serde(default = "default_one")]
    pub beam_size: u32,
    #[serde(default = "default_one")]
    pub branch_factor: u32,
    #[serde(default = "default_one")]
    pub steps_per_iteration: u32,
    #[serde(default)]
    pub qpm: Option<f64>,
}

impl StageSpec {
    pub fn new(
        bundle: impl Into<String>,
        output: impl Into<String>,
        bars: u64,
        steps_per_quarter: u32,
    ) -> Self {
        Self {
            bundle: bundle.into(),
            output: output.into(),
            primer: None,
            bars,
            steps_per_quarter,
            condition_on_primer: false,
            inject_primer: false,
            temperature: default_temperature(),
            generator: None,
            beam_size: 1,
            branch_factor: 1,
            steps_per_iteration: 1,
            qpm: None,
        }
    }

    /// Builder: set the primer file or earlier output name.
    pub fn with_primer(mut self, primer: impl Into<String>) -> Self {
        self.primer = Some(primer.into());
        self
    }
}

/// The column form: one array per field, indexed by stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleColumns {
    pub bundles: Vec<String>,
    pub outputs: Vec<String>,
    /// Empty string means no primer.
    pub primers: Vec<String>,
    pub bars: Vec<u64>,
    pub steps_per_quarter: Vec<u32>,
    pub conditions: Vec<bool>,
    pub injections: Vec<bool>,
    pub temperatures: Vec<f64>,
}

impl ScheduleColumns {
    /// Zip the columns into stage records. All columns must have the same length.
    pub fn into_specs(self) -> Result<Vec<StageSpec>> {
        let lengths = [
            ("bundles", self.bundles.len()),
            ("outputs", self.outputs.len()),
            ("primers", self.primers.len()),
            ("bars", self.bars.len()),
            ("steps_per_quarter", self.steps_per_quarter.len()),
            ("conditions", self.conditions.len()),
            ("injections", self.injections.len()),
            ("temperatures", self.temperatures.len()),
        ];
        let expected = lengths[0].1;
        if lengths.iter().any(|(_, len)| *len != expected) {
            let detail = lengths
                .iter()
                .map(|(name, len)| format!("{name}={len}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ChainError::InvalidSchedule(format!(
                "schedule columns have different lengths ({detail})"
            )));
        }

        let mut specs = Vec::with_capacity(expected);
        for i in 0..expected {
            let mut spec = StageSpec::new(
                self.bundles[i].clone(),
                self.outputs[i].clone(),
                self.bars[i],
                self.steps_per_quarter[i],
            );
            if !self.primers[i].is_empty() {
                spec.primer = Some(self.primers[i].clone());
            }
            spec.condition_on_primer = self.conditions[i];
            spec.inject_primer = self.injections[i];
            spec.temperature = self.temperatures[i];
            specs.push(spec);
        }
        Ok(specs)
    }
}

/// On-disk schedule file (TOML).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFile {
    /// Generator id for stages that do not name one.
    #[serde(default)]
    pub generator: Option<String>,
    /// Tempo for stages that neither set one nor inherit one from their primer.
    #[serde(default)]
    pub qpm: Option<f64>,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub columns: Option<ScheduleColumns>,
}

/// An ordered, validated list of stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    stages: Vec<StageDescriptor>,
}

impl Schedule {
    /// Validate descriptors and build a schedule.
    pub fn new(stages: Vec<StageDescriptor>) -> Result<Self> {
        validate(&stages)?;
        Ok(Self { stages })
    }

    /// Build from stage records, accumulating bars into total step lengths
    /// and resolving primer names against earlier outputs.
    pub fn from_specs(specs: Vec<StageSpec>, defaults: &ScheduleDefaults) -> Result<Self> {
        let mut stages: Vec<StageDescriptor> = Vec::with_capacity(specs.len());
        let mut cumulative_bars: u64 = 0;

        for (index, spec) in specs.into_iter().enumerate() {
            if spec.bars == 0 {
                return Err(ChainError::InvalidSchedule(format!(
                    "stage {index} ({}): bars must be at least 1",
                    spec.output
                )));
            }
            cumulative_bars = cumulative_bars.checked_add(spec.bars).ok_or_else(|| {
                ChainError::InvalidSchedule(format!(
                    "stage {index} ({}): cumulative bar count overflows",
                    spec.output
                ))
            })?;

            let time_base = TimeBase::new(spec.qpm.unwrap_or(defaults.qpm), spec.steps_per_quarter)
                .map_err(|e| {
                    ChainError::InvalidSchedule(format!("stage {index} ({}): {e}", spec.output))
                })?;
            let total_length_steps = time_base.steps_for_bars(cumulative_bars).ok_or_else(|| {
                ChainError::InvalidSchedule(format!(
                    "stage {index} ({}): {cumulative_bars} bars at {} steps per quarter overflows",
                    spec.output, spec.steps_per_quarter
                ))
            })?;

            let primer_source = match spec.primer.as_deref() {
                None | Some("") => PrimerRef::Empty,
                Some(name) => match stages.iter().rposition(|s| s.output_name == name) {
                    Some(earlier) => PrimerRef::Stage(earlier),
                    None => PrimerRef::File(name.to_string()),
                },
            };

            stages.push(StageDescriptor {
                bundle_id: spec.bundle,
                generator_id: spec.generator.unwrap_or_else(|| defaults.generator_id.clone()),
                primer_source,
                total_length_steps,
                time_base,
                condition_on_primer: spec.condition_on_primer,
                inject_primer: spec.inject_primer,
                temperature: spec.temperature,
                beam_size: spec.beam_size,
                branch_factor: spec.branch_factor,
                steps_per_iteration: spec.steps_per_iteration,
                output_name: spec.output,
            });
        }

        Self::new(stages)
    }

    /// Build from a parsed schedule file.
    pub fn from_file(file: ScheduleFile, defaults: &ScheduleDefaults) -> Result<Self> {
        let defaults = ScheduleDefaults {
            generator_id: file.generator.unwrap_or_else(|| defaults.generator_id.clone()),
            qpm: file.qpm.unwrap_or(defaults.qpm),
        };
        let specs = match (file.stages.is_empty(), file.columns) {
            (true, Some(columns)) => columns.into_specs()?,
            (false, None) => file.stages,
            (false, Some(_)) => {
                return Err(ChainError::InvalidSchedule(
                    "use either [[stage]] records or a [columns] table, not both".to_string(),
                ))
            }
            (true, None) => Vec::new(),
        };
        Self::from_specs(specs, &defaults)
    }

    /// Parse TOML schedule text.
    pub fn from_toml(contents: &str, defaults: &ScheduleDefaults) -> Result<Self> {
        let file: ScheduleFile = toml::from_str(contents)
            .map_err(|e| ChainError::InvalidSchedule(format!("failed to parse schedule: {e}")))?;
        Self::from_file(file, defaults)
    }

    /// Read and parse a TOML schedule file.
    pub fn load(path: &Path, defaults: &ScheduleDefaults) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChainError::NotFound {
                    reference: path.display().to_string(),
                }
            } else {
                ChainError::storage(path, e)
            }
        })?;
        Self::from_toml(&contents, defaults)
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

fn validate(stages: &[StageDescriptor]) -> Result<()> {
    if stages.is_empty() {
        return Err(ChainError::InvalidSchedule("schedule has no stages".to_string()));
    }

    let invalid = |index: usize, stage: &StageDescriptor, message: String| {
        ChainError::InvalidSchedule(format!("stage {index} ({}): {message}", stage.output_name))
    };

    let outputs: HashSet<&str> = stages.iter().map(|s| s.output_name.as_str()).collect();
    let mut seen = HashSet::new();

    for (index, stage) in stages.iter().enumerate() {
        if stage.output_name.trim().is_empty() {
            return Err(invalid(index, stage, "output name is empty".to_string()));
        }
        if !seen.insert(stage.output_name.as_str()) {
            return Err(invalid(
                index,
                stage,
                "output name is used by an earlier stage and would be overwritten".to_string(),
            ));
        }
        if stage.bundle_id.trim().is_empty() {
            return Err(invalid(index, stage, "bundle is empty".to_string()));
        }
        if stage.generator_id.trim().is_empty() {
            return Err(invalid(index, stage, "generator id is empty".to_string()));
        }
        stage
            .time_base
            .seconds_per_step()
            .map_err(|e| invalid(index, stage, e.to_string()))?;
        if stage.total_length_steps == 0 {
            return Err(invalid(index, stage, "total length must be at least one step".to_string()));
        }
        if !(stage.temperature.is_finite() && stage.temperature > 0.0) {
            return Err(invalid(
                index,
                stage,
                format!("temperature must be > 0, got {}", stage.temperature),
            ));
        }
        for (name, value) in [
            ("beam_size", stage.beam_size),
            ("branch_factor", stage.branch_factor),
            ("steps_per_iteration", stage.steps_per_iteration),
        ] {
            if value == 0 {
                return Err(invalid(index, stage, format!("{name} must be at least 1")));
            }
        }
        match &stage.primer_source {
            PrimerRef::Empty => {}
            PrimerRef::Stage(source) if *source >= index => {
                return Err(invalid(
                    index,
                    stage,
                    format!("primer refers to stage {source}, which has not run yet"),
                ));
            }
            PrimerRef::Stage(_) => {}
            PrimerRef::File(name) if outputs.contains(name.as_str()) => {
                return Err(invalid(
                    index,
                    stage,
                    format!(
                        "primer file {name} is also a stage output; reference the stage instead"
                    ),
                ));
            }
            PrimerRef::File(_) => {}
        }
    }

    Ok(())
}
