//! Primer and generation windows for one stage.
//!
//! The primer is rounded up to a whole number of steps so generation always
//! starts on a step boundary. The primer window is then pulled back by a small
//! epsilon and the generation window extended by the same amount: generators
//! that begin on the *next* step after the window start would otherwise leave
//! a one-step gap between primer and generated material.

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};
use crate::sequence::Sequence;
use crate::timebase::TimeBase;

pub use chainconf::DEFAULT_BOUNDARY_EPSILON;

/// A time range in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start_time: f64,
    pub end_time: f64,
}

impl Window {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Everything computed for one stage before calling the generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowPlan {
    /// Time base actually used: the primer's tempo wins over the caller's.
    pub time_base: TimeBase,
    pub seconds_per_step: f64,
    pub total_length_steps: u64,
    pub primer_length_steps: u64,
    pub primer_length_time: f64,
    pub epsilon: f64,
    pub primer_window: Window,
    pub generation_length_steps: u64,
    pub generation_length_time: f64,
    pub generation_window: Window,
}

/// Computes stage windows. Pure: the only state is the boundary epsilon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowCalculator {
    boundary_epsilon: f64,
}

impl Default for WindowCalculator {
    fn default() -> Self {
        Self {
            boundary_epsilon: DEFAULT_BOUNDARY_EPSILON,
        }
    }
}

impl WindowCalculator {
    /// Calculator with a custom boundary epsilon. Negative or non-finite values become zero.
    pub fn with_epsilon(boundary_epsilon: f64) -> Self {
        let boundary_epsilon = if boundary_epsilon.is_finite() {
            boundary_epsilon.max(0.0)
        } else {
            0.0
        };
        Self { boundary_epsilon }
    }

    pub fn boundary_epsilon(&self) -> f64 {
        self.boundary_epsilon
    }

    /// Tempo to use for a stage: the primer's single tempo, else the caller's.
    pub fn effective_time_base(&self, primer: &Sequence, requested: TimeBase) -> Result<TimeBase> {
        match primer.tempos.as_slice() {
            [] => requested.with_qpm(requested.qpm),
            [tempo] => requested.with_qpm(tempo.qpm),
            tempos => Err(ChainError::MultipleTempos {
                count: tempos.len(),
            }),
        }
    }

    /// Compute the primer and generation windows for a stage of `total_length_steps`.
    pub fn plan(
        &self,
        primer: &Sequence,
        requested: TimeBase,
        total_length_steps: u64,
    ) -> Result<WindowPlan> {
        let time_base = self.effective_time_base(primer, requested)?;
        let seconds_per_step = time_base.seconds_per_step()?;

        let primer_length_steps = (primer.total_time.max(0.0) / seconds_per_step).ceil() as u64;
        let primer_length_time = primer_length_steps as f64 * seconds_per_step;

        let epsilon = if primer_length_time > 0.0 {
            self.boundary_epsilon
        } else {
            0.0
        };

        let primer_window = Window {
            start_time: 0.0,
            end_time: primer_length_time - epsilon,
        };

        if total_length_steps <= primer_length_steps {
            return Err(ChainError::InsufficientLength {
                total_steps: total_length_steps,
                primer_steps: primer_length_steps,
            });
        }
        let generation_length_steps = total_length_steps - primer_length_steps;
        let generation_length_time = generation_length_steps as f64 * seconds_per_step;

        let generation_window = Window {
            start_time: primer_window.end_time,
            end_time: primer_window.end_time + generation_length_time + epsilon,
        };

        tracing::debug!(
            qpm = time_base.qpm,
            steps_per_quarter = time_base.steps_per_quarter,
            primer.start = primer_window.start_time,
            primer.end = primer_window.end_time,
            generation.start = generation_window.start_time,
            generation.end = generation_window.end_time,
            "planned stage windows"
        );

        Ok(WindowPlan {
            time_base,
            seconds_per_step,
            total_length_steps,
            primer_length_steps,
            primer_length_time,
            epsilon,
            primer_window,
            generation_length_steps,
            generation_length_time,
            generation_window,
        })
    }
}
