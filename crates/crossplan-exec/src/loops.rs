//! Loop-head state machine for counted loops.

use serde::{Deserialize, Serialize};

use crossplan_core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    NotStarted,
    Running,
    Finished,
}

/// What one evaluation of a loop head emits: either the data for the next
/// iteration or the loop's final result, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutput<T> {
    pub iteration: Option<T>,
    pub final_output: Option<T>,
}

/// Head of a loop that runs its body a fixed number of times.
///
/// Evaluation k (1-based) consumes the initial input when k = 1 and the
/// feedback input after that. Evaluations 1..N-1 leave the loop running and
/// feed the body; evaluation N finishes it and emits the final output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatLoop {
    iterations: u32,
    evaluations: u32,
    state: LoopState,
}

impl RepeatLoop {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations,
            evaluations: 0,
            state: LoopState::NotStarted,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Completed evaluations so far.
    pub fn evaluations(&self) -> u32 {
        self.evaluations
    }

    /// Whether the next evaluation reads the initial input.
    pub fn wants_initial(&self) -> bool {
        self.state == LoopState::NotStarted
    }

    pub fn evaluate<T>(&mut self, initial: Option<T>, feedback: Option<T>) -> Result<LoopOutput<T>> {
        let input = match self.state {
            LoopState::Finished => {
                return Err(Error::Lifecycle(format!(
                    "loop already finished after {} evaluations",
                    self.evaluations
                )))
            }
            LoopState::NotStarted => initial
                .ok_or_else(|| Error::Lifecycle("first evaluation needs the initial input".into()))?,
            LoopState::Running => feedback
                .ok_or_else(|| Error::Lifecycle("running loop needs the feedback input".into()))?,
        };

        self.evaluations += 1;
        if self.evaluations >= self.iterations {
            self.state = LoopState::Finished;
            Ok(LoopOutput {
                iteration: None,
                final_output: Some(input),
            })
        } else {
            self.state = LoopState::Running;
            Ok(LoopOutput {
                iteration: Some(input),
                final_output: None,
            })
        }
    }

    /// Back to `NotStarted`, for a loop nested in another loop.
    pub fn reset(&mut self) {
        self.evaluations = 0;
        self.state = LoopState::NotStarted;
    }
}
