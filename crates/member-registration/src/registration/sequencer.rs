use serde::Serialize;
use tracing::debug;

use super::domain::{FieldMap, StepId};
use super::validation::{
    validate_confirmation, validate_contact, validate_family, validate_ministry,
    validate_personal, validate_pledge, ErrorMap, StepValidator, ValidationContext,
};

/// Rough time a visitor spends per page, used for the "about N minutes left" hint.
pub const MINUTES_PER_STEP: u32 = 2;

/// A wizard page and its validator.
#[derive(Debug, Clone, Copy)]
pub struct StepDefinition {
    pub id: StepId,
    pub title: &'static str,
    pub validate: StepValidator,
}

static STEPS: [StepDefinition; 6] = [
    StepDefinition {
        id: StepId::Personal,
        title: "Personal Information",
        validate: validate_personal,
    },
    StepDefinition {
        id: StepId::Contact,
        title: "Contact Details",
        validate: validate_contact,
    },
    StepDefinition {
        id: StepId::Ministry,
        title: "Ministry Interests",
        validate: validate_ministry,
    },
    StepDefinition {
        id: StepId::Pledge,
        title: "Giving & Pledge",
        validate: validate_pledge,
    },
    StepDefinition {
        id: StepId::Family,
        title: "Family & Emergency Contact",
        validate: validate_family,
    },
    StepDefinition {
        id: StepId::Confirmation,
        title: "Review & Confirm",
        validate: validate_confirmation,
    },
];

/// The fixed step order.
pub fn steps() -> &'static [StepDefinition] {
    &STEPS
}

/// Strictly sequential navigation over the six steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSequencer {
    current_index: usize,
    completed: Vec<StepId>,
}

impl Default for StepSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl StepSequencer {
    pub fn new() -> Self {
        Self {
            current_index: 0,
            completed: Vec::new(),
        }
    }

    /// Rebuild from persisted position; `None` when the index or a step id is out of range.
    pub fn restore(current_index: usize, completed: &[String]) -> Option<Self> {
        if current_index >= steps().len() {
            return None;
        }

        let mut sequencer = Self {
            current_index,
            completed: Vec::with_capacity(completed.len()),
        };
        for raw in completed {
            sequencer.mark_completed(StepId::parse(raw)?);
        }
        Some(sequencer)
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_step(&self) -> &'static StepDefinition {
        &steps()[self.current_index]
    }

    pub fn completed(&self) -> &[StepId] {
        &self.completed
    }

    pub fn is_completed(&self, step: StepId) -> bool {
        self.completed.contains(&step)
    }

    /// On the confirmation step, the only place submission is allowed.
    pub fn is_terminal(&self) -> bool {
        self.current_index == steps().len() - 1
    }

    pub fn remaining_minutes(&self) -> u32 {
        (steps().len() - self.current_index) as u32 * MINUTES_PER_STEP
    }

    pub fn progress_percent(&self) -> u8 {
        ((self.completed.len() * 100) / steps().len()) as u8
    }

    /// Validate the current step and move forward when it is clean.
    ///
    /// Completion is recorded at the moment of advancing and is not revoked if the step's data
    /// later becomes invalid. On the last step a clean result marks it completed without moving.
    pub fn next(&mut self, fields: &FieldMap, ctx: &ValidationContext) -> Result<usize, ErrorMap> {
        let step = self.current_step();
        let errors = (step.validate)(fields, ctx);
        if !errors.is_empty() {
            debug!(step = %step.id, errors = errors.len(), "step advance blocked");
            return Err(errors);
        }

        self.mark_completed(step.id);
        if !self.is_terminal() {
            self.current_index += 1;
        }
        debug!(
            from = %step.id,
            to = %self.current_step().id,
            remaining_minutes = self.remaining_minutes(),
            "step advanced"
        );
        Ok(self.current_index)
    }

    pub fn previous(&mut self) -> usize {
        self.current_index = self.current_index.saturating_sub(1);
        self.current_index
    }

    fn mark_completed(&mut self, step: StepId) {
        if !self.completed.contains(&step) {
            self.completed.push(step);
        }
    }
}
