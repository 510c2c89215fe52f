use serde::Serialize;

use super::capability::TierFlags;
use crate::analyzer::image_prep::ImageData;
use crate::analyzer::types::{Advice, Language, Machine, Workpiece};
use crate::history::{HistoryEntry, SavedMachineEntry};

/// Screens of the guided flow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AppStep {
    #[default]
    Welcome,
    MachinePhoto,
    WorkpiecePhoto,
    DetailsConfirmation,
    Results,
}

impl AppStep {
    /// 1-based position for step indicators; `Welcome` has none.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            AppStep::Welcome => None,
            AppStep::MachinePhoto => Some(1),
            AppStep::WorkpiecePhoto => Some(2),
            AppStep::DetailsConfirmation => Some(3),
            AppStep::Results => Some(4),
        }
    }
}

/// What the session is busy with, for the loading indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusMessage {
    Capturing,
    Identifying,
    ComputingAdvice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionErrorKind {
    /// The photo could not be processed.
    Capture,
    /// Identification failed; fallback values were used.
    Identification,
    /// Advice could not be computed; the confirmation step stays active.
    Advice,
}

/// Dismissable error shown inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Identifies one entry into a step. Any later transition invalidates it,
/// so timers and late responses issued under it become no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepToken(pub(crate) u64);

/// Everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub step: AppStep,
    pub machine: Option<Machine>,
    pub workpiece: Option<Workpiece>,
    pub advice: Option<Advice>,
    pub machine_image: Option<ImageData>,
    pub workpiece_image: Option<ImageData>,
    pub error: Option<SessionError>,
    /// A photo is being processed or identified.
    pub is_analyzing: bool,
    /// Advice is being computed.
    pub is_loading: bool,
    pub status: Option<StatusMessage>,
    pub manual_entry_visible: bool,
    /// The machine came from the saved machines list.
    pub from_saved_machine: bool,
    pub language: Language,
    pub tier: TierFlags,
    pub history: Vec<HistoryEntry>,
    pub saved_machines: Vec<SavedMachineEntry>,
}

/// Session-scoped fields, cleared by a reset.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub step: AppStep,
    pub machine: Option<Machine>,
    pub workpiece: Option<Workpiece>,
    pub advice: Option<Advice>,
    pub machine_image: Option<ImageData>,
    pub workpiece_image: Option<ImageData>,
    pub error: Option<SessionError>,
    pub is_analyzing: bool,
    pub is_loading: bool,
    pub status: Option<StatusMessage>,
    pub manual_entry_visible: bool,
    pub from_saved_machine: bool,
    generation: u64,
}

impl SessionState {
    pub fn token(&self) -> StepToken {
        StepToken(self.generation)
    }

    pub fn is_current(&self, token: StepToken) -> bool {
        self.generation == token.0
    }

    /// Invalidate outstanding tokens and return the new one. Busy flags
    /// belong to the work issued under the old token, so they are cleared.
    pub fn advance(&mut self) -> StepToken {
        self.generation = self.generation.wrapping_add(1);
        self.is_analyzing = false;
        self.is_loading = false;
        self.status = None;
        self.token()
    }

    /// Move to `step` under a fresh token.
    pub fn transition(&mut self, step: AppStep) -> StepToken {
        self.step = step;
        self.advance()
    }

    /// Clear every session field and return to `Welcome`. The generation
    /// keeps counting so nothing issued before the reset can apply.
    pub fn reset(&mut self) {
        let generation = self.generation;
        *self = Self {
            generation,
            ..Self::default()
        };
        self.advance();
    }
}
