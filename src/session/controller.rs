//! The guided capture, identify, confirm and advise flow.
//!
//! All state lives behind one mutex that is never held across an await.
//! Every async operation captures a [`StepToken`] before suspending and
//! re-checks it afterwards, so results for a session that was reset or has
//! moved on are dropped instead of applied.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::capability::{CapabilityProvider, TierFlags};
use super::state::{
    AppStep, SessionError, SessionErrorKind, SessionSnapshot, SessionState, StatusMessage,
    StepToken,
};
use crate::analyzer::image_prep::{compress_async, CaptureError, CompressionOptions, ImageData};
use crate::analyzer::types::{
    Language, Machine, Workpiece, DEFAULT_WIRE_DIAMETER, PLACEHOLDER_BRAND,
};
use crate::analyzer::vision::{Advisor, AdvisorError};
use crate::config::AppConfig;
use crate::history::{HistoryEntry, HistoryLog, SavedMachineEntry, SavedMachineLog};
use crate::storage::{PersistentStore, LANGUAGE_KEY};

/// Tunables of the flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub compression: CompressionOptions,
    /// Delay before manual machine entry is offered while identifying.
    pub soft_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            compression: CompressionOptions::default(),
            soft_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            compression: config.compression,
            soft_timeout: Duration::from_secs(config.identify_soft_timeout_secs),
        }
    }
}

struct Core {
    state: SessionState,
    store: PersistentStore,
    history: HistoryLog,
    saved: SavedMachineLog,
    language: Language,
    soft_timer: Option<JoinHandle<()>>,
}

impl Core {
    fn cancel_soft_timer(&mut self) {
        if let Some(handle) = self.soft_timer.take() {
            handle.abort();
        }
    }

    fn snapshot(&self, tier: TierFlags) -> SessionSnapshot {
        let state = &self.state;
        SessionSnapshot {
            step: state.step,
            machine: state.machine.clone(),
            workpiece: state.workpiece.clone(),
            advice: state.advice.clone(),
            machine_image: state.machine_image.clone(),
            workpiece_image: state.workpiece_image.clone(),
            error: state.error.clone(),
            is_analyzing: state.is_analyzing,
            is_loading: state.is_loading,
            status: state.status,
            manual_entry_visible: state.manual_entry_visible,
            from_saved_machine: state.from_saved_machine,
            language: self.language,
            tier,
            history: self.history.entries().to_vec(),
            saved_machines: self.saved.entries().to_vec(),
        }
    }
}

struct Inner {
    core: Mutex<Core>,
    advisor: Arc<dyn Advisor>,
    capability: Arc<dyn CapabilityProvider>,
    settings: SessionSettings,
    events: watch::Sender<SessionSnapshot>,
}

/// Cheaply clonable handle to one user session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        advisor: Arc<dyn Advisor>,
        capability: Arc<dyn CapabilityProvider>,
        store: PersistentStore,
        settings: SessionSettings,
    ) -> Self {
        let history = HistoryLog::load_history(&store);
        let saved = SavedMachineLog::load_saved_machines(&store);
        let language: Language = store.load(LANGUAGE_KEY).unwrap_or_default();

        let core = Core {
            state: SessionState::default(),
            store,
            history,
            saved,
            language,
            soft_timer: None,
        };
        let (events, _rx) = watch::channel(core.snapshot(capability.current_tier()));

        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(core),
                advisor,
                capability,
                settings,
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tier(&self) -> TierFlags {
        self.inner.capability.current_tier()
    }

    /// Mutate the core and publish the resulting snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let mut core = self.lock();
        let result = f(&mut core);
        self.inner.events.send_replace(core.snapshot(self.tier()));
        result
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot(self.tier())
    }

    /// Receiver of every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.events.subscribe()
    }

    /// Republish the snapshot, e.g. after the tier changed.
    pub fn refresh(&self) {
        self.update(|_| ());
    }

    pub fn has_pending_timer(&self) -> bool {
        self.lock()
            .soft_timer
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Republish whenever the capability provider reports a new tier. The
    /// task ends once the controller is dropped.
    pub fn watch_capability(&self) -> JoinHandle<()> {
        let mut rx = self.inner.capability.subscribe();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!("Tier changed: {:?}", *rx.borrow());
                SessionController { inner }.refresh();
            }
        })
    }

    pub fn start(&self) {
        self.update(|core| {
            core.cancel_soft_timer();
            let state = &mut core.state;
            state.error = None;
            state.machine_image = None;
            state.manual_entry_visible = false;
            state.from_saved_machine = false;
            state.transition(AppStep::MachinePhoto);
        });
        info!("Session started");
    }

    /// Compress and keep the machine photo, record it as a saved machine
    /// and move on to the workpiece photo.
    pub async fn submit_machine_photo(&self, raw: Vec<u8>) -> Result<(), CaptureError> {
        let token = self.update(|core| {
            core.state.is_analyzing = true;
            core.state.status = Some(StatusMessage::Capturing);
            core.state.error = None;
            core.state.token()
        });

        let compressed = compress_async(raw, self.inner.settings.compression).await;

        self.update(|core| {
            if !core.state.is_current(token) {
                debug!("Discarding machine photo for a superseded step");
                return Ok(());
            }
            core.state.is_analyzing = false;
            core.state.status = None;

            let image = match compressed {
                Ok(bytes) => ImageData::new(bytes),
                Err(e) => {
                    warn!("Machine photo rejected: {}", e);
                    core.state.error = Some(SessionError::new(SessionErrorKind::Capture, e.to_string()));
                    return Err(e);
                }
            };

            core.state.machine_image = Some(image.clone());
            core.state.machine = Some(Machine::placeholder());
            core.state.from_saved_machine = false;
            core.state.manual_entry_visible = false;

            let entry = SavedMachineEntry::new(image, Machine::placeholder());
            if let Err(e) = core.saved.prepend(entry, &mut core.store) {
                warn!("Could not record saved machine: {}", e);
            }
            core.state.transition(AppStep::WorkpiecePhoto);
            Ok(())
        })
    }

    /// Compress the workpiece photo and identify machine and workpiece.
    ///
    /// Identification failures never block: fallback values are applied and
    /// the flow proceeds to confirmation with manual entry offered.
    pub async fn submit_workpiece_photo(&self, raw: Vec<u8>) -> Result<(), CaptureError> {
        let started = self.update(|core| {
            let Some(machine_image) = core.state.machine_image.clone() else {
                info!("No machine photo yet, returning to machine capture");
                core.state.transition(AppStep::MachinePhoto);
                return None;
            };

            core.cancel_soft_timer();
            let token = core.state.advance();
            core.state.is_analyzing = true;
            core.state.status = Some(StatusMessage::Capturing);
            core.state.error = None;
            core.state.manual_entry_visible = false;
            core.soft_timer = Some(self.spawn_soft_timer(token));
            Some((token, machine_image))
        });
        let Some((token, machine_image)) = started else {
            return Ok(());
        };

        let compressed = compress_async(raw, self.inner.settings.compression).await;

        let workpiece_image = self.update(|core| {
            if !core.state.is_current(token) {
                return Ok(None);
            }
            match compressed {
                Ok(bytes) => {
                    let image = ImageData::new(bytes);
                    core.state.workpiece_image = Some(image.clone());
                    core.state.status = Some(StatusMessage::Identifying);
                    Ok(Some(image))
                }
                Err(e) => {
                    warn!("Workpiece photo rejected: {}", e);
                    core.cancel_soft_timer();
                    core.state.is_analyzing = false;
                    core.state.status = None;
                    core.state.error = Some(SessionError::new(SessionErrorKind::Capture, e.to_string()));
                    Err(e)
                }
            }
        })?;
        let Some(workpiece_image) = workpiece_image else {
            debug!("Discarding workpiece photo for a superseded step");
            return Ok(());
        };

        let result = self
            .inner
            .advisor
            .identify(machine_image.as_bytes(), workpiece_image.as_bytes())
            .await;

        self.update(|core| {
            if !core.state.is_current(token) {
                debug!("Discarding late identification result");
                return;
            }
            core.cancel_soft_timer();
            core.state.is_analyzing = false;
            core.state.status = None;

            match result {
                Ok(identification) => {
                    info!(
                        "Identified {} {} ({})",
                        identification.machine.brand,
                        identification.machine.model,
                        identification.machine.machine_type.as_str()
                    );
                    let machine = identification.machine;
                    core.state.workpiece = Some(Workpiece {
                        mig_wire_diameter: DEFAULT_WIRE_DIAMETER.to_string(),
                        is_analog: false,
                        ..identification.workpiece
                    });
                    core.state.manual_entry_visible = false;

                    if !core.state.from_saved_machine {
                        let identified = machine.clone();
                        let updated = core
                            .saved
                            .update_first(&mut core.store, |entry| entry.machine_data = identified);
                        if let Err(e) = updated {
                            warn!("Could not update saved machine: {}", e);
                        }
                    }
                    core.state.machine = Some(machine);
                }
                Err(e) => {
                    warn!("Identification failed, using fallback values: {}", e);
                    core.state.error =
                        Some(SessionError::new(SessionErrorKind::Identification, e.to_string()));
                    core.state.manual_entry_visible = true;
                    let unset = core
                        .state
                        .machine
                        .as_ref()
                        .map_or(true, |m| m.brand == PLACEHOLDER_BRAND);
                    if unset {
                        core.state.machine = Some(Machine::fallback());
                    }
                    core.state.workpiece = Some(Workpiece::fallback());
                }
            }
            core.state.transition(AppStep::DetailsConfirmation);
        });
        Ok(())
    }

    fn spawn_soft_timer(&self, token: StepToken) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let delay = self.inner.settings.soft_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                SessionController { inner }.reveal_manual_entry(token);
            }
        })
    }

    fn reveal_manual_entry(&self, token: StepToken) {
        self.update(|core| {
            if !core.state.is_current(token) || !core.state.is_analyzing {
                return;
            }
            info!("Identification is slow, offering manual machine entry");
            core.state.manual_entry_visible = true;
            core.soft_timer = None;
        });
    }

    /// Name the machine by hand and skip identification. Blank input is
    /// ignored and returns false.
    pub fn submit_manual_machine_name(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.update(|core| {
            core.cancel_soft_timer();
            let state = &mut core.state;
            state.machine = Some(Machine::with_brand(name));
            if state.workpiece.is_none() {
                state.workpiece = Some(Workpiece::fallback());
            }
            state.manual_entry_visible = false;
            state.error = None;
            state.transition(AppStep::DetailsConfirmation);
        });
        info!("Machine entered manually: {}", name);
        true
    }

    /// Apply the user's edits on the confirmation screen. Ignored elsewhere.
    pub fn update_machine(&self, machine: Machine) -> bool {
        self.update(|core| {
            if core.state.step != AppStep::DetailsConfirmation {
                return false;
            }
            core.state.machine = Some(machine);
            true
        })
    }

    pub fn update_workpiece(&self, workpiece: Workpiece) -> bool {
        self.update(|core| {
            if core.state.step != AppStep::DetailsConfirmation {
                return false;
            }
            core.state.workpiece = Some(workpiece);
            true
        })
    }

    /// Apply the confirmed details, then request advice.
    pub async fn confirm_details(
        &self,
        machine: Machine,
        workpiece: Workpiece,
        language: Language,
    ) -> Result<(), AdvisorError> {
        self.update_machine(machine);
        self.update_workpiece(workpiece);
        self.finalize(language).await
    }

    /// Request advice for the current machine and workpiece.
    ///
    /// On success the advice is shown and recorded in history. On failure
    /// the confirmation step stays active so the user can retry.
    pub async fn finalize(&self, language: Language) -> Result<(), AdvisorError> {
        let tier = self.tier();
        let request = self.update(|core| {
            let state = &mut core.state;
            if state.is_loading {
                debug!("Advice already in flight");
                return None;
            }
            let (Some(machine), Some(workpiece)) = (state.machine.clone(), state.workpiece.clone())
            else {
                return None;
            };
            state.is_loading = true;
            state.error = None;
            state.status = Some(StatusMessage::ComputingAdvice);
            Some((state.token(), machine, workpiece))
        });
        let Some((token, machine, workpiece)) = request else {
            return Ok(());
        };

        let payload = if tier.advanced {
            workpiece.clone()
        } else {
            workpiece.without_advanced_fields()
        };
        let result = self
            .inner
            .advisor
            .advise(&machine, &payload, language, tier)
            .await;

        self.update(|core| {
            if !core.state.is_current(token) {
                debug!("Discarding late advice result");
                return Ok(());
            }
            core.state.is_loading = false;
            core.state.status = None;

            match result {
                Ok(advice) => {
                    let entry = HistoryEntry::new(
                        core.state.workpiece_image.clone(),
                        machine,
                        workpiece,
                        advice.clone(),
                    );
                    if let Err(e) = core.history.prepend(entry, &mut core.store) {
                        warn!("Could not record history entry: {}", e);
                    }
                    core.state.advice = Some(advice);
                    core.state.transition(AppStep::Results);
                    info!("Advice ready");
                    Ok(())
                }
                Err(e) => {
                    warn!("Advice failed: {}", e);
                    core.state.error = Some(SessionError::new(SessionErrorKind::Advice, e.to_string()));
                    Err(e)
                }
            }
        })
    }

    /// Back to `Welcome` with every session field cleared. History, saved
    /// machines and the language are kept.
    pub fn reset(&self) {
        self.update(|core| {
            core.cancel_soft_timer();
            core.state.reset();
        });
        debug!("Session reset");
    }

    /// Reuse a saved machine and continue with the workpiece photo.
    /// Requires the advanced tier.
    pub fn load_saved_machine(&self, entry: &SavedMachineEntry) -> bool {
        if !self.tier().advanced {
            debug!("Saved machines require the advanced tier");
            return false;
        }
        self.update(|core| {
            core.cancel_soft_timer();
            let state = &mut core.state;
            state.machine = Some(entry.machine_data.clone());
            state.machine_image = Some(entry.image.clone());
            state.from_saved_machine = true;
            state.error = None;
            state.manual_entry_visible = false;
            state.transition(AppStep::WorkpiecePhoto);
        });
        true
    }

    /// Show a past result again. Requires the advanced tier.
    pub fn load_history_entry(&self, entry: &HistoryEntry) -> bool {
        if !self.tier().advanced {
            debug!("History requires the advanced tier");
            return false;
        }
        self.update(|core| {
            core.cancel_soft_timer();
            let state = &mut core.state;
            state.machine = Some(entry.machine.clone());
            state.workpiece = Some(entry.workpiece.clone());
            state.advice = Some(entry.advice.clone());
            state.workpiece_image = entry.image.clone();
            state.error = None;
            state.manual_entry_visible = false;
            state.transition(AppStep::Results);
        });
        true
    }

    pub fn delete_history_entry(&self, id: &str) -> bool {
        self.update(|core| match core.history.remove(id, &mut core.store) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Could not delete history entry {}: {}", id, e);
                false
            }
        })
    }

    pub fn clear_saved_machines(&self) {
        self.update(|core| {
            if let Err(e) = core.saved.clear(&mut core.store) {
                warn!("Could not clear saved machines: {}", e);
            }
        });
    }

    /// Wipe history, saved machines and the language, then reset.
    pub fn clear_all_data(&self) {
        self.update(|core| {
            if let Err(e) = core.store.clear() {
                warn!("Could not clear persistent store: {}", e);
            }
            core.history.reset_mirror();
            core.saved.reset_mirror();
            core.language = Language::default();
            core.cancel_soft_timer();
            core.state.reset();
        });
    }

    pub fn language(&self) -> Language {
        self.lock().language
    }

    pub fn set_language(&self, language: Language) {
        self.update(|core| {
            core.language = language;
            if let Err(e) = core.store.save(LANGUAGE_KEY, &language) {
                warn!("Could not persist language: {}", e);
            }
        });
    }

    pub fn set_error(&self, error: SessionError) {
        self.update(|core| core.state.error = Some(error));
    }

    pub fn dismiss_error(&self) {
        self.update(|core| core.state.error = None);
    }
}
