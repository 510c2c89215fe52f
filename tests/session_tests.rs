use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use weldmaster::analyzer::{
    Advice, Advisor, AdvisorError, AlternativeProcess, Identification, Language, Machine,
    MachineType, Workpiece,
};
use weldmaster::session::{
    dispatch_event, AppStep, BridgeEvent, PremiumStatus, SessionController, SessionErrorKind,
    SessionSettings, StatusMessage, TierFlags,
};
use weldmaster::storage::{PersistentStore, SqliteBackend};

/// Advisor that replays scripted results and records advice requests.
#[derive(Default)]
struct ScriptedAdvisor {
    identify_results: Mutex<VecDeque<Result<Identification, AdvisorError>>>,
    advice_results: Mutex<VecDeque<Result<Advice, AdvisorError>>>,
    advice_requests: Mutex<Vec<(Workpiece, TierFlags)>>,
    identify_gate: Option<Arc<Notify>>,
    advice_gate: Option<Arc<Notify>>,
}

impl ScriptedAdvisor {
    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            identify_gate: Some(gate),
            ..Self::default()
        }
    }

    fn gated_advice(gate: Arc<Notify>) -> Self {
        Self {
            advice_gate: Some(gate),
            ..Self::default()
        }
    }

    fn push_identify(&self, result: Result<Identification, AdvisorError>) {
        self.identify_results.lock().unwrap().push_back(result);
    }

    fn push_advice(&self, result: Result<Advice, AdvisorError>) {
        self.advice_results.lock().unwrap().push_back(result);
    }

    fn advice_requests(&self) -> Vec<(Workpiece, TierFlags)> {
        self.advice_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Advisor for ScriptedAdvisor {
    async fn identify(&self, _: &[u8], _: &[u8]) -> Result<Identification, AdvisorError> {
        if let Some(gate) = &self.identify_gate {
            gate.notified().await;
        }
        self.identify_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Identification::fallback()))
    }

    async fn advise(
        &self,
        _: &Machine,
        workpiece: &Workpiece,
        _: Language,
        tier: TierFlags,
    ) -> Result<Advice, AdvisorError> {
        if let Some(gate) = &self.advice_gate {
            gate.notified().await;
        }
        self.advice_requests
            .lock()
            .unwrap()
            .push((workpiece.clone(), tier));
        self.advice_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AdvisorError::MalformedResponse("unscripted".to_string())))
    }
}

fn new_session(
    advisor: &Arc<ScriptedAdvisor>,
    premium: &Arc<PremiumStatus>,
    store: PersistentStore,
) -> SessionController {
    SessionController::new(
        advisor.clone(),
        premium.clone(),
        store,
        SessionSettings::default(),
    )
}

fn basic_session(advisor: &Arc<ScriptedAdvisor>) -> SessionController {
    new_session(
        advisor,
        &Arc::new(PremiumStatus::new(false)),
        PersistentStore::in_memory(),
    )
}

fn photo(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn identified(brand: &str) -> Identification {
    Identification {
        machine: Machine {
            brand: brand.to_string(),
            model: "Powertec 231C".to_string(),
            machine_type: MachineType::Mig,
            specs_url: None,
        },
        workpiece: Workpiece {
            material: "Inox".to_string(),
            thickness_a: "3".to_string(),
            mig_wire_diameter: "1.0".to_string(),
            is_analog: true,
            ..Workpiece::default()
        },
    }
}

fn advice(voltage: &str) -> Advice {
    Advice {
        amperage: "110 A".to_string(),
        voltage: voltage.to_string(),
        tips: vec!["Push angle 10-15°".to_string()],
        ..Advice::default()
    }
}

async fn at_confirmation(session: &SessionController) {
    session.start();
    session.submit_machine_photo(photo(64, 48)).await.unwrap();
    session.submit_workpiece_photo(photo(64, 48)).await.unwrap();
    assert_eq!(session.snapshot().step, AppStep::DetailsConfirmation);
}

#[tokio::test]
async fn machine_photo_records_compressed_saved_machine() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let session = basic_session(&advisor);
    session.start();

    let raw = photo(1600, 1200);
    session.submit_machine_photo(raw.clone()).await.unwrap();

    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::WorkpiecePhoto);
    assert_eq!(snap.machine.as_ref().unwrap().brand, "Identification...");
    assert_eq!(snap.saved_machines.len(), 1);

    let stored = &snap.saved_machines[0].image;
    assert_eq!(Some(stored), snap.machine_image.as_ref());
    assert_ne!(stored.as_bytes(), raw.as_slice());
    let decoded = image::load_from_memory(stored.as_bytes()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (800, 600));
}

#[tokio::test]
async fn saved_machines_never_exceed_three() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let session = basic_session(&advisor);

    for _ in 0..5 {
        session.start();
        session.submit_machine_photo(photo(8, 8)).await.unwrap();
        assert!(session.snapshot().saved_machines.len() <= 3);
    }

    let saved = session.snapshot().saved_machines;
    assert_eq!(saved.len(), 3);
    assert!(saved.windows(2).all(|w| w[0].date >= w[1].date));
}

#[tokio::test]
async fn identification_success_fills_entities_and_saved_machine() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    advisor.push_identify(Ok(identified("Lincoln")));
    let session = basic_session(&advisor);

    at_confirmation(&session).await;

    let snap = session.snapshot();
    assert_eq!(snap.machine.as_ref().unwrap().brand, "Lincoln");
    let workpiece = snap.workpiece.unwrap();
    assert_eq!(workpiece.material, "Inox");
    assert_eq!(workpiece.mig_wire_diameter, "0.8");
    assert!(!workpiece.is_analog);
    assert!(snap.error.is_none());
    assert!(!snap.manual_entry_visible);
    assert_eq!(snap.saved_machines[0].machine_data.brand, "Lincoln");
    assert!(!session.has_pending_timer());
}

#[tokio::test]
async fn identification_failure_falls_back_and_proceeds() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    advisor.push_identify(Err(AdvisorError::Transport("connection reset".to_string())));
    let session = basic_session(&advisor);

    at_confirmation(&session).await;

    let snap = session.snapshot();
    assert_eq!(snap.machine.unwrap().brand, "Inconnu");
    let workpiece = snap.workpiece.unwrap();
    assert_eq!(workpiece.material, "Acier");
    assert_eq!(workpiece.thickness_a, "2");
    assert_eq!(snap.error.unwrap().kind, SessionErrorKind::Identification);
    assert!(snap.manual_entry_visible);
    assert!(!snap.is_analyzing);
}

#[tokio::test]
async fn identification_failure_keeps_machine_from_saved_list() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let premium = Arc::new(PremiumStatus::new(true));
    let session = new_session(&advisor, &premium, PersistentStore::in_memory());

    session.start();
    advisor.push_identify(Ok(identified("ESAB")));
    session.submit_machine_photo(photo(8, 8)).await.unwrap();
    session.submit_workpiece_photo(photo(8, 8)).await.unwrap();
    let entry = session.snapshot().saved_machines[0].clone();

    session.reset();
    assert!(session.load_saved_machine(&entry));
    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::WorkpiecePhoto);
    assert!(snap.from_saved_machine);

    advisor.push_identify(Err(AdvisorError::Timeout(60)));
    session.submit_workpiece_photo(photo(8, 8)).await.unwrap();
    assert_eq!(session.snapshot().machine.unwrap().brand, "ESAB");
}

#[tokio::test]
async fn identification_from_saved_machine_leaves_entry_untouched() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let premium = Arc::new(PremiumStatus::new(true));
    let session = new_session(&advisor, &premium, PersistentStore::in_memory());

    advisor.push_identify(Ok(identified("ESAB")));
    at_confirmation(&session).await;
    let entry = session.snapshot().saved_machines[0].clone();

    session.reset();
    session.load_saved_machine(&entry);
    advisor.push_identify(Ok(identified("Miller")));
    session.submit_workpiece_photo(photo(8, 8)).await.unwrap();

    let snap = session.snapshot();
    assert_eq!(snap.machine.unwrap().brand, "Miller");
    assert_eq!(snap.saved_machines.len(), 1);
    assert_eq!(snap.saved_machines[0].machine_data.brand, "ESAB");
}

#[tokio::test]
async fn advice_failure_stays_on_confirmation_then_retry_succeeds() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let session = basic_session(&advisor);
    at_confirmation(&session).await;

    advisor.push_advice(Err(AdvisorError::Http {
        status: 503,
        body: "overloaded".to_string(),
    }));
    let err = session.finalize(Language::Fr).await;
    assert!(err.is_err());
    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::DetailsConfirmation);
    assert_eq!(snap.error.unwrap().kind, SessionErrorKind::Advice);
    assert!(!snap.is_loading);
    assert!(snap.history.is_empty());

    advisor.push_advice(Ok(advice("18 V")));
    let mut workpiece = session.snapshot().workpiece.unwrap();
    workpiece.thickness_a = "4".to_string();
    session
        .confirm_details(Machine::with_brand("Telwin"), workpiece, Language::En)
        .await
        .unwrap();

    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::Results);
    assert!(snap.error.is_none());
    assert_eq!(snap.advice.unwrap().voltage, "18 V");
    assert_eq!(snap.history.len(), 1);
    assert_eq!(snap.history[0].machine.brand, "Telwin");
    assert_eq!(snap.history[0].workpiece.thickness_a, "4");
    assert_eq!(snap.history[0].image, snap.workpiece_image);
}

#[tokio::test]
async fn superseded_advice_does_not_block_retry() {
    let gate = Arc::new(Notify::new());
    let advisor = Arc::new(ScriptedAdvisor::gated_advice(gate.clone()));
    advisor.push_advice(Ok(advice("18 V")));
    advisor.push_advice(Ok(advice("20 V")));
    let session = basic_session(&advisor);
    at_confirmation(&session).await;

    let mut rx = session.subscribe();
    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.finalize(Language::Fr).await }
    });
    rx.wait_for(|s| s.is_loading).await.unwrap();

    assert!(session.submit_manual_machine_name("Kemppi"));
    let snap = session.snapshot();
    assert!(!snap.is_loading);
    assert_eq!(snap.status, None);

    gate.notify_one();
    pending.await.unwrap().unwrap();
    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::DetailsConfirmation);
    assert!(snap.advice.is_none());
    assert!(!snap.is_loading);

    gate.notify_one();
    session.finalize(Language::Fr).await.unwrap();
    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::Results);
    assert_eq!(snap.advice.unwrap().voltage, "20 V");
    assert_eq!(snap.history[0].machine.brand, "Kemppi");
    assert_eq!(advisor.advice_requests().len(), 2);
}

#[tokio::test]
async fn finalize_without_entities_is_a_noop() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let session = basic_session(&advisor);
    session.finalize(Language::Fr).await.unwrap();
    assert!(advisor.advice_requests().is_empty());
    assert_eq!(session.snapshot().step, AppStep::Welcome);
}

fn premium_workpiece() -> Workpiece {
    Workpiece {
        material: "Acier".to_string(),
        thickness_a: "3".to_string(),
        thickness_b: Some("5".to_string()),
        welding_position: Some("PA/1G".to_string()),
        ..Workpiece::default()
    }
}

#[tokio::test]
async fn basic_tier_strips_advanced_fields_from_payload() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    advisor.push_advice(Ok(advice("17 V")));
    let session = basic_session(&advisor);
    at_confirmation(&session).await;

    session
        .confirm_details(Machine::with_brand("GYS"), premium_workpiece(), Language::Fr)
        .await
        .unwrap();

    let (payload, tier) = advisor.advice_requests().pop().unwrap();
    assert_eq!(tier, TierFlags::basic());
    assert_eq!(payload.thickness_b, None);
    assert_eq!(payload.welding_position, None);
    assert_eq!(payload.thickness_a, "3");
}

#[tokio::test]
async fn advanced_tier_forwards_advanced_fields() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    advisor.push_advice(Ok(advice("17 V")));
    let premium = Arc::new(PremiumStatus::new(true));
    let session = new_session(&advisor, &premium, PersistentStore::in_memory());
    at_confirmation(&session).await;

    session
        .confirm_details(Machine::with_brand("GYS"), premium_workpiece(), Language::Fr)
        .await
        .unwrap();

    let (payload, tier) = advisor.advice_requests().pop().unwrap();
    assert_eq!(tier, TierFlags::advanced());
    assert_eq!(payload, premium_workpiece());
}

#[tokio::test]
async fn reset_twice_is_idempotent() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    advisor.push_advice(Ok(advice("18 V")));
    let session = basic_session(&advisor);
    at_confirmation(&session).await;
    session.finalize(Language::Fr).await.unwrap();

    session.reset();
    let first = session.snapshot();
    session.reset();
    let second = session.snapshot();

    assert_eq!(first, second);
    assert_eq!(first.step, AppStep::Welcome);
    assert!(first.machine.is_none());
    assert!(first.workpiece.is_none());
    assert!(first.advice.is_none());
    assert!(first.error.is_none());
    assert!(!first.manual_entry_visible);
    assert!(!session.has_pending_timer());
    // Persistent logs survive
    assert_eq!(first.history.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn soft_timeout_reveals_manual_entry_until_late_success() {
    let gate = Arc::new(Notify::new());
    let advisor = Arc::new(ScriptedAdvisor::gated(gate.clone()));
    advisor.push_identify(Ok(identified("Lincoln")));
    let session = basic_session(&advisor);
    session.start();
    session.submit_machine_photo(photo(8, 8)).await.unwrap();

    let mut rx = session.subscribe();
    let task = tokio::spawn({
        let session = session.clone();
        async move { session.submit_workpiece_photo(photo(8, 8)).await }
    });
    rx.wait_for(|s| s.status == Some(StatusMessage::Identifying))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::WorkpiecePhoto);
    assert!(snap.is_analyzing);
    assert!(snap.manual_entry_visible);

    gate.notify_one();
    task.await.unwrap().unwrap();

    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::DetailsConfirmation);
    assert_eq!(snap.machine.unwrap().brand, "Lincoln");
    assert!(!snap.manual_entry_visible);
}

#[tokio::test(start_paused = true)]
async fn reset_discards_late_identification_and_timer() {
    let gate = Arc::new(Notify::new());
    let advisor = Arc::new(ScriptedAdvisor::gated(gate.clone()));
    advisor.push_identify(Ok(identified("Lincoln")));
    let session = basic_session(&advisor);
    session.start();
    session.submit_machine_photo(photo(8, 8)).await.unwrap();

    let mut rx = session.subscribe();
    let task = tokio::spawn({
        let session = session.clone();
        async move { session.submit_workpiece_photo(photo(8, 8)).await }
    });
    rx.wait_for(|s| s.status == Some(StatusMessage::Identifying))
        .await
        .unwrap();

    session.reset();
    assert!(!session.has_pending_timer());

    tokio::time::sleep(Duration::from_secs(11)).await;
    gate.notify_one();
    task.await.unwrap().unwrap();

    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::Welcome);
    assert!(snap.machine.is_none());
    assert!(!snap.manual_entry_visible);
    assert!(!snap.is_analyzing);
}

#[tokio::test(start_paused = true)]
async fn manual_entry_supersedes_pending_identification() {
    let gate = Arc::new(Notify::new());
    let advisor = Arc::new(ScriptedAdvisor::gated(gate.clone()));
    advisor.push_identify(Ok(identified("Lincoln")));
    let session = basic_session(&advisor);
    session.start();
    session.submit_machine_photo(photo(8, 8)).await.unwrap();

    let mut rx = session.subscribe();
    let task = tokio::spawn({
        let session = session.clone();
        async move { session.submit_workpiece_photo(photo(8, 8)).await }
    });
    rx.wait_for(|s| s.manual_entry_visible).await.unwrap();

    assert!(session.submit_manual_machine_name("Stel Wave"));
    gate.notify_one();
    task.await.unwrap().unwrap();

    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::DetailsConfirmation);
    assert_eq!(snap.machine.unwrap().brand, "Stel Wave");
}

#[tokio::test]
async fn history_requires_advanced_tier_and_supports_delete() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    advisor.push_advice(Ok(Advice {
        alternatives: vec![AlternativeProcess {
            process_name: "TIG".to_string(),
            description: "Cleaner bead on thin stainless".to_string(),
            main_settings: "70 A DC-".to_string(),
        }],
        ..advice("18 V")
    }));
    let premium = Arc::new(PremiumStatus::new(false));
    let session = new_session(&advisor, &premium, PersistentStore::in_memory());
    at_confirmation(&session).await;
    session.finalize(Language::Fr).await.unwrap();
    let entry = session.snapshot().history[0].clone();

    session.reset();
    assert!(!session.load_history_entry(&entry));
    assert_eq!(session.snapshot().step, AppStep::Welcome);

    premium.set_premium(true);
    assert!(session.load_history_entry(&entry));
    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::Results);
    assert_eq!(snap.advice.as_ref(), Some(&entry.advice));
    assert_eq!(snap.tier, TierFlags::advanced());

    assert!(session.delete_history_entry(&entry.id));
    assert!(!session.delete_history_entry(&entry.id));
    assert!(session.snapshot().history.is_empty());
}

#[tokio::test]
async fn logs_and_language_survive_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("weldmaster.db");
    let advisor = Arc::new(ScriptedAdvisor::default());
    let premium = Arc::new(PremiumStatus::new(false));

    {
        let store = PersistentStore::new(SqliteBackend::open(&db, 5 * 1024 * 1024).unwrap());
        let session = new_session(&advisor, &premium, store);
        advisor.push_identify(Ok(identified("Fronius")));
        advisor.push_advice(Ok(advice("19 V")));
        at_confirmation(&session).await;
        session.finalize(Language::Fr).await.unwrap();
        session.set_language(Language::Es);
    }

    let store = PersistentStore::new(SqliteBackend::open(&db, 5 * 1024 * 1024).unwrap());
    let session = new_session(&advisor, &premium, store);
    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::Welcome);
    assert_eq!(snap.language, Language::Es);
    assert_eq!(snap.history.len(), 1);
    assert_eq!(snap.history[0].advice.voltage, "19 V");
    assert_eq!(snap.saved_machines[0].machine_data.brand, "Fronius");

    session.clear_all_data();
    let snap = session.snapshot();
    assert!(snap.history.is_empty());
    assert!(snap.saved_machines.is_empty());
    assert_eq!(snap.language, Language::Fr);
}

#[tokio::test]
async fn clear_saved_machines_keeps_history() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    advisor.push_advice(Ok(advice("18 V")));
    let session = basic_session(&advisor);
    at_confirmation(&session).await;
    session.finalize(Language::Fr).await.unwrap();

    session.clear_saved_machines();
    let snap = session.snapshot();
    assert!(snap.saved_machines.is_empty());
    assert_eq!(snap.history.len(), 1);
}

#[tokio::test]
async fn bridge_events_drive_capture_and_tier() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let premium = Arc::new(PremiumStatus::new(false));
    let session = new_session(&advisor, &premium, PersistentStore::in_memory());

    // Outside a photo step the capture is ignored
    let payload = weldmaster::analyzer::ImageData::new(photo(16, 16)).to_data_uri();
    dispatch_event(BridgeEvent::ImageCaptured(payload.clone()), &session, &premium).await;
    assert_eq!(session.snapshot().step, AppStep::Welcome);

    session.start();
    dispatch_event(BridgeEvent::ImageCaptured(payload.clone()), &session, &premium).await;
    assert_eq!(session.snapshot().step, AppStep::WorkpiecePhoto);
    dispatch_event(BridgeEvent::ImageCaptured(payload), &session, &premium).await;
    assert_eq!(session.snapshot().step, AppStep::DetailsConfirmation);

    dispatch_event(BridgeEvent::PremiumStatusChanged(true), &session, &premium).await;
    assert!(premium.is_premium());
    assert_eq!(session.snapshot().tier, TierFlags::advanced());
}

#[tokio::test]
async fn bridge_rejects_malformed_capture() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let premium = Arc::new(PremiumStatus::new(false));
    let session = new_session(&advisor, &premium, PersistentStore::in_memory());
    session.start();

    dispatch_event(
        BridgeEvent::ImageCaptured("data:image/jpeg;base64,@@@".to_string()),
        &session,
        &premium,
    )
    .await;

    let snap = session.snapshot();
    assert_eq!(snap.step, AppStep::MachinePhoto);
    assert_eq!(snap.error.unwrap().kind, SessionErrorKind::Capture);
    session.dismiss_error();
    assert!(session.snapshot().error.is_none());
}

#[tokio::test]
async fn capability_watcher_republishes_tier() {
    let advisor = Arc::new(ScriptedAdvisor::default());
    let premium = Arc::new(PremiumStatus::new(false));
    let session = new_session(&advisor, &premium, PersistentStore::in_memory());
    let watcher = session.watch_capability();
    let mut rx = session.subscribe();

    premium.set_premium(true);
    rx.wait_for(|s| s.tier.advanced).await.unwrap();

    watcher.abort();
}
