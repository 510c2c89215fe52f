//! Optional native host (mobile shell) integration.
//!
//! The host may offer a camera trigger and an in-app purchase trigger, and
//! may push captured images and premium status changes. Every capability is
//! detected at call time; without a host the standard file picker and the
//! in-app purchase callback are used.

use tracing::{debug, info, warn};

use super::capability::PremiumStatus;
use super::controller::SessionController;
use super::state::{AppStep, SessionError, SessionErrorKind};
use crate::analyzer::image_prep::ImageData;

pub trait HostBridge: Send + Sync {
    fn supports_photo_capture(&self) -> bool {
        false
    }

    /// Ask the host to open its camera. The photo arrives later as
    /// [`BridgeEvent::ImageCaptured`].
    fn request_photo(&self) -> Result<(), String> {
        Err("photo capture not supported by host".to_string())
    }

    fn supports_purchase(&self) -> bool {
        false
    }

    fn launch_purchase(&self) -> Result<(), String> {
        Err("purchase not supported by host".to_string())
    }
}

/// No host present.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBridge;

impl HostBridge for NoBridge {}

/// Notifications pushed by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A photo taken by the host camera, as a data URI or bare base64.
    ImageCaptured(String),
    PremiumStatusChanged(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRoute {
    NativeCamera,
    FilePicker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseRoute {
    Native,
    Callback,
}

/// Trigger a photo capture, preferring the host camera.
pub fn request_capture(bridge: &dyn HostBridge) -> CaptureRoute {
    if bridge.supports_photo_capture() {
        match bridge.request_photo() {
            Ok(()) => return CaptureRoute::NativeCamera,
            Err(e) => warn!("Host camera unavailable, using file picker: {}", e),
        }
    }
    CaptureRoute::FilePicker
}

/// Start a purchase, preferring the host store; otherwise run `callback`.
pub fn request_purchase(bridge: &dyn HostBridge, callback: impl FnOnce()) -> PurchaseRoute {
    if bridge.supports_purchase() {
        match bridge.launch_purchase() {
            Ok(()) => return PurchaseRoute::Native,
            Err(e) => warn!("Host purchase unavailable, using callback: {}", e),
        }
    }
    callback();
    PurchaseRoute::Callback
}

/// Apply a host notification to the session and premium status.
pub async fn dispatch_event(
    event: BridgeEvent,
    session: &SessionController,
    premium: &PremiumStatus,
) {
    match event {
        BridgeEvent::PremiumStatusChanged(is_premium) => {
            premium.set_premium(is_premium);
            session.refresh();
        }
        BridgeEvent::ImageCaptured(payload) => {
            let image = match ImageData::from_data_uri(&payload) {
                Ok(image) => image,
                Err(e) => {
                    warn!("Rejected captured image from host: {}", e);
                    session.set_error(SessionError::new(SessionErrorKind::Capture, e.to_string()));
                    return;
                }
            };

            let step = session.snapshot().step;
            info!("Host captured {} bytes during {:?}", image.len(), step);
            let result = match step {
                AppStep::MachinePhoto => session.submit_machine_photo(image.into_bytes()).await,
                AppStep::WorkpiecePhoto => session.submit_workpiece_photo(image.into_bytes()).await,
                other => {
                    debug!("Ignoring captured image during {:?}", other);
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!("Captured image could not be processed: {}", e);
            }
        }
    }
}
