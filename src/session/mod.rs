//! The guided welding session and its collaborators.

pub mod bridge;
pub mod capability;
pub mod controller;
pub mod display;
pub mod state;

pub use bridge::{
    dispatch_event, request_capture, request_purchase, BridgeEvent, CaptureRoute, HostBridge,
    NoBridge, PurchaseRoute,
};
pub use capability::{CapabilityProvider, PremiumStatus, TierFlags};
pub use controller::{SessionController, SessionSettings};
pub use display::{clean_unit, AdviceView, Headline, HeadlineKind};
pub use state::{AppStep, SessionError, SessionErrorKind, SessionSnapshot, StatusMessage, StepToken};
