//! Photo preparation and the remote welding advisor.

pub mod image_prep;
pub mod prompts;
pub mod types;
pub mod vision;

pub use image_prep::{compress, compress_async, CaptureError, CompressionOptions, ImageData};
pub use types::*;
pub use vision::{Advisor, AdvisorError, AiAdvisor};
