use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::analyzer::image_prep::ImageData;
use crate::analyzer::types::{Advice, Machine, Workpiece};

/// Entries addressable by id inside a bounded log.
pub trait Keyed {
    fn id(&self) -> &str;
}

/// A completed session: what was welded and the advice received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageData>,
    pub machine: Machine,
    pub workpiece: Workpiece,
    pub advice: Advice,
}

impl HistoryEntry {
    pub fn new(
        image: Option<ImageData>,
        machine: Machine,
        workpiece: Workpiece,
        advice: Advice,
    ) -> Self {
        let (id, timestamp) = new_entry_id();
        Self {
            id,
            timestamp,
            image,
            machine,
            workpiece,
            advice,
        }
    }
}

impl Keyed for HistoryEntry {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A photographed machine that can be reused for a later session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMachineEntry {
    pub id: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub date: i64,
    pub image: ImageData,
    pub machine_data: Machine,
}

impl SavedMachineEntry {
    pub fn new(image: ImageData, machine_data: Machine) -> Self {
        let (id, date) = new_entry_id();
        Self {
            id,
            date,
            image,
            machine_data,
        }
    }
}

impl Keyed for SavedMachineEntry {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Id derived from the creation time plus a random suffix, and that time.
pub fn new_entry_id() -> (String, i64) {
    let millis = Utc::now().timestamp_millis();
    (format!("{}-{:04x}", millis, rand::random::<u16>()), millis)
}
