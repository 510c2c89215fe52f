//! Domain types exchanged with the advisor service and persisted in history.
//!
//! JSON field names follow the remote schema (camelCase), so the same types
//! serve as the wire format and the storage format.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Brand used when identification produced nothing usable.
pub const FALLBACK_BRAND: &str = "Inconnu";
/// Material used when identification produced nothing usable.
pub const FALLBACK_MATERIAL: &str = "Acier";
/// Thickness (mm) used when identification produced nothing usable.
pub const FALLBACK_THICKNESS: &str = "2";
/// Brand shown while the machine photo is waiting for identification.
pub const PLACEHOLDER_BRAND: &str = "Identification...";
/// MIG wire diameter (mm) applied to every freshly identified workpiece.
pub const DEFAULT_WIRE_DIAMETER: &str = "0.8";
/// Welding position assumed by the advice prompt when none is given.
pub const DEFAULT_POSITION: &str = "PA / 1G";

/// Welding process family of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MachineType {
    #[default]
    Mig,
    Tig,
    Stick,
    Unknown,
}

impl MachineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineType::Mig => "MIG",
            MachineType::Tig => "TIG",
            MachineType::Stick => "Stick",
            MachineType::Unknown => "Unknown",
        }
    }

    /// Human-readable process label.
    pub fn process_name(&self) -> &'static str {
        match self {
            MachineType::Mig => "MIG / MAG",
            MachineType::Tig => "TIG",
            MachineType::Stick => "Stick (MMA)",
            MachineType::Unknown => "Unknown process",
        }
    }
}

impl From<String> for MachineType {
    fn from(value: String) -> Self {
        match value.trim().to_uppercase().as_str() {
            "MIG" | "MAG" | "MIG/MAG" => MachineType::Mig,
            "TIG" => MachineType::Tig,
            "STICK" | "MMA" | "ARC" => MachineType::Stick,
            _ => MachineType::Unknown,
        }
    }
}

impl From<MachineType> for String {
    fn from(value: MachineType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A welding machine as identified from a photo or entered by the user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Machine {
    pub brand: String,
    pub model: String,
    #[serde(rename = "type")]
    pub machine_type: MachineType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specs_url: Option<String>,
}

impl Machine {
    /// A MIG machine known only by its brand (manual entry, placeholders).
    pub fn with_brand(brand: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            model: String::new(),
            machine_type: MachineType::Mig,
            specs_url: None,
        }
    }

    pub fn placeholder() -> Self {
        Self::with_brand(PLACEHOLDER_BRAND)
    }

    pub fn fallback() -> Self {
        Self::with_brand(FALLBACK_BRAND)
    }
}

/// The parts to be welded plus the user's machine-side choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workpiece {
    pub material: String,
    pub thickness_a: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thickness_b: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welding_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joint_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filler_metal_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filler_metal_diameter: Option<String>,
    pub mig_wire_diameter: String,
    pub is_analog: bool,
}

impl Default for Workpiece {
    fn default() -> Self {
        Self {
            material: String::new(),
            thickness_a: String::new(),
            thickness_b: None,
            welding_position: None,
            joint_type: None,
            filler_metal_type: None,
            filler_metal_diameter: None,
            mig_wire_diameter: DEFAULT_WIRE_DIAMETER.to_string(),
            is_analog: false,
        }
    }
}

impl Workpiece {
    pub fn fallback() -> Self {
        Self {
            material: FALLBACK_MATERIAL.to_string(),
            thickness_a: FALLBACK_THICKNESS.to_string(),
            ..Self::default()
        }
    }

    /// Copy with the advanced-only fields (second thickness, position) cleared.
    pub fn without_advanced_fields(&self) -> Self {
        Self {
            thickness_b: None,
            welding_position: None,
            ..self.clone()
        }
    }

    fn blank_to_none(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn second_thickness(&self) -> Option<&str> {
        Self::blank_to_none(&self.thickness_b)
    }

    pub fn position(&self) -> Option<&str> {
        Self::blank_to_none(&self.welding_position)
    }
}

/// Machine and workpiece as returned by the identification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub machine: Machine,
    pub workpiece: Workpiece,
}

impl Identification {
    pub fn fallback() -> Self {
        Self {
            machine: Machine::fallback(),
            workpiece: Workpiece::fallback(),
        }
    }
}

/// Category of a safety point; unknown categories are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SafetyCategory {
    Epi,
    Gas,
    Fire,
    Burn,
    Ai,
    Other(String),
}

impl From<String> for SafetyCategory {
    fn from(value: String) -> Self {
        match value.trim().to_uppercase().as_str() {
            "EPI" => SafetyCategory::Epi,
            "GAS" => SafetyCategory::Gas,
            "FIRE" => SafetyCategory::Fire,
            "BURN" => SafetyCategory::Burn,
            "AI" => SafetyCategory::Ai,
            _ => SafetyCategory::Other(value),
        }
    }
}

impl From<SafetyCategory> for String {
    fn from(value: SafetyCategory) -> Self {
        match value {
            SafetyCategory::Epi => "EPI".to_string(),
            SafetyCategory::Gas => "GAS".to_string(),
            SafetyCategory::Fire => "FIRE".to_string(),
            SafetyCategory::Burn => "BURN".to_string(),
            SafetyCategory::Ai => "AI".to_string(),
            SafetyCategory::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyPoint {
    pub category: SafetyCategory,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlternativeProcess {
    pub process_name: String,
    pub description: String,
    pub main_settings: String,
}

/// Welding parameters and guidance produced by the advice call.
///
/// Every optional field is defaulted once when the response is mapped, so
/// consumers never have to check for absence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Advice {
    pub amperage: String,
    pub voltage: String,
    pub machine_setting: String,
    pub machine_procedure: String,
    pub wire_speed: String,
    pub travel_speed: String,
    pub gas_type: String,
    pub gas_flow: String,
    pub electrode_type: String,
    pub electrode_diameter: String,
    pub wire_type: String,
    pub wire_diameter: String,
    pub filler_metal_type: String,
    pub filler_metal_diameter: String,
    pub polarity: String,
    pub inductance: String,
    pub pre_gas: String,
    pub post_gas: String,
    pub start_current: String,
    pub end_current: String,
    pub pulse_frequency: String,
    pub pulse_balance: String,
    pub transfer_mode: String,
    pub visual_inspection_tips: String,
    pub detailed_safety_points: Vec<SafetyPoint>,
    pub safety_precautions: String,
    pub tips: Vec<String>,
    pub alternatives: Vec<AlternativeProcess>,
}

/// Output language of the advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Fr,
    En,
    Es,
    De,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Fr, Language::En, Language::Es, Language::De];

    /// English name of the language, as given to the advice prompt.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Fr => "French",
            Language::En => "English",
            Language::Es => "Spanish",
            Language::De => "German",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::Fr => "fr",
            Language::En => "en",
            Language::Es => "es",
            Language::De => "de",
        }
    }
}
