use serde::Serialize;

use super::capability::TierFlags;
use crate::analyzer::types::{Advice, AlternativeProcess, MachineType, SafetyPoint};

/// Safety points shown on the results screen.
pub const MAX_SAFETY_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeadlineKind {
    Voltage,
    Amperage,
}

/// The main setting of the results screen: voltage for MIG, amperage for
/// every other process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Headline {
    pub kind: HeadlineKind,
    pub value: String,
    pub unit: &'static str,
}

/// What the results screen may show for an advice under a given tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdviceView<'a> {
    pub headline: Headline,
    pub process: &'static str,
    pub safety_points: &'a [SafetyPoint],
    pub tips: &'a [String],
    /// Tips exist but need the advanced tier.
    pub tips_locked: bool,
    pub alternatives: &'a [AlternativeProcess],
}

impl<'a> AdviceView<'a> {
    pub fn new(advice: &'a Advice, tier: TierFlags, machine_type: MachineType) -> Self {
        let headline = if machine_type == MachineType::Mig {
            Headline {
                kind: HeadlineKind::Voltage,
                value: clean_unit(&advice.voltage, "V"),
                unit: "V",
            }
        } else {
            Headline {
                kind: HeadlineKind::Amperage,
                value: clean_unit(&advice.amperage, "A"),
                unit: "A",
            }
        };

        let safety_len = advice.detailed_safety_points.len().min(MAX_SAFETY_POINTS);
        let (tips, tips_locked) = if tier.advanced {
            (advice.tips.as_slice(), false)
        } else {
            (&advice.tips[..0], !advice.tips.is_empty())
        };
        let alternatives = if tier.advanced {
            advice.alternatives.as_slice()
        } else {
            &advice.alternatives[..0]
        };

        Self {
            headline,
            process: machine_type.process_name(),
            safety_points: &advice.detailed_safety_points[..safety_len],
            tips,
            tips_locked,
            alternatives,
        }
    }
}

/// Strip every occurrence of `unit` (ASCII case-insensitive, with the
/// whitespace before it) from a remote value, e.g. `"120 A"` -> `"120"`.
pub fn clean_unit(value: &str, unit: &str) -> String {
    let value = value.trim();
    if unit.is_empty() {
        return value.to_string();
    }

    // ASCII lowercasing keeps byte offsets aligned with `value`
    let haystack = value.to_ascii_lowercase();
    let needle = unit.to_ascii_lowercase();
    let mut out = String::with_capacity(value.len());
    let mut rest = 0;
    while let Some(pos) = haystack[rest..].find(&needle) {
        let start = rest + pos;
        out.push_str(value[rest..start].trim_end());
        rest = start + needle.len();
    }
    out.push_str(&value[rest..]);
    out.trim().to_string()
}
