//! Prompts and response schemas for the identification and advice calls.

use super::types::{Language, Machine, Workpiece, DEFAULT_POSITION, DEFAULT_WIRE_DIAMETER};

/// Instruction placed after the machine photo.
pub const MACHINE_IMAGE_INSTRUCTION: &str = "IMAGE 1: Welding machine. Identify the EXACT brand and model. \
If labels are blurry, use visual cues (button layout, screen type, chassis color) to deduce the specific \
series or technical range. Identify the process (MIG, TIG, Stick).";

/// Instruction placed after the workpiece photo.
pub const WORKPIECE_IMAGE_INSTRUCTION: &str =
    "IMAGE 2: Metal parts. Identify material type, thickness, and joint configuration.";

/// JSON schema for the identification response.
pub fn identification_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "machine": {
                "type": "object",
                "properties": {
                    "brand": { "type": "string" },
                    "model": { "type": "string" },
                    "type": { "type": "string", "enum": ["MIG", "TIG", "Stick", "Unknown"] }
                },
                "required": ["brand", "type"]
            },
            "workpiece": {
                "type": "object",
                "properties": {
                    "material": { "type": "string" },
                    "thicknessA": { "type": "string" }
                },
                "required": ["material", "thicknessA"]
            }
        },
        "required": ["machine", "workpiece"]
    })
}

/// Fields of the advice response that are plain optional strings.
pub const ADVICE_STRING_FIELDS: &[&str] = &[
    "machineSetting",
    "machineProcedure",
    "wireSpeed",
    "travelSpeed",
    "gasType",
    "gasFlow",
    "wireType",
    "wireDiameter",
    "electrodeType",
    "electrodeDiameter",
    "fillerMetalType",
    "fillerMetalDiameter",
    "polarity",
    "inductance",
    "preGas",
    "postGas",
    "startCurrent",
    "endCurrent",
    "pulseFrequency",
    "pulseBalance",
    "transferMode",
    "visualInspectionTips",
];

/// JSON schema for the advice response.
pub fn advice_schema() -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    properties.insert("amperage".into(), serde_json::json!({ "type": "string" }));
    properties.insert("voltage".into(), serde_json::json!({ "type": "string" }));
    for field in ADVICE_STRING_FIELDS {
        properties.insert((*field).into(), serde_json::json!({ "type": "string" }));
    }
    properties.insert(
        "detailedSafetyPoints".into(),
        serde_json::json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "category": { "type": "string", "enum": ["EPI", "GAS", "FIRE", "BURN", "AI"] },
                    "title": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["category", "title", "content"]
            }
        }),
    );
    properties.insert(
        "tips".into(),
        serde_json::json!({ "type": "array", "items": { "type": "string" } }),
    );
    properties.insert(
        "alternatives".into(),
        serde_json::json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "processName": { "type": "string" },
                    "description": { "type": "string" },
                    "mainSettings": { "type": "string" }
                }
            }
        }),
    );

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": ["amperage", "voltage", "detailedSafetyPoints", "tips"]
    })
}

/// System instruction for the advice call.
pub fn build_advice_system_instruction(
    machine: &Machine,
    workpiece: &Workpiece,
    language: Language,
) -> String {
    let analog_rule = if workpiece.is_analog {
        "IMPORTANT: This machine has mechanical switches. DO NOT provide abstract voltage/amperage \
numbers alone. YOU MUST identify the switch labels (e.g., A-B range, 1-10 fine) and provide \
instructions like 'Switch 1: B, Switch 2: 4'. If you must give a value, use format: 'Pos B-4 (~18.5V)'."
    } else {
        ""
    };
    let wire = non_empty(&workpiece.mig_wire_diameter).unwrap_or("suggested");

    format!(
        r#"Act as a World-Class Industrial Welding Expert with deep knowledge of equipment datasheets.

STRICT EXPERT RULES:
1. IDENTIFICATION & DATASHEET: Simulate consulting the technical datasheet for {brand} {model}. Use the specific power curves and Duty Cycle of this model.
2. PERFORMANCE CHECK: Verify if thickness {thickness}mm is compatible with this welder's maximum output. If it exceeds capacity or requires extreme duty cycle, add a critical warning in the tips.
3. ANALOG MACHINES (SWITCHES): {analog_rule}
4. LINCOLN POWERTEC SERIES: Use the specific Range + Fine selector logic if identified.
5. SYNERGIC MACHINES: If digital, specify the exact synergic program (e.g., Fe Ar+CO2 0.8mm) to select in the menu.
6. MIG/MAG: Exact wire type (e.g. SG2 / ER70S-6). Use the selected wire diameter: {wire}mm.
7. TIG: Specific Tungsten alloy (color code), diameter, and exact filler rod specification.
8. MMA: Electrode type (Rutile, Basic, Cellulosic) and precise amperage/polarity.
9. GAS: Precise mixture (e.g., Ar 82% + CO2 18%) and exact Flow Rate in L/min.
10. SAFETY: Highlight specific risks (AI technical limitations, UV, high voltage, specialized fumes for stainless).

Output language: {language}. The result must be an IMMEDIATE ACTIONABLE INSTRUCTION for the welder on THEIR machine. Return ONLY JSON."#,
        brand = machine.brand,
        model = machine.model,
        thickness = workpiece.thickness_a,
        analog_rule = analog_rule,
        wire = wire,
        language = language.display_name(),
    )
}

/// Context block for the advice call.
pub fn build_advice_prompt(machine: &Machine, workpiece: &Workpiece) -> String {
    let thickness = match workpiece.second_thickness() {
        Some(b) => format!("{}mm to {}mm", workpiece.thickness_a, b),
        None => format!("{}mm", workpiece.thickness_a),
    };
    let control = if workpiece.is_analog {
        "ANALOG (SWITCHES)"
    } else {
        "DIGITAL/SYNERGIC"
    };

    format!(
        r#"CONTEXT:
- Welder: {brand} {model} ({process})
- Material: {material}
- Thickness: {thickness}
- Position: {position}
- Wire Diameter Input: {wire}mm
- Machine Control Type: {control}

Generate professional welding settings based on the datasheet of this specific machine."#,
        brand = machine.brand,
        model = machine.model,
        process = machine.machine_type,
        material = workpiece.material,
        thickness = thickness,
        position = workpiece.position().unwrap_or(DEFAULT_POSITION),
        wire = non_empty(&workpiece.mig_wire_diameter).unwrap_or(DEFAULT_WIRE_DIAMETER),
        control = control,
    )
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::types::MachineType;

    fn sample_machine() -> Machine {
        Machine {
            brand: "Lincoln".to_string(),
            model: "Powertec 231C".to_string(),
            machine_type: MachineType::Mig,
            specs_url: None,
        }
    }

    #[test]
    fn test_identification_schema_required_fields() {
        let schema = identification_schema();
        let machine_required = schema["properties"]["machine"]["required"].as_array().unwrap();
        assert!(machine_required.contains(&serde_json::json!("brand")));
        assert!(machine_required.contains(&serde_json::json!("type")));

        let types = schema["properties"]["machine"]["properties"]["type"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(types.len(), 4);
    }

    #[test]
    fn test_advice_schema_required_fields() {
        let schema = advice_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["amperage", "voltage", "detailedSafetyPoints", "tips"]);
        assert!(schema["properties"]["alternatives"].is_object());
        assert!(schema["properties"]["transferMode"].is_object());
    }

    #[test]
    fn test_prompt_includes_context() {
        let workpiece = Workpiece {
            material: "Acier".to_string(),
            thickness_a: "3".to_string(),
            ..Workpiece::default()
        };
        let prompt = build_advice_prompt(&sample_machine(), &workpiece);
        assert!(prompt.contains("Lincoln Powertec 231C (MIG)"));
        assert!(prompt.contains("Thickness: 3mm\n"));
        assert!(prompt.contains("Position: PA / 1G"));
        assert!(prompt.contains("Wire Diameter Input: 0.8mm"));
        assert!(prompt.contains("DIGITAL/SYNERGIC"));
    }

    #[test]
    fn test_prompt_includes_second_thickness_and_position() {
        let workpiece = Workpiece {
            material: "Inox".to_string(),
            thickness_a: "3".to_string(),
            thickness_b: Some("5".to_string()),
            welding_position: Some("PF / 3G".to_string()),
            is_analog: true,
            ..Workpiece::default()
        };
        let prompt = build_advice_prompt(&sample_machine(), &workpiece);
        assert!(prompt.contains("3mm to 5mm"));
        assert!(prompt.contains("Position: PF / 3G"));
        assert!(prompt.contains("ANALOG (SWITCHES)"));
    }

    #[test]
    fn test_system_instruction_analog_rule_only_when_analog() {
        let mut workpiece = Workpiece {
            thickness_a: "2".to_string(),
            ..Workpiece::default()
        };
        let digital = build_advice_system_instruction(&sample_machine(), &workpiece, Language::En);
        assert!(!digital.contains("mechanical switches"));
        assert!(digital.contains("Output language: English"));

        workpiece.is_analog = true;
        let analog = build_advice_system_instruction(&sample_machine(), &workpiece, Language::De);
        assert!(analog.contains("mechanical switches"));
        assert!(analog.contains("Output language: German"));
    }
}
