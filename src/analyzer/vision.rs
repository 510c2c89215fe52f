//! Remote advisor: identification and advice calls against a vision model.
//!
//! Follows the provider-dispatch pattern of the filament extraction client:
//! one request builder per provider, a shared response check, and a single
//! attempt per call. Identification never fails towards the caller; advice
//! errors are propagated.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;
use tracing::{error, info, warn};

use super::image_prep::media_type_of;
use super::prompts::{
    advice_schema, build_advice_prompt, build_advice_system_instruction, identification_schema,
    MACHINE_IMAGE_INSTRUCTION, WORKPIECE_IMAGE_INSTRUCTION,
};
use super::types::{
    Advice, AlternativeProcess, Identification, Language, Machine, SafetyPoint, Workpiece,
};
use crate::config::{AppConfig, Provider};
use crate::session::capability::TierFlags;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("No API key configured for '{0}'")]
    MissingApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Advisor request timed out after {0}s")]
    Timeout(u64),

    #[error("Advisor request failed: {0}")]
    Transport(String),

    #[error("Advisor API error: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Malformed advisor response: {0}")]
    MalformedResponse(String),

    #[error("Advisor response is missing required field '{0}'")]
    MissingField(&'static str),
}

/// The two request/response operations the session relies on.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Identify the machine and workpiece from two compressed photos.
    async fn identify(
        &self,
        machine_image: &[u8],
        workpiece_image: &[u8],
    ) -> Result<Identification, AdvisorError>;

    /// Derive welding parameters for a confirmed machine and workpiece.
    async fn advise(
        &self,
        machine: &Machine,
        workpiece: &Workpiece,
        language: Language,
        tier: TierFlags,
    ) -> Result<Advice, AdvisorError>;
}

/// Locate the JSON object inside a model reply that may carry prose or code
/// fences: everything from the first `{` to the last `}`, or `{}`.
pub fn extract_json_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => "{}",
    }
}

/// Map an identification reply to entities, substituting the fallback for
/// any part that is missing or unusable.
pub fn parse_identification(text: &str) -> Identification {
    let fallback = Identification::fallback();
    let json: serde_json::Value = match serde_json::from_str(extract_json_object(text)) {
        Ok(json) => json,
        Err(e) => {
            warn!("Identification reply is not valid JSON, using fallback: {}", e);
            return fallback;
        }
    };

    let machine = json
        .get("machine")
        .filter(|m| m.is_object())
        .and_then(|m| serde_json::from_value::<Machine>(m.clone()).ok())
        .unwrap_or(fallback.machine);
    let workpiece = json
        .get("workpiece")
        .filter(|w| w.is_object())
        .and_then(|w| serde_json::from_value::<Workpiece>(w.clone()).ok())
        .unwrap_or(fallback.workpiece);

    Identification { machine, workpiece }
}

/// Map an advice reply to [`Advice`], applying every default in one place.
pub fn map_response_to_advice(
    json: &serde_json::Value,
    tier: TierFlags,
) -> Result<Advice, AdvisorError> {
    let amperage = scalar_string(&json["amperage"]).ok_or(AdvisorError::MissingField("amperage"))?;
    let voltage = scalar_string(&json["voltage"]).ok_or(AdvisorError::MissingField("voltage"))?;
    let safety_json = json["detailedSafetyPoints"]
        .as_array()
        .ok_or(AdvisorError::MissingField("detailedSafetyPoints"))?;
    let tips_json = json["tips"]
        .as_array()
        .ok_or(AdvisorError::MissingField("tips"))?;

    let detailed_safety_points: Vec<SafetyPoint> = safety_json
        .iter()
        .filter_map(|p| match serde_json::from_value(p.clone()) {
            Ok(point) => Some(point),
            Err(e) => {
                warn!("Dropping malformed safety point: {}", e);
                None
            }
        })
        .collect();
    let tips = tips_json.iter().filter_map(scalar_string).collect();

    let alternatives: Vec<AlternativeProcess> = if tier.advanced {
        json["alternatives"]
            .as_array()
            .map(|alts| {
                alts.iter()
                    .filter_map(|a| serde_json::from_value(a.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let field = |name: &str| scalar_string(&json[name]).unwrap_or_default();

    Ok(Advice {
        amperage,
        voltage,
        machine_setting: field("machineSetting"),
        machine_procedure: field("machineProcedure"),
        wire_speed: field("wireSpeed"),
        travel_speed: field("travelSpeed"),
        gas_type: field("gasType"),
        gas_flow: field("gasFlow"),
        electrode_type: field("electrodeType"),
        electrode_diameter: field("electrodeDiameter"),
        wire_type: field("wireType"),
        wire_diameter: field("wireDiameter"),
        filler_metal_type: field("fillerMetalType"),
        filler_metal_diameter: field("fillerMetalDiameter"),
        polarity: field("polarity"),
        inductance: field("inductance"),
        pre_gas: field("preGas"),
        post_gas: field("postGas"),
        start_current: field("startCurrent"),
        end_current: field("endCurrent"),
        pulse_frequency: field("pulseFrequency"),
        pulse_balance: field("pulseBalance"),
        transfer_mode: field("transferMode"),
        visual_inspection_tips: field("visualInspectionTips"),
        detailed_safety_points,
        safety_precautions: field("safetyPrecautions"),
        tips,
        alternatives,
    })
}

/// Strings pass through, numbers and booleans are rendered, anything else is absent.
fn scalar_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Gemini's response schema uses upper-case OpenAPI type names.
fn to_gemini_schema(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let converted = match (k.as_str(), v) {
                    ("type", serde_json::Value::String(t)) => {
                        serde_json::Value::String(t.to_uppercase())
                    }
                    _ => to_gemini_schema(v),
                };
                (k.clone(), converted)
            })
            .collect::<serde_json::Map<_, _>>()
            .into(),
        serde_json::Value::Array(items) => items.iter().map(to_gemini_schema).collect(),
        other => other.clone(),
    }
}

/// One part of a multimodal request.
enum Part<'a> {
    Image(&'a [u8]),
    Text(&'a str),
}

/// HTTP advisor backed by a hosted vision model.
pub struct AiAdvisor {
    provider: Provider,
    api_key: String,
    identify_model: String,
    advice_model: String,
    timeout_secs: u64,
    endpoint: String,
    client: reqwest::Client,
}

impl AiAdvisor {
    pub fn new(
        provider: Provider,
        api_key: impl Into<String>,
        identify_model: impl Into<String>,
        advice_model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, AdvisorError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AdvisorError::MissingApiKey(provider.as_str().to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AdvisorError::Client(e.to_string()))?;

        Ok(Self {
            provider,
            api_key,
            identify_model: identify_model.into(),
            advice_model: advice_model.into(),
            timeout_secs,
            endpoint: provider.default_endpoint().to_string(),
            client,
        })
    }

    /// Send requests to `endpoint` instead of the provider's public API.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Build the advisor for the configured provider with the given key.
    pub fn from_config(config: &AppConfig, api_key: impl Into<String>) -> Result<Self, AdvisorError> {
        Self::new(
            config.provider,
            api_key,
            config.identify_model(),
            config.advice_model(),
            config.request_timeout_secs,
        )
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    async fn generate(
        &self,
        model: &str,
        system: Option<&str>,
        parts: &[Part<'_>],
        schema: &serde_json::Value,
    ) -> Result<String, AdvisorError> {
        match self.provider {
            Provider::Gemini => self.call_gemini(model, system, parts, schema).await,
            Provider::Claude => self.call_claude(model, system, parts, schema).await,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> AdvisorError {
        let err = if e.is_timeout() {
            AdvisorError::Timeout(self.timeout_secs)
        } else {
            AdvisorError::Transport(format!("{} ({})", e, self.provider.as_str()))
        };
        error!("{}", err);
        err
    }

    async fn call_gemini(
        &self,
        model: &str,
        system: Option<&str>,
        parts: &[Part<'_>],
        schema: &serde_json::Value,
    ) -> Result<String, AdvisorError> {
        let parts_json: Vec<serde_json::Value> = parts
            .iter()
            .map(|part| match part {
                Part::Image(bytes) => serde_json::json!({
                    "inline_data": { "mime_type": media_type_of(bytes), "data": STANDARD.encode(bytes) }
                }),
                Part::Text(text) => serde_json::json!({ "text": text }),
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": parts_json }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": to_gemini_schema(schema)
            }
        });
        if let Some(system) = system {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }

        let response = self
            .client
            .post(format!("{}/{}:generateContent", self.endpoint, model))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let resp_json = handle_api_response(response).await?;

        // { "candidates": [{ "content": { "parts": [{ "text": "..." }] } }] }
        let text: String = resp_json["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(AdvisorError::MalformedResponse(
                "No text content in Gemini response".to_string(),
            ));
        }
        Ok(text)
    }

    async fn call_claude(
        &self,
        model: &str,
        system: Option<&str>,
        parts: &[Part<'_>],
        schema: &serde_json::Value,
    ) -> Result<String, AdvisorError> {
        let mut content: Vec<serde_json::Value> = parts
            .iter()
            .map(|part| match part {
                Part::Image(bytes) => serde_json::json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": media_type_of(bytes), "data": STANDARD.encode(bytes) }
                }),
                Part::Text(text) => serde_json::json!({ "type": "text", "text": text }),
            })
            .collect();
        // No schema enforcement on this API, so the schema goes into the prompt
        content.push(serde_json::json!({
            "type": "text",
            "text": format!("Respond with valid JSON only, matching this schema: {}", schema)
        }));

        let body = serde_json::json!({
            "model": model,
            "max_tokens": 2048,
            "system": system.unwrap_or("You are a welding equipment expert. Always respond with valid JSON only."),
            "messages": [{ "role": "user", "content": content }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let resp_json = handle_api_response(response).await?;

        // { "content": [{ "type": "text", "text": "..." }] }
        resp_json["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AdvisorError::MalformedResponse("No text content in Claude response".to_string())
            })
    }
}

/// Check the status and parse the provider's response wrapper.
async fn handle_api_response(response: reqwest::Response) -> Result<serde_json::Value, AdvisorError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AdvisorError::Transport(format!("Failed to read response body: {}", e)))?;

    if !status.is_success() {
        let truncated = if body.len() > 1024 {
            format!("{}...", body.chars().take(1024).collect::<String>())
        } else {
            body
        };
        let err = AdvisorError::Http {
            status: status.as_u16(),
            body: truncated,
        };
        error!("{}", err);
        return Err(err);
    }

    serde_json::from_str(&body).map_err(|e| {
        let err = AdvisorError::MalformedResponse(format!("Response wrapper is not JSON: {}", e));
        error!("{}", err);
        err
    })
}

#[async_trait]
impl Advisor for AiAdvisor {
    async fn identify(
        &self,
        machine_image: &[u8],
        workpiece_image: &[u8],
    ) -> Result<Identification, AdvisorError> {
        info!(
            "Identifying machine and workpiece with {} model '{}'",
            self.provider.as_str(),
            self.identify_model
        );
        let parts = [
            Part::Image(machine_image),
            Part::Text(MACHINE_IMAGE_INSTRUCTION),
            Part::Image(workpiece_image),
            Part::Text(WORKPIECE_IMAGE_INSTRUCTION),
        ];

        match self
            .generate(&self.identify_model, None, &parts, &identification_schema())
            .await
        {
            Ok(text) => {
                let identification = parse_identification(&text);
                info!(
                    "Identified machine '{} {}' ({}), material '{}'",
                    identification.machine.brand,
                    identification.machine.model,
                    identification.machine.machine_type,
                    identification.workpiece.material
                );
                Ok(identification)
            }
            Err(e) => {
                warn!("Identification failed, using fallback entities: {}", e);
                Ok(Identification::fallback())
            }
        }
    }

    async fn advise(
        &self,
        machine: &Machine,
        workpiece: &Workpiece,
        language: Language,
        tier: TierFlags,
    ) -> Result<Advice, AdvisorError> {
        info!(
            "Requesting advice for '{} {}' on {} {}mm ({}), advanced={}",
            machine.brand,
            machine.model,
            workpiece.material,
            workpiece.thickness_a,
            language.code(),
            tier.advanced
        );
        let system = build_advice_system_instruction(machine, workpiece, language);
        let prompt = build_advice_prompt(machine, workpiece);

        let text = self
            .generate(&self.advice_model, Some(&system), &[Part::Text(&prompt)], &advice_schema())
            .await?;

        let json: serde_json::Value =
            serde_json::from_str(extract_json_object(&text)).map_err(|e| {
                let err = AdvisorError::MalformedResponse(e.to_string());
                error!("{}", err);
                err
            })?;

        let advice = map_response_to_advice(&json, tier)?;
        info!(
            "Advice received: {} safety points, {} tips, {} alternatives",
            advice.detailed_safety_points.len(),
            advice.tips.len(),
            advice.alternatives.len()
        );
        Ok(advice)
    }
}
