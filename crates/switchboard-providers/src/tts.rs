//! Text-to-speech providers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::http::{classify_status, classify_transport};
use crate::types::{HealthReport, ProviderResponse, UsageUnits};

#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub voice: Option<String>,
    /// Output container ("mp3", "wav", "ogg").
    pub format: String,
    pub timeout: Duration,
}

impl TtsRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            format: "mp3".to_string(),
            timeout: Duration::from_secs(switchboard_core::config::TTS_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub bytes: Vec<u8>,
    pub format: String,
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, req: &TtsRequest) -> ProviderResponse<TtsAudio>;

    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        let start = std::time::Instant::now();
        match self.ping().await {
            Ok(()) => HealthReport::healthy(start.elapsed().as_millis() as u64),
            Err(detail) => HealthReport::unavailable(detail),
        }
    }
}

/// Shared body of every HTTP TTS call: POST, check status, collect bytes.
/// Usage is billed in characters synthesized.
async fn post_audio(
    name: &str,
    builder: reqwest::RequestBuilder,
    chars: usize,
    format: &str,
) -> ProviderResponse<TtsAudio> {
    let response = match builder.send().await {
        Ok(r) => r,
        Err(e) => return ProviderResponse::fail(name, classify_transport(&e), e.to_string()),
    };
    if !response.status().is_success() {
        let kind = classify_status(response.status());
        let detail = response.text().await.unwrap_or_default();
        return ProviderResponse::fail(name, kind, detail);
    }
    match response.bytes().await {
        Ok(bytes) => ProviderResponse::ok(
            name,
            TtsAudio {
                bytes: bytes.to_vec(),
                format: format.to_string(),
            },
            Some(UsageUnits {
                prompt_units: chars as u64,
                completion_units: 0,
            }),
        ),
        Err(e) => ProviderResponse::fail(name, classify_transport(&e), e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiTts {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl TtsProvider for OpenAiTts {
    fn name(&self) -> &str {
        "openai"
    }

    async fn execute(&self, req: &TtsRequest) -> ProviderResponse<TtsAudio> {
        let builder = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(&self.api_key)
            .timeout(req.timeout)
            .json(&json!({
                "model": "tts-1",
                "input": req.text,
                "voice": req.voice.as_deref().unwrap_or("alloy"),
                "response_format": req.format,
            }));
        post_audio(self.name(), builder, req.text.len(), &req.format).await
    }
}

// ---------------------------------------------------------------------------
// Kokoro (self-hosted)
// ---------------------------------------------------------------------------

pub struct KokoroTts {
    client: reqwest::Client,
    base_url: String,
}

impl KokoroTts {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| {
                std::env::var("KOKORO_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:8880".to_string())
            }),
        }
    }
}

#[async_trait]
impl TtsProvider for KokoroTts {
    fn name(&self) -> &str {
        "kokoro"
    }

    async fn execute(&self, req: &TtsRequest) -> ProviderResponse<TtsAudio> {
        let builder = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .timeout(req.timeout)
            .json(&json!({
                "model": "kokoro",
                "input": req.text,
                "voice": req.voice.as_deref().unwrap_or("af_heart"),
                "response_format": req.format,
            }));
        post_audio(self.name(), builder, req.text.len(), &req.format).await
    }

    async fn ping(&self) -> Result<(), String> {
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(
                switchboard_core::config::HEALTH_TIMEOUT_SECS,
            ))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// ElevenLabs
// ---------------------------------------------------------------------------

pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: String,
}

impl ElevenLabsTts {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn execute(&self, req: &TtsRequest) -> ProviderResponse<TtsAudio> {
        let voice = req.voice.as_deref().unwrap_or("21m00Tcm4TlvDq8ikWAM");
        let builder = self
            .client
            .post(format!(
                "https://api.elevenlabs.io/v1/text-to-speech/{}",
                voice
            ))
            .header("xi-api-key", &self.api_key)
            .timeout(req.timeout)
            .json(&json!({
                "text": req.text,
                "model_id": "eleven_multilingual_v2",
            }));
        post_audio(self.name(), builder, req.text.len(), "mp3").await
    }
}
