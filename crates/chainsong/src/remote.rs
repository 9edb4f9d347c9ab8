//! Generator backed by a model service over HTTP.
//!
//! The service takes the primer as base64 MIDI and returns the generated
//! sequence the same way. Everything else about the model (bundle loading,
//! sampling) happens on the service side.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::capabilities::{GenerationOptions, GenerationRequest, Generator};
use crate::error::{ChainError, Result};
use crate::midi;
use crate::sequence::Sequence;

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    bundle: &'a str,
    bundle_path: String,
    generator_id: &'a str,
    qpm: f64,
    steps_per_quarter: u32,
    options: &'a GenerationOptions,
    primer_midi: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    midi_base64: Option<String>,
}

/// Calls `POST {endpoint}/generate` for each stage.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerator {
    /// `timeout` of `None` waits as long as the model takes.
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build from the `[generator]` config section; `timeout_secs = 0` means no timeout.
    pub fn from_config(config: &chainconf::GeneratorConfig) -> reqwest::Result<Self> {
        let timeout = (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs));
        Self::new(&config.endpoint, timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Sequence> {
        let stage = request.stage;
        let failed = |message: String| ChainError::Generation { stage, message };

        // A primer without a tempo is sent at the tempo its window was computed in.
        let primer_bytes = if request.primer.tempos.is_empty() {
            midi::encode(&request.primer.clone().with_tempo(request.time_base.qpm))?
        } else {
            midi::encode(request.primer)?
        };
        let body = GenerateBody {
            bundle: &request.bundle.name,
            bundle_path: request.bundle.path.display().to_string(),
            generator_id: request.generator_id,
            qpm: request.time_base.qpm,
            steps_per_quarter: request.time_base.steps_per_quarter,
            options: request.options,
            primer_midi: BASE64.encode(primer_bytes),
        };

        let url = format!("{}/generate", self.endpoint);
        tracing::debug!(stage, url = %url, bundle = %request.bundle.name, "calling generator");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(format!("failed to call generator at {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(failed(format!("generator error {status}: {error_body}")));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| failed(format!("failed to parse generator response: {e}")))?;
        let midi_b64 = parsed
            .midi_base64
            .ok_or_else(|| failed("generator response missing midi_base64 field".to_string()))?;
        let midi_bytes = BASE64
            .decode(midi_b64)
            .map_err(|e| failed(format!("failed to decode generated MIDI: {e}")))?;

        midi::decode(&midi_bytes)
            .map_err(|e| failed(format!("generator returned invalid MIDI: {e}")))
    }
}
