//! OpenAI-compatible audio endpoints (`/audio/transcriptions`, `/audio/speech`).
//!
//! Works with faster-whisper servers, Kokoro-FastAPI, Speaches and the
//! OpenAI API itself.

use async_trait::async_trait;
use jarvis_config::SpeechEndpoint;
use jarvis_core::error::VoiceError;
use jarvis_core::voice::{AudioInput, Synthesizer, Transcriber};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::markdown::strip_markdown;

/// Below this many bytes an upload is treated as silence.
pub const MIN_AUDIO_BYTES: usize = 3200;

fn client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn request_failed(e: reqwest::Error) -> VoiceError {
    VoiceError::RequestFailed(e.to_string())
}

/// Speech-to-text over HTTP.
pub struct HttpTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTranscriber {
    pub fn new(base_url: &str, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: client(Duration::from_secs(60)),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }

    pub fn from_endpoint(endpoint: &SpeechEndpoint) -> Self {
        Self::new(&endpoint.base_url, endpoint.api_key.clone(), endpoint.model.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    fn name(&self) -> &str {
        "http"
    }

    async fn transcribe(&self, audio: AudioInput) -> Result<String, VoiceError> {
        if audio.bytes.len() < MIN_AUDIO_BYTES {
            debug!(bytes = audio.bytes.len(), "Audio too short to transcribe");
            return Ok(String::new());
        }

        let format = if audio.format.is_empty() { "webm" } else { audio.format.as_str() };
        let part = Part::bytes(audio.bytes)
            .file_name(format!("audio.{format}"))
            .mime_str(&format!("audio/{format}"))
            .map_err(request_failed)?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(lang) = audio.language {
            form = form.text("language", lang);
        }

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(request_failed)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::RequestFailed(format!("ASR returned {status}: {body}")));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::InvalidResponse(e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}

/// Text-to-speech over HTTP. Returns WAV bytes.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
}

impl HttpSynthesizer {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            client: client(Duration::from_secs(120)),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            voice: voice.into(),
        }
    }

    pub fn from_endpoint(endpoint: &SpeechEndpoint) -> Self {
        Self::new(
            &endpoint.base_url,
            endpoint.api_key.clone(),
            endpoint.model.clone(),
            endpoint.voice.clone().unwrap_or_else(|| "alloy".into()),
        )
    }

    fn request_body(&self, text: &str, language: Option<&str>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "wav",
        });
        if let Some(lang) = language {
            body["lang_code"] = serde_json::Value::String(lang.to_string());
        }
        body
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    fn name(&self) -> &str {
        "http"
    }

    async fn synthesize(&self, text: &str, language: Option<&str>) -> Result<Vec<u8>, VoiceError> {
        let spoken = strip_markdown(text);
        if spoken.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .json(&self.request_body(&spoken, language));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(request_failed)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "TTS request rejected");
            return Err(VoiceError::RequestFailed(format!("TTS returned {status}: {body}")));
        }

        let bytes = response.bytes().await.map_err(request_failed)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEAD: &str = "http://127.0.0.1:9/v1";

    fn audio(len: usize) -> AudioInput {
        AudioInput {
            bytes: vec![0; len],
            format: "wav".into(),
            language: Some("en".into()),
        }
    }

    #[tokio::test]
    async fn short_audio_is_silence_without_a_request() {
        let asr = HttpTranscriber::new(DEAD, None, "whisper-1");
        assert_eq!(asr.transcribe(audio(100)).await.unwrap(), "");
    }

    #[tokio::test]
    async fn unreachable_asr_is_a_request_failure() {
        let asr = HttpTranscriber::new(DEAD, None, "whisper-1");
        let err = asr.transcribe(audio(MIN_AUDIO_BYTES)).await.unwrap_err();
        assert!(matches!(err, VoiceError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn markup_only_text_synthesizes_nothing() {
        let tts = HttpSynthesizer::new(DEAD, None, "kokoro", "af_heart");
        assert!(tts.synthesize("**  **", None).await.unwrap().is_empty());
    }

    #[test]
    fn speech_body_shape() {
        let tts = HttpSynthesizer::new("http://tts/v1/", None, "kokoro", "af_heart");
        assert_eq!(tts.base_url, "http://tts/v1");
        let body = tts.request_body("Hello", Some("en"));
        assert_eq!(body["response_format"], "wav");
        assert_eq!(body["voice"], "af_heart");
        assert_eq!(body["lang_code"], "en");
        assert!(tts.request_body("Hello", None).get("lang_code").is_none());
    }
}
