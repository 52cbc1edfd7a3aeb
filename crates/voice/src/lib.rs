//! Speech services for Jarvis.
//!
//! Both directions speak the OpenAI audio API. When an endpoint is disabled
//! the no-op implementation stands in, so the gateway never branches on
//! configuration.

pub mod http;
pub mod markdown;

use async_trait::async_trait;
use jarvis_config::VoiceConfig;
use jarvis_core::error::VoiceError;
use jarvis_core::voice::{AudioInput, Synthesizer, Transcriber};
use std::sync::Arc;
use tracing::info;

pub use http::{HttpSynthesizer, HttpTranscriber};
pub use markdown::strip_markdown;

/// Transcriber used when ASR is disabled: understands nothing.
pub struct NoopTranscriber;

#[async_trait]
impl Transcriber for NoopTranscriber {
    fn name(&self) -> &str {
        "noop"
    }

    async fn transcribe(&self, _audio: AudioInput) -> Result<String, VoiceError> {
        Ok(String::new())
    }
}

/// Synthesizer used when TTS is disabled: replies stay text-only.
pub struct NoopSynthesizer;

#[async_trait]
impl Synthesizer for NoopSynthesizer {
    fn name(&self) -> &str {
        "noop"
    }

    async fn synthesize(&self, _text: &str, _language: Option<&str>) -> Result<Vec<u8>, VoiceError> {
        Ok(Vec::new())
    }
}

/// The pair of speech collaborators handed to the gateway.
#[derive(Clone)]
pub struct VoiceServices {
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl VoiceServices {
    pub fn disabled() -> Self {
        Self {
            transcriber: Arc::new(NoopTranscriber),
            synthesizer: Arc::new(NoopSynthesizer),
        }
    }
}

/// Build speech services from the `[voice]` section.
pub fn build_from_config(config: &VoiceConfig) -> VoiceServices {
    let transcriber: Arc<dyn Transcriber> = if config.asr.enabled {
        info!(url = %config.asr.base_url, model = %config.asr.model, "ASR enabled");
        Arc::new(HttpTranscriber::from_endpoint(&config.asr))
    } else {
        Arc::new(NoopTranscriber)
    };

    let synthesizer: Arc<dyn Synthesizer> = if config.tts.enabled {
        info!(url = %config.tts.base_url, model = %config.tts.model, "TTS enabled");
        Arc::new(HttpSynthesizer::from_endpoint(&config.tts))
    } else {
        Arc::new(NoopSynthesizer)
    };

    VoiceServices {
        transcriber,
        synthesizer,
    }
}
