//! Speech collaborators.
//!
//! Both services are best-effort: an empty transcription means "could not
//! understand", and a failed synthesis degrades the reply to text only.

use async_trait::async_trait;

use crate::error::VoiceError;

/// Audio accompanying a transcription request.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub bytes: Vec<u8>,
    /// Container format as sent by the client (e.g., "webm", "wav")
    pub format: String,
    /// Spoken language hint (ISO 639-1), if known
    pub language: Option<String>,
}

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe audio to text. An empty string means nothing was understood.
    async fn transcribe(&self, audio: AudioInput) -> std::result::Result<String, VoiceError>;
}

/// Text-to-speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Synthesize speech. An empty buffer means nothing to play.
    async fn synthesize(
        &self,
        text: &str,
        language: Option<&str>,
    ) -> std::result::Result<Vec<u8>, VoiceError>;
}
