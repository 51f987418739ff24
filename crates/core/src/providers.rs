//! External provider interfaces
//!
//! The broker never transcribes, translates, or synthesizes itself; it
//! calls narrow vendor interfaces. Implementations live outside this
//! workspace (or in `classbridge-pipeline::builtin` for the no-vendor
//! fallbacks) and are injected at startup.

use crate::language::LanguageTag;
use async_trait::async_trait;
use thiserror::Error;

/// Provider failure kinds.
///
/// The distinction matters only for logging level; every provider error is
/// recovered inside the pipeline (worst case the student gets text-only).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider timeout after {0} ms")]
    Timeout(u64),

    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("fatal provider error: {0}")]
    Fatal(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Speech-to-text.
///
/// An empty transcript is a valid result and means "drop the frame".
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Transcribe an audio buffer.
    ///
    /// # Arguments
    /// * `audio` - raw encoded audio as received from the client
    /// * `language` - the speaker's language tag
    async fn transcribe(&self, audio: &[u8], language: &LanguageTag) -> ProviderResult<String>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Machine translation.
#[async_trait]
pub trait Translator: Send + Sync + 'static {
    /// Translate `text` from `source` into `target`.
    ///
    /// Failure semantics at the call site: fall back to the source text.
    async fn translate(
        &self,
        text: &str,
        source: &LanguageTag,
        target: &LanguageTag,
    ) -> ProviderResult<String>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Options for one synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub language: LanguageTag,
    pub voice: Option<String>,
}

impl SynthesisOptions {
    pub fn new(language: LanguageTag) -> Self {
        Self { language, voice: None }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

/// Result of one synthesis call.
///
/// `audio` may be empty when the provider delegates to client-side speech,
/// in which case `client_side_text`/`client_side_language` carry what the
/// client should speak.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub audio: Vec<u8>,
    pub service_type: String,
    pub client_side_text: Option<String>,
    pub client_side_language: Option<LanguageTag>,
}

impl SynthesisResult {
    pub fn server_audio(audio: Vec<u8>, service_type: impl Into<String>) -> Self {
        Self {
            audio,
            service_type: service_type.into(),
            client_side_text: None,
            client_side_language: None,
        }
    }

    pub fn client_side(text: impl Into<String>, language: LanguageTag) -> Self {
        Self {
            audio: Vec::new(),
            service_type: "browser".to_string(),
            client_side_text: Some(text.into()),
            client_side_language: Some(language),
        }
    }

    pub fn is_client_side(&self) -> bool {
        self.client_side_text.is_some()
    }
}

/// Text-to-speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    async fn synthesize(&self, text: &str, options: &SynthesisOptions)
        -> ProviderResult<SynthesisResult>;

    /// The service-type id clients select this provider by
    fn service_type(&self) -> &str;
}

/// Audio container normalization.
///
/// Some TTS vendors return WAV; clients prefer MP3. Encoding is a vendor
/// concern like synthesis itself; the bundled implementation declines and
/// the delivery path ships the WAV unchanged.
pub trait AudioTranscoder: Send + Sync + 'static {
    /// Convert a complete WAV byte buffer into MP3 bytes.
    fn wav_to_mp3(&self, wav: &[u8]) -> ProviderResult<Vec<u8>>;

    /// Transcoder name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperTranslator;

    #[async_trait]
    impl Translator for UpperTranslator {
        async fn translate(
            &self,
            text: &str,
            _source: &LanguageTag,
            _target: &LanguageTag,
        ) -> ProviderResult<String> {
            Ok(text.to_uppercase())
        }

        fn name(&self) -> &str {
            "upper"
        }
    }

    #[tokio::test]
    async fn test_trait_object_dispatch() {
        let t: Box<dyn Translator> = Box::new(UpperTranslator);
        let out = t
            .translate("hola", &LanguageTag::new("es"), &LanguageTag::new("en"))
            .await
            .unwrap();
        assert_eq!(out, "HOLA");
    }

    #[test]
    fn test_synthesis_result_modes() {
        let server = SynthesisResult::server_audio(vec![1, 2, 3], "openai");
        assert!(!server.is_client_side());

        let client = SynthesisResult::client_side("bonjour", LanguageTag::new("fr-FR"));
        assert!(client.is_client_side());
        assert!(client.audio.is_empty());
    }
}
