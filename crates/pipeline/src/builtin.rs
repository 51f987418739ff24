//! Built-in fallback providers
//!
//! The broker must run end-to-end with no vendors configured: students get
//! the source text and client-side speech, audio frames are dropped, WAV
//! stays WAV. Real vendors replace these at startup wiring.

use async_trait::async_trait;

use classbridge_core::{
    AudioTranscoder, LanguageTag, ProviderError, ProviderResult, SpeechSynthesizer, SpeechToText,
    SynthesisOptions, SynthesisResult, Translator,
};

/// Returns the source text unchanged.
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(
        &self,
        text: &str,
        _source: &LanguageTag,
        _target: &LanguageTag,
    ) -> ProviderResult<String> {
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Always transcribes to the empty string, which the audio path treats as
/// "drop the frame".
pub struct DisabledSpeechToText;

#[async_trait]
impl SpeechToText for DisabledSpeechToText {
    async fn transcribe(&self, _audio: &[u8], _language: &LanguageTag) -> ProviderResult<String> {
        Ok(String::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Delegates synthesis to the client.
pub struct ClientSpeechSynthesizer;

#[async_trait]
impl SpeechSynthesizer for ClientSpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> ProviderResult<SynthesisResult> {
        Ok(SynthesisResult::client_side(text, options.language.clone()))
    }

    fn service_type(&self) -> &str {
        "browser"
    }
}

/// Declines every conversion; delivery ships the WAV unchanged.
pub struct DecliningTranscoder;

impl AudioTranscoder for DecliningTranscoder {
    fn wav_to_mp3(&self, _wav: &[u8]) -> ProviderResult<Vec<u8>> {
        Err(ProviderError::Unsupported(
            "no MP3 encoder configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "declining"
    }
}
