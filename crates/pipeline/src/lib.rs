//! Translation fan-out and delivery pipeline
//!
//! Given a teacher utterance and a snapshot of the session's students,
//! this crate translates once per distinct target language, then runs one
//! delivery task per student (synthesis selection, audio normalization,
//! retried send) and records delivered translations afterwards.
//!
//! The pipeline never fails a whole utterance because one provider or one
//! student misbehaved; the worst case for any single student is a
//! text-only message.

pub mod audio;
pub mod builtin;
pub mod delivery;
pub mod pipeline;
pub mod redact;
pub mod translate;
pub mod tts;

pub use audio::{looks_like_wav, normalize_for_delivery, AudioFormat};
pub use builtin::{
    ClientSpeechSynthesizer, DecliningTranscoder, DisabledSpeechToText, PassthroughTranslator,
};
pub use delivery::{DeliveryService, DeliverySummary, DeliveryTarget, SpeechParams, TranslationMessage};
pub use pipeline::{PipelineInput, PipelineSummary, TranscriptionPipeline};
pub use redact::{SanitizeOutcome, SanitizerConfig, TextSanitizer};
pub use translate::{TranslationFanout, TranslationOutcome};
pub use tts::TtsRouter;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no synthesizer registered for service type: {0}")]
    UnknownService(String),

    #[error("audio error: {0}")]
    Audio(String),
}
