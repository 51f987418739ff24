//! Core traits and types for the classroom translation broker
//!
//! Everything here is dependency-light: identifiers, language tags, client
//! settings, latency accounting, and the narrow interfaces the broker uses
//! to talk to speech/translation vendors and to its peers.

pub mod ids;
pub mod language;
pub mod latency;
pub mod outbound;
pub mod providers;
pub mod settings;

pub use ids::{ConnectionId, RequestId, SessionId};
pub use language::LanguageTag;
pub use latency::{LatencyComponents, LatencyReport};
pub use outbound::{close_code, send_json, Outbound, SendError};
pub use providers::{
    AudioTranscoder, ProviderError, ProviderResult, SpeechSynthesizer, SpeechToText,
    SynthesisOptions, SynthesisResult, Translator,
};
pub use settings::{ClientSettings, TranslationMode};

/// Peer roles. A role, once set to teacher or student, is locked for the
/// connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Unset,
    Teacher,
    Student,
}

impl Role {
    pub fn is_set(&self) -> bool {
        !matches!(self, Role::Unset)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unset => "unset",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}
