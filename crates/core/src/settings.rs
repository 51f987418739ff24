//! Per-connection client settings
//!
//! Settings arrive as a free-form JSON object inside `register` and
//! `settings` messages. Known keys are typed below; unknown keys are
//! preserved verbatim so newer clients can round-trip them through the
//! broker without loss.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// How teacher transcriptions are fanned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationMode {
    #[default]
    Auto,
    Manual,
}

impl TranslationMode {
    /// Anything other than the literal `"manual"` collapses to `Auto`.
    pub fn from_raw(raw: &str) -> Self {
        if raw == "manual" {
            Self::Manual
        } else {
            Self::Auto
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// Client settings attached to a connection.
///
/// All fields are optional: a merge only overwrites keys the incoming
/// object actually carried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// TTS provider id, or `"auto"` for primary-with-fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_service_type: Option<String>,

    /// Skip server-side synthesis; client speaks the text itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_client_speech: Option<bool>,

    /// Deserialized leniently: any string other than `"manual"` is `Auto`
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_translation_mode",
        default
    )]
    pub translation_mode: Option<TranslationMode>,

    /// Student opt-in to emit comprehension signals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_comprehension_signals: Option<bool>,

    /// Force client-speech rendering for this student
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_literacy_mode: Option<bool>,

    /// Opt-in to teacher hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ace_enabled: Option<bool>,

    /// Per-connection two-way override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_way_enabled: Option<bool>,

    /// Unknown keys, preserved and ignored
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn de_translation_mode<'de, D>(deserializer: D) -> Result<Option<TranslationMode>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| TranslationMode::from_raw(&s)))
}

impl ClientSettings {
    /// Overlay `incoming` on top of `self`: keys the incoming object
    /// carried win, everything else is kept.
    pub fn merge(&mut self, incoming: &ClientSettings) {
        if let Some(v) = &incoming.tts_service_type {
            self.tts_service_type = Some(v.clone());
        }
        if let Some(v) = incoming.use_client_speech {
            self.use_client_speech = Some(v);
        }
        if let Some(v) = incoming.translation_mode {
            self.translation_mode = Some(v);
        }
        if let Some(v) = incoming.allow_comprehension_signals {
            self.allow_comprehension_signals = Some(v);
        }
        if let Some(v) = incoming.low_literacy_mode {
            self.low_literacy_mode = Some(v);
        }
        if let Some(v) = incoming.ace_enabled {
            self.ace_enabled = Some(v);
        }
        if let Some(v) = incoming.two_way_enabled {
            self.two_way_enabled = Some(v);
        }
        for (k, v) in &incoming.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }

    /// Legacy top-level `ttsServiceType` field: applied before the
    /// `settings` object so the object wins on conflict.
    pub fn apply_legacy_tts_service(&mut self, service: &str) {
        if self.tts_service_type.is_none() {
            self.tts_service_type = Some(service.to_string());
        }
    }

    pub fn translation_mode(&self) -> TranslationMode {
        self.translation_mode.unwrap_or_default()
    }

    pub fn use_client_speech(&self) -> bool {
        self.use_client_speech.unwrap_or(false)
    }

    pub fn low_literacy_mode(&self) -> bool {
        self.low_literacy_mode.unwrap_or(false)
    }

    pub fn two_way_enabled(&self) -> bool {
        self.two_way_enabled.unwrap_or(false)
    }

    pub fn allow_comprehension_signals(&self) -> bool {
        self.allow_comprehension_signals.unwrap_or(false)
    }
}
