//! Transcription pipeline facade
//!
//! The entry point handlers use for every teacher utterance, whether it
//! arrived as text, transcribed audio, a manual send, or a class-scoped
//! teacher reply: translate per distinct language, deliver per student,
//! then update the session counters.

use std::sync::Arc;
use std::time::Instant;

use classbridge_core::{LanguageTag, SessionId};
use classbridge_storage::SessionStore;

use crate::delivery::{DeliveryService, DeliverySummary, DeliveryTarget};
use crate::translate::TranslationFanout;

pub struct PipelineInput {
    pub session_id: Option<SessionId>,
    pub text: String,
    pub source_language: LanguageTag,
    pub targets: Vec<DeliveryTarget>,
    /// Distinct student languages; translation runs once per entry
    pub target_languages: Vec<LanguageTag>,
    pub start: Instant,
    pub preparation_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineSummary {
    pub delivery: DeliverySummary,
    pub translation_ms: u64,
    pub translation_failures: usize,
}

pub struct TranscriptionPipeline {
    fanout: TranslationFanout,
    delivery: Arc<DeliveryService>,
    sessions: Arc<dyn SessionStore>,
}

impl TranscriptionPipeline {
    pub fn new(
        fanout: TranslationFanout,
        delivery: Arc<DeliveryService>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            fanout,
            delivery,
            sessions,
        }
    }

    pub async fn run(&self, input: PipelineInput) -> PipelineSummary {
        if input.text.trim().is_empty() {
            return PipelineSummary::default();
        }

        // Count the utterance even when no student is listening yet;
        // classification distinguishes "spoke to nobody" from "silent".
        if let Some(session_id) = &input.session_id {
            if let Err(e) = self.sessions.increment_transcripts(session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to count transcript");
            }
        }

        if input.targets.is_empty() {
            tracing::debug!("No students connected, skipping fan-out");
            return PipelineSummary::default();
        }

        let outcome = self
            .fanout
            .translate_all(&input.text, &input.source_language, &input.target_languages)
            .await;

        let summary = self
            .delivery
            .clone()
            .deliver(
                input.session_id.clone(),
                &input.text,
                &input.source_language,
                input.targets,
                &outcome,
                input.start,
                input.preparation_ms,
            )
            .await;

        if let Some(session_id) = &input.session_id {
            if summary.delivered > 0 {
                if let Err(e) = self
                    .sessions
                    .increment_translations(session_id, summary.delivered as u64)
                    .await
                {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to update translation count"
                    );
                }
            }
        }

        tracing::info!(
            delivered = summary.delivered,
            failed = summary.failed,
            skipped = summary.skipped,
            translation_ms = outcome.elapsed_ms,
            translation_failures = outcome.failed.len(),
            "Fan-out complete"
        );

        PipelineSummary {
            delivery: summary,
            translation_ms: outcome.elapsed_ms,
            translation_failures: outcome.failed.len(),
        }
    }
}
