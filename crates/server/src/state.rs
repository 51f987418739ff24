//! Application state
//!
//! One wiring point for everything the handlers need. Handlers receive
//! narrow references through `HandlerContext`; nothing here knows about
//! the supervisor.

use std::sync::Arc;

use classbridge_config::Settings;
use classbridge_core::{SpeechToText, Translator};
use classbridge_pipeline::{
    DeliveryService, SanitizerConfig, TextSanitizer, TranscriptionPipeline, TranslationFanout,
    TtsRouter,
};
use classbridge_storage::{SessionStore, TranslationStore};

use crate::classroom::ClassroomCodeDirectory;
use crate::lifecycle::SessionLifecycleManager;
use crate::registry::ConnectionRegistry;
use crate::routing::RequestRouter;

/// Shared broker services.
pub struct BrokerCore {
    pub settings: Arc<Settings>,
    pub registry: ConnectionRegistry,
    pub codes: Arc<ClassroomCodeDirectory>,
    pub routing: RequestRouter,
    pub sessions: Arc<dyn SessionStore>,
    pub translations: Arc<dyn TranslationStore>,
    pub lifecycle: Arc<SessionLifecycleManager>,
    pub pipeline: TranscriptionPipeline,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<TtsRouter>,
}

/// Cloneable axum state.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<BrokerCore>,
    pub dispatcher: Arc<crate::dispatch::Dispatcher>,
}

/// Everything needed to assemble a broker; the binary and the tests both
/// build through here so wiring stays in one place.
pub struct BrokerBuilder {
    pub settings: Settings,
    pub sessions: Arc<dyn SessionStore>,
    pub translations: Arc<dyn TranslationStore>,
    pub stt: Arc<dyn SpeechToText>,
    pub translator: Arc<dyn Translator>,
    pub tts: TtsRouter,
    pub transcoder: Arc<dyn classbridge_core::AudioTranscoder>,
}

impl BrokerBuilder {
    pub fn build(self) -> AppState {
        let settings = Arc::new(self.settings);
        let codes = Arc::new(ClassroomCodeDirectory::new(
            settings.timeouts.classroom_code_expiration(),
        ));
        let lifecycle = SessionLifecycleManager::new(
            self.sessions.clone(),
            codes.clone(),
            settings.timeouts.clone(),
        );

        let sanitizer = settings
            .features
            .text_sanitization
            .then(|| Arc::new(TextSanitizer::new(SanitizerConfig::default())));

        let tts = Arc::new(self.tts);
        let delivery = DeliveryService::new(
            tts.clone(),
            self.transcoder,
            self.translations.clone(),
            sanitizer,
            settings.limits.send_attempts,
            settings.features.detailed_logging,
        );
        let fanout = TranslationFanout::new(self.translator, settings.timeouts.provider_timeout());
        let pipeline = TranscriptionPipeline::new(fanout, delivery, self.sessions.clone());

        let core = Arc::new(BrokerCore {
            settings,
            registry: ConnectionRegistry::new(),
            codes,
            routing: RequestRouter::new(),
            sessions: self.sessions,
            translations: self.translations,
            lifecycle,
            pipeline,
            stt: self.stt,
            tts,
        });

        let dispatcher = Arc::new(crate::dispatch::Dispatcher::new(core.clone()));

        AppState { core, dispatcher }
    }
}

impl BrokerCore {
    /// Restore persisted classroom codes of active sessions into the
    /// directory (startup recovery).
    pub async fn restore_active_codes(&self) -> usize {
        let sessions = match self.sessions.active_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list active sessions for code restore");
                return 0;
            }
        };

        let mut restored = 0;
        for session in sessions {
            if let Some(code) = &session.class_code {
                match self.codes.restore_code(code, &session.session_id) {
                    Ok(_) => restored += 1,
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session.session_id,
                            code,
                            error = %e,
                            "Could not restore classroom code"
                        );
                    }
                }
            }
        }
        if restored > 0 {
            tracing::info!(restored, "Restored classroom codes from persistence");
        }
        restored
    }
}
