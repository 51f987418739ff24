//! TTS provider routing
//!
//! Connections pick a synthesizer by service-type id. `auto` means "the
//! configured primary, then the configured fallback once, then empty
//! audio"; a student must still get their text when every vendor is down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use classbridge_core::{
    ProviderError, SpeechSynthesizer, SynthesisOptions, SynthesisResult,
};

pub struct TtsRouter {
    providers: HashMap<String, Arc<dyn SpeechSynthesizer>>,
    default_service: String,
    fallback_service: String,
    call_timeout: Duration,
}

impl TtsRouter {
    pub fn new(
        default_service: impl Into<String>,
        fallback_service: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            default_service: default_service.into(),
            fallback_service: fallback_service.into(),
            call_timeout,
        }
    }

    /// Register a synthesizer under its own service type.
    pub fn register(&mut self, provider: Arc<dyn SpeechSynthesizer>) {
        self.providers
            .insert(provider.service_type().to_string(), provider);
    }

    pub fn default_service(&self) -> &str {
        &self.default_service
    }

    /// The service type a connection's request resolves to.
    ///
    /// Unknown ids fall back to the configured default so a stale client
    /// setting degrades instead of erroring.
    pub fn resolve(&self, requested: Option<&str>) -> String {
        let requested = match requested {
            Some(s) if !s.is_empty() => s,
            _ => &self.default_service,
        };
        if requested == "auto" || self.providers.contains_key(requested) {
            requested.to_string()
        } else {
            tracing::warn!(
                requested = requested,
                default = %self.default_service,
                "Unknown TTS service type, using default"
            );
            self.default_service.clone()
        }
    }

    async fn call(
        &self,
        service: &str,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<SynthesisResult, ProviderError> {
        let provider = self
            .providers
            .get(service)
            .ok_or_else(|| ProviderError::Unsupported(format!("no provider: {service}")))?;

        match tokio::time::timeout(self.call_timeout, provider.synthesize(text, options)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.call_timeout.as_millis() as u64)),
        }
    }

    /// Synthesize for a connection, honoring the `auto` fallback chain.
    ///
    /// Never returns an error: the last resort is an empty-audio result
    /// under the resolved service type.
    pub async fn synthesize(
        &self,
        requested: Option<&str>,
        text: &str,
        options: &SynthesisOptions,
    ) -> SynthesisResult {
        let service = self.resolve(requested);

        if service == "auto" {
            match self.call(&self.default_service, text, options).await {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!(
                        service = %self.default_service,
                        fallback = %self.fallback_service,
                        error = %e,
                        "Primary TTS failed, trying fallback"
                    );
                }
            }
            match self.call(&self.fallback_service, text, options).await {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!(
                        fallback = %self.fallback_service,
                        error = %e,
                        "Fallback TTS failed, delivering without audio"
                    );
                    return SynthesisResult::server_audio(Vec::new(), self.default_service.clone());
                }
            }
        }

        match self.call(&service, text, options).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    service = %service,
                    error = %e,
                    "TTS failed, delivering without audio"
                );
                SynthesisResult::server_audio(Vec::new(), service)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use classbridge_core::{LanguageTag, ProviderResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTts {
        service: &'static str,
        fail: bool,
        calls: AtomicU32,
    }

    impl CountingTts {
        fn new(service: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                service,
                fail,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for CountingTts {
        async fn synthesize(
            &self,
            _text: &str,
            _options: &SynthesisOptions,
        ) -> ProviderResult<SynthesisResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::Transient("down".to_string()))
            } else {
                Ok(SynthesisResult::server_audio(vec![1u8; 16], self.service))
            }
        }

        fn service_type(&self) -> &str {
            self.service
        }
    }

    fn options() -> SynthesisOptions {
        SynthesisOptions::new(LanguageTag::new("es-ES"))
    }

    #[tokio::test]
    async fn test_resolves_unknown_to_default() {
        let mut router = TtsRouter::new("openai", "local", Duration::from_secs(1));
        router.register(CountingTts::new("openai", false));
        assert_eq!(router.resolve(Some("no-such-vendor")), "openai");
        assert_eq!(router.resolve(None), "openai");
        assert_eq!(router.resolve(Some("auto")), "auto");
    }

    #[tokio::test]
    async fn test_auto_falls_back_once_then_goes_silent() {
        let primary = CountingTts::new("openai", true);
        let fallback = CountingTts::new("local", true);
        let mut router = TtsRouter::new("openai", "local", Duration::from_secs(1));
        router.register(primary.clone());
        router.register(fallback.clone());

        let result = router.synthesize(Some("auto"), "hola", &options()).await;
        assert!(result.audio.is_empty());
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_uses_primary_when_healthy() {
        let primary = CountingTts::new("openai", false);
        let fallback = CountingTts::new("local", false);
        let mut router = TtsRouter::new("openai", "local", Duration::from_secs(1));
        router.register(primary);
        router.register(fallback.clone());

        let result = router.synthesize(Some("auto"), "hola", &options()).await;
        assert_eq!(result.audio.len(), 16);
        assert_eq!(result.service_type, "openai");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_direct_failure_goes_silent_without_fallback() {
        let primary = CountingTts::new("openai", true);
        let fallback = CountingTts::new("local", false);
        let mut router = TtsRouter::new("openai", "local", Duration::from_secs(1));
        router.register(primary);
        router.register(fallback.clone());

        let result = router.synthesize(Some("openai"), "hola", &options()).await;
        assert!(result.audio.is_empty());
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }
}
