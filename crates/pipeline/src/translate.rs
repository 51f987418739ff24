//! Translation fan-out
//!
//! One provider call per distinct target language, run concurrently.
//! A failed language falls back to the source text; the reported timing is
//! the max across languages since delivery waits for all of them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use classbridge_core::{LanguageTag, Translator};

#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    /// Target language -> translated (or fallback) text
    pub texts: HashMap<LanguageTag, String>,
    /// Max per-language wall time, ms
    pub elapsed_ms: u64,
    /// Languages that fell back to the source text
    pub failed: Vec<LanguageTag>,
}

impl TranslationOutcome {
    /// Text for a target, falling back to the original.
    pub fn text_for<'a>(&'a self, language: &LanguageTag, original: &'a str) -> &'a str {
        self.texts
            .get(language)
            .map(String::as_str)
            .unwrap_or(original)
    }
}

pub struct TranslationFanout {
    translator: Arc<dyn Translator>,
    call_timeout: Duration,
}

impl TranslationFanout {
    pub fn new(translator: Arc<dyn Translator>, call_timeout: Duration) -> Self {
        Self {
            translator,
            call_timeout,
        }
    }

    pub async fn translate_all(
        &self,
        text: &str,
        source: &LanguageTag,
        targets: &[LanguageTag],
    ) -> TranslationOutcome {
        let calls = targets.iter().map(|target| {
            let translator = self.translator.clone();
            let timeout = self.call_timeout;
            async move {
                let started = Instant::now();
                let result =
                    tokio::time::timeout(timeout, translator.translate(text, source, target))
                        .await;
                let elapsed = started.elapsed().as_millis() as u64;
                match result {
                    Ok(Ok(translated)) => (target.clone(), translated, elapsed, false),
                    Ok(Err(e)) => {
                        tracing::warn!(
                            target = %target,
                            provider = translator.name(),
                            error = %e,
                            "Translation failed, falling back to source text"
                        );
                        (target.clone(), text.to_string(), elapsed, true)
                    }
                    Err(_) => {
                        tracing::warn!(
                            target = %target,
                            provider = translator.name(),
                            timeout_ms = timeout.as_millis() as u64,
                            "Translation timed out, falling back to source text"
                        );
                        (target.clone(), text.to_string(), elapsed, true)
                    }
                }
            }
        });

        let mut texts = HashMap::with_capacity(targets.len());
        let mut failed = Vec::new();
        let mut elapsed_ms = 0u64;

        for (target, translated, elapsed, did_fail) in join_all(calls).await {
            elapsed_ms = elapsed_ms.max(elapsed);
            if did_fail {
                failed.push(target.clone());
            }
            texts.insert(target, translated);
        }

        TranslationOutcome {
            texts,
            elapsed_ms,
            failed,
        }
    }
}
