//! Delivered-text sanitization
//!
//! Feature-gated post-processing of translated text before it reaches
//! students: email addresses and phone numbers are masked, and a small
//! configurable profanity list is blanked. Detection is regex-only and
//! deliberately conservative.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex")
});

// Matches international and local formats with common separators,
// requiring at least 7 digits so ordinary numbers stay untouched.
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\d[\d\s().-]{5,}\d").expect("phone regex")
});

const EMAIL_MASK: &str = "[redacted-email]";
const PHONE_MASK: &str = "[redacted-phone]";
const PROFANITY_MASK: &str = "[redacted]";

#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    pub redact_pii: bool,
    pub redact_profanity: bool,
    /// Lowercased words; matched on word boundaries, case-insensitive
    pub profanity: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            redact_pii: true,
            redact_profanity: true,
            profanity: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeOutcome {
    pub text: String,
    pub pii_redacted: bool,
    pub profanity_redacted: bool,
}

pub struct TextSanitizer {
    config: SanitizerConfig,
    profanity_re: Option<Regex>,
}

impl TextSanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        let profanity_re = if config.redact_profanity && !config.profanity.is_empty() {
            let words = config
                .profanity
                .iter()
                .map(|w| regex::escape(w))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\b(?:{})\b", words)).ok()
        } else {
            None
        };
        Self { config, profanity_re }
    }

    pub fn sanitize(&self, text: &str) -> SanitizeOutcome {
        let mut out = text.to_string();
        let mut pii_redacted = false;
        let mut profanity_redacted = false;

        if self.config.redact_pii {
            if EMAIL_RE.is_match(&out) {
                out = EMAIL_RE.replace_all(&out, EMAIL_MASK).into_owned();
                pii_redacted = true;
            }
            if PHONE_RE.is_match(&out) {
                out = PHONE_RE.replace_all(&out, PHONE_MASK).into_owned();
                pii_redacted = true;
            }
        }

        if let Some(re) = &self.profanity_re {
            if re.is_match(&out) {
                out = re.replace_all(&out, PROFANITY_MASK).into_owned();
                profanity_redacted = true;
            }
        }

        SanitizeOutcome {
            text: out,
            pii_redacted,
            profanity_redacted,
        }
    }
}
