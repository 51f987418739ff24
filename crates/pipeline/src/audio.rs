//! Audio container inspection and normalization
//!
//! Some TTS vendors hand back WAV; clients want MP3 when they can get it.
//! Sniffing and probing are pure functions of the byte buffer; the actual
//! encode goes through the injected `AudioTranscoder` and failure means
//! "ship the WAV unchanged".

use std::io::Cursor;

use classbridge_core::AudioTranscoder;

/// Audio container of a delivered `translation` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    /// No server audio; the client synthesizes locally
    Browser,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Browser => "browser",
        }
    }
}

/// RIFF/WAVE sniff on the first 12 bytes.
pub fn looks_like_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Parsed WAV header facts. Normalization probes the header before
/// spending a conversion attempt and logs the shape it converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// Probe a WAV buffer. Returns None when the header does not parse.
pub fn probe_wav(bytes: &[u8]) -> Option<WavInfo> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    Some(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
    })
}

/// Normalize synthesized audio for delivery.
///
/// WAV output (or anything from the `local` service, which always emits
/// WAV) gets one MP3 conversion attempt; on failure the WAV goes out
/// unchanged. Non-WAV audio is assumed already client-friendly.
pub fn normalize_for_delivery(
    audio: Vec<u8>,
    service_type: &str,
    transcoder: &dyn AudioTranscoder,
) -> (Vec<u8>, AudioFormat) {
    if audio.is_empty() {
        return (audio, AudioFormat::Browser);
    }

    let is_wav = looks_like_wav(&audio) || service_type == "local";
    if !is_wav {
        return (audio, AudioFormat::Mp3);
    }

    // A RIFF tag with an unparseable body is not worth a conversion
    // attempt; ship the bytes unchanged.
    let Some(info) = probe_wav(&audio) else {
        tracing::debug!(
            service_type,
            len = audio.len(),
            "WAV header does not parse, sending unchanged"
        );
        return (audio, AudioFormat::Wav);
    };

    match transcoder.wav_to_mp3(&audio) {
        Ok(mp3) => {
            tracing::debug!(
                sample_rate = info.sample_rate,
                channels = info.channels,
                bits_per_sample = info.bits_per_sample,
                wav_len = audio.len(),
                mp3_len = mp3.len(),
                "Converted WAV to MP3"
            );
            (mp3, AudioFormat::Mp3)
        }
        Err(e) => {
            tracing::debug!(
                transcoder = transcoder.name(),
                error = %e,
                "WAV to MP3 conversion unavailable, sending WAV unchanged"
            );
            (audio, AudioFormat::Wav)
        }
    }
}
