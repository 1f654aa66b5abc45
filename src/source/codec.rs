//! Frame codec for the vitals feed.
//!
//! Each frame is one JSON object. Fields this crate does not know about
//! (waveforms, heatmaps, alert flags) are ignored.

use super::TelemetrySample;
use crate::error::DecodeError;

/// Decode a single text frame into a validated sample.
pub fn decode(raw: &str) -> Result<TelemetrySample, DecodeError> {
    let sample: TelemetrySample =
        serde_json::from_str(raw.trim()).map_err(|e| DecodeError::malformed(e.to_string()))?;
    validate(&sample)?;
    Ok(sample)
}

/// Decode a binary frame, which must hold UTF-8 JSON.
pub fn decode_bytes(raw: &[u8]) -> Result<TelemetrySample, DecodeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| DecodeError::malformed(format!("frame is not UTF-8: {}", e)))?;
    decode(text)
}

fn validate(sample: &TelemetrySample) -> Result<(), DecodeError> {
    if !sample.heart_rate.is_finite() || sample.heart_rate < 0.0 {
        return Err(DecodeError::malformed(format!(
            "heart_rate {} is not a non-negative number",
            sample.heart_rate
        )));
    }

    if let Some(accuracy) = sample.accuracy {
        if !(0.0..=100.0).contains(&accuracy) {
            return Err(DecodeError::malformed(format!(
                "accuracy {} is outside [0, 100]",
                accuracy
            )));
        }
    }

    Ok(())
}
