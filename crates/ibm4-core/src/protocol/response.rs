//! Response decoding
//!
//! The firmware answers with free text: the echoed command line followed by
//! the payload. Numeric tokens are scanned in order of appearance and the
//! payload is always the *last* N of them, since the echo contributes the
//! channel index and sample count ahead of the samples.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::ProtocolError;

fn numeric_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?\d+\.?\d*").expect("numeric token pattern is valid"))
}

/// Extract every signed integer or decimal token from a raw response, in order
pub fn decode_numeric_tokens(raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    numeric_token_regex()
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn malformed(raw: &[u8], expected: usize, found: usize) -> ProtocolError {
    ProtocolError::MalformedResponse {
        expected,
        found,
        response: String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Take the last `count` tokens of `raw`
pub fn last_tokens(raw: &[u8], count: usize) -> Result<Vec<String>, ProtocolError> {
    let mut tokens = decode_numeric_tokens(raw);
    if count == 0 || tokens.len() < count {
        return Err(malformed(raw, count, tokens.len()));
    }
    Ok(tokens.split_off(tokens.len() - count))
}

/// Decode the last `count` tokens as voltages
pub fn decode_floats(raw: &[u8], count: usize) -> Result<Vec<f64>, ProtocolError> {
    last_tokens(raw, count)?
        .iter()
        .map(|t| t.parse::<f64>().map_err(|_| malformed(raw, count, 0)))
        .collect()
}

/// Decode the last `count` tokens as ADC counts
pub fn decode_integers(raw: &[u8], count: usize) -> Result<Vec<i64>, ProtocolError> {
    last_tokens(raw, count)?
        .iter()
        .map(|t| t.parse::<i64>().map_err(|_| malformed(raw, count, 0)))
        .collect()
}

/// Host-side statistics over a multi-sample read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiReading<T> {
    /// Arithmetic mean of the samples
    pub mean: f64,
    /// 0.5 * (max - min), a symmetric error bar rather than a variance
    pub half_range: f64,
    /// Samples in the order the device sent them
    pub samples: Vec<T>,
}

fn mean_and_half_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (mut sum, mut n) = (0.0, 0usize);
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for v in values {
        sum += v;
        n += 1;
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    (sum / n as f64, 0.5 * (hi - lo))
}

impl MultiReading<f64> {
    /// Statistics over voltage samples
    pub fn from_samples(samples: Vec<f64>) -> Self {
        let (mean, half_range) = mean_and_half_range(samples.iter().copied());
        Self {
            mean,
            half_range,
            samples,
        }
    }
}

impl MultiReading<i64> {
    /// Statistics over ADC counts, computed in floating point
    pub fn from_samples(samples: Vec<i64>) -> Self {
        let (mean, half_range) = mean_and_half_range(samples.iter().map(|&s| s as f64));
        Self {
            mean,
            half_range,
            samples,
        }
    }
}

/// Find the identification line carrying `signature`, trimmed
pub fn signature_line(raw: &[u8], signature: &str) -> Option<String> {
    String::from_utf8_lossy(raw)
        .split(['\r', '\n'])
        .map(str::trim)
        .find(|line| line.contains(signature))
        .map(str::to_string)
}

/// First line of the response that is not the echo of `command`
pub fn payload_line(raw: &[u8], command: &str) -> Option<String> {
    let echo = command.trim();
    String::from_utf8_lossy(raw)
        .split(['\r', '\n'])
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != echo)
        .map(str::to_string)
}
