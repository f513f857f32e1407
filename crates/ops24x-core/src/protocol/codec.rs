//! Frame encoding and decoding
//!
//! The module answers configuration queries with one or more brace-delimited blocks
//! concatenated on a single line:
//!
//! ```text
//! {"Product":"OPS243-A"}{"SamplingRate":"10000"}
//! ```
//!
//! and streams measurements as plain `time,speed` lines once time reporting is on:
//!
//! ```text
//! 12.5,34.2\r\n
//! ```
//!
//! A line is a configuration frame if it contains `{`. Everything else is a measurement
//! candidate that is only accepted if it parses as exactly two finite numbers.

use std::borrow::Cow;
use thiserror::Error;

use crate::store::SpeedSample;

/// Errors produced when a line does not decode as the expected frame type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Not a configuration frame: {0:?}")]
    NotConfiguration(String),

    #[error("Malformed configuration block {block:?}: {reason}")]
    MalformedConfiguration { block: String, reason: String },

    #[error("Not a measurement frame: {0:?}")]
    NotMeasurement(String),

    #[error("Measurement frame {raw:?} has {found} fields, expected 2")]
    FieldCount { raw: String, found: usize },

    #[error("Invalid number {field:?} in measurement frame {raw:?}")]
    InvalidNumber { raw: String, field: String },
}

/// Frame type of a received line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Contains at least one `{`-delimited block
    Configuration(&'a str),
    /// Anything else; may or may not parse as a measurement
    Candidate(&'a str),
}

/// Encode a command for transmission. Commands are sent verbatim.
pub fn encode(command: &str) -> Vec<u8> {
    command.as_bytes().to_vec()
}

/// Convert raw line bytes to text, trimming the line terminator and surrounding whitespace.
///
/// Invalid UTF-8 is replaced rather than rejected; noise on the line will then fail
/// frame decoding instead of aborting the read.
pub fn frame_text(raw: &[u8]) -> Cow<'_, str> {
    match String::from_utf8_lossy(raw) {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
        Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
    }
}

/// Classify a line. The flag is derived fresh from each line: presence of `{` marks a
/// configuration frame.
pub fn classify(raw: &str) -> Frame<'_> {
    let is_configuration = raw.contains('{');
    if is_configuration {
        Frame::Configuration(raw)
    } else {
        Frame::Candidate(raw)
    }
}

/// Decode a configuration response into `(key, value)` pairs, in the order received.
///
/// Quote characters are stripped from keys and values. Only the first `:` of a field
/// separates key from value, so values such as clock times survive intact.
pub fn decode_configuration_frame(raw: &str) -> Result<Vec<(String, String)>, FrameError> {
    let line = raw.trim();
    if !line.contains('{') {
        return Err(FrameError::NotConfiguration(line.to_string()));
    }

    let mut pairs = Vec::new();
    for block in line.split('}') {
        let body = match block.split_once('{') {
            Some((_, body)) => body,
            // Trailing text after the last block
            None if block.trim().is_empty() => continue,
            None => {
                return Err(FrameError::MalformedConfiguration {
                    block: block.to_string(),
                    reason: "text outside of braces".to_string(),
                })
            }
        };

        for field in body.split(',') {
            if field.trim().is_empty() {
                continue;
            }
            let (key, value) =
                field
                    .split_once(':')
                    .ok_or_else(|| FrameError::MalformedConfiguration {
                        block: body.to_string(),
                        reason: format!("field {:?} has no ':' separator", field),
                    })?;

            let key = strip_quotes(key);
            if key.is_empty() {
                return Err(FrameError::MalformedConfiguration {
                    block: body.to_string(),
                    reason: "empty key".to_string(),
                });
            }
            pairs.push((key, strip_quotes(value)));
        }
    }

    Ok(pairs)
}

/// Decode a `time,speed` measurement line.
pub fn decode_measurement_frame(raw: &str) -> Result<SpeedSample, FrameError> {
    let line = raw.trim();
    if line.is_empty() || line.contains('{') {
        return Err(FrameError::NotMeasurement(line.to_string()));
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 2 {
        return Err(FrameError::FieldCount {
            raw: line.to_string(),
            found: fields.len(),
        });
    }

    let time = parse_number(line, fields[0])?;
    let speed = parse_number(line, fields[1])?;
    Ok(SpeedSample::new(time, speed))
}

fn parse_number(raw: &str, field: &str) -> Result<f64, FrameError> {
    let field = strip_quotes(field);
    match field.parse::<f64>() {
        // "nan" and "inf" parse successfully but are never real readings
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(FrameError::InvalidNumber {
            raw: raw.to_string(),
            field,
        }),
    }
}

fn strip_quotes(s: &str) -> String {
    s.trim().replace('"', "").trim().to_string()
}
