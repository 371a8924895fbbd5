use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone)]
pub struct AudioExtraction {
    pub audio_path: PathBuf,
    /// Container duration in whole seconds; absent when probing failed.
    pub duration_seconds: Option<i64>,
}

fn numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim().parse().map_err(serde::de::Error::custom)
}

/// Pass-1 loudnorm measurement. ffmpeg prints these as quoted strings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoudnessMeasurement {
    #[serde(deserialize_with = "numeric_string")]
    pub input_i: f64,
    #[serde(deserialize_with = "numeric_string")]
    pub input_tp: f64,
    #[serde(deserialize_with = "numeric_string")]
    pub input_lra: f64,
    #[serde(deserialize_with = "numeric_string")]
    pub input_thresh: f64,
    #[serde(deserialize_with = "numeric_string")]
    pub target_offset: f64,
}

#[derive(Debug, Clone)]
pub struct EncodedRendition {
    pub name: String,
    pub playlist_name: String,
    pub width: u32,
    pub height: u32,
    /// Video + audio bitrate, in bits per second.
    pub bandwidth_bits: u64,
}

#[derive(Debug, Clone)]
pub struct HlsPackage {
    pub output_dir: PathBuf,
    pub master_playlist_name: String,
    pub renditions: Vec<EncodedRendition>,
}

/// Parses bitrate notations like `192k`, `2800k`, `2.5M`, or plain bits.
pub fn parse_bitrate_bits(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1_000f64),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1_000_000f64),
        _ => (trimmed, 1f64),
    };
    digits
        .parse::<f64>()
        .ok()
        .map(|value| (value * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_suffixes() {
        assert_eq!(parse_bitrate_bits("192k"), Some(192_000));
        assert_eq!(parse_bitrate_bits("2.5M"), Some(2_500_000));
        assert_eq!(parse_bitrate_bits("800000"), Some(800_000));
        assert_eq!(parse_bitrate_bits("fast"), None);
    }

    #[test]
    fn loudness_measurement_parses_quoted_numbers() {
        let json = r#"{
            "input_i" : "-27.61",
            "input_tp" : "-4.47",
            "input_lra" : "18.06",
            "input_thresh" : "-39.20",
            "output_i" : "-16.58",
            "target_offset" : "0.58"
        }"#;
        let measurement: LoudnessMeasurement = serde_json::from_str(json).unwrap();
        assert!((measurement.input_i + 27.61).abs() < f64::EPSILON);
        assert!((measurement.target_offset - 0.58).abs() < f64::EPSILON);
    }
}
