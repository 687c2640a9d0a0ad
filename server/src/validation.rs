use std::str::FromStr;

use serde::Deserialize;
use stream_core::job::{JobParameters, NoiseType, ToneMode};

use crate::error::ApiError;

/// Raw `/stream` query string. Every field stays a string so malformed
/// numbers surface as a 400 with our own message instead of an extractor
/// rejection.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub freq: Option<String>,
    pub duration: Option<String>,
    pub noise: Option<String>,
    pub mode: Option<String>,
    pub carrier: Option<String>,
    pub amplitude: Option<String>,
    pub end_freq: Option<String>,
}

/// Validate a stream request and turn it into job parameters.
pub fn validate_stream_request(
    query: &StreamQuery,
    max_duration_minutes: u32,
) -> Result<JobParameters, ApiError> {
    let mut builder = JobParameters::builder().max_duration_minutes(max_duration_minutes);

    if let Some(freq) = &query.freq {
        builder = builder.frequency(parse_number(freq, "freq")?);
    }
    if let Some(duration) = &query.duration {
        builder = builder.duration_minutes(parse_duration(duration)?);
    }
    if let Some(noise) = &query.noise {
        builder = builder.noise(NoiseType::from_str(noise)?);
    }
    if let Some(mode) = &query.mode {
        builder = builder.mode(ToneMode::from_str(mode)?);
    }
    if let Some(carrier) = &query.carrier {
        builder = builder.carrier(parse_number(carrier, "carrier")?);
    }
    if let Some(amplitude) = &query.amplitude {
        let amplitude = amplitude.trim().parse::<i64>().map_err(|_| {
            ApiError::InvalidInput(format!(
                "amplitude must be a whole number between 0 and 100, got '{}'",
                amplitude
            ))
        })?;
        builder = builder.amplitude(amplitude);
    }
    // An empty end_freq comes from the info page form when the field is left blank.
    let end_freq = match query.end_freq.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_number(raw, "end_freq")?),
    };

    Ok(builder.end_frequency(end_freq).build()?)
}

fn parse_number(raw: &str, name: &str) -> Result<f64, ApiError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ApiError::InvalidInput(format!("{} must be a number, got '{}'", name, raw)))
}

fn parse_duration(raw: &str) -> Result<u32, ApiError> {
    raw.trim().parse::<u32>().map_err(|_| {
        ApiError::InvalidInput(format!(
            "duration must be a positive whole number of minutes, got '{}'",
            raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> StreamQuery {
        let mut q = StreamQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "freq" => q.freq = value,
                "duration" => q.duration = value,
                "noise" => q.noise = value,
                "mode" => q.mode = value,
                "carrier" => q.carrier = value,
                "amplitude" => q.amplitude = value,
                "end_freq" => q.end_freq = value,
                other => panic!("unknown key {other}"),
            }
        }
        q
    }

    fn invalid_message(result: Result<JobParameters, ApiError>) -> String {
        match result {
            Err(ApiError::InvalidInput(msg)) => msg,
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_when_query_is_empty() {
        let params = validate_stream_request(&StreamQuery::default(), 720).unwrap();
        assert_eq!(params, JobParameters::default());
    }

    #[test]
    fn test_full_query() {
        let params = validate_stream_request(
            &query(&[
                ("freq", "6.5"),
                ("duration", "30"),
                ("noise", "Brown"),
                ("mode", "isochronic"),
                ("carrier", "200"),
                ("amplitude", "40"),
                ("end_freq", "4"),
            ]),
            720,
        )
        .unwrap();
        assert_eq!(params.frequency(), 6.5);
        assert_eq!(params.duration_minutes(), 30);
        assert_eq!(params.noise(), NoiseType::Brown);
        assert_eq!(params.mode(), ToneMode::Isochronic);
        assert_eq!(params.carrier(), 200.0);
        assert_eq!(params.amplitude(), 40);
        assert_eq!(params.end_frequency(), Some(4.0));
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        let msg = invalid_message(validate_stream_request(&query(&[("freq", "abc")]), 720));
        assert!(msg.contains("freq"));

        let msg = invalid_message(validate_stream_request(&query(&[("duration", "-5")]), 720));
        assert!(msg.contains("duration"));

        let msg = invalid_message(validate_stream_request(&query(&[("amplitude", "12.5")]), 720));
        assert!(msg.contains("amplitude"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        for pairs in [
            &[("freq", "0")][..],
            &[("freq", "-3")][..],
            &[("duration", "0")][..],
            &[("amplitude", "150")][..],
            &[("amplitude", "-1")][..],
            &[("carrier", "0")][..],
            &[("noise", "purple")][..],
            &[("mode", "stereo")][..],
        ] {
            assert!(
                matches!(validate_stream_request(&query(pairs), 720), Err(ApiError::InvalidInput(_))),
                "{:?} should be rejected",
                pairs
            );
        }
    }

    #[test]
    fn test_duration_cap() {
        assert!(validate_stream_request(&query(&[("duration", "60")]), 60).is_ok());
        let msg = invalid_message(validate_stream_request(&query(&[("duration", "61")]), 60));
        assert!(msg.contains("60"));
    }

    #[test]
    fn test_blank_end_freq_is_ignored() {
        let params = validate_stream_request(&query(&[("end_freq", "")]), 720).unwrap();
        assert_eq!(params.end_frequency(), None);
    }
}
