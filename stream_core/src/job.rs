//! Job parameters and the job description consumed by the generator.
//!
//! [`build`] is pure: the same [`JobParameters`] always yield the same
//! [`JobDescription`]. Validation lives in [`JobParameters::new`], so `build`
//! never fails.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pcm;

/// Offset of the full-amplitude section after the start of the session.
pub const FADE_IN_MS: u64 = 15_000;
/// Length of the ramp down to silence at the end of the session.
pub const FADE_OUT_MS: u64 = 30_000;
/// Spacing of the intermediate sections of a progressive session.
pub const PROGRESSION_INTERVAL_MS: u64 = 120_000;
/// Amplitude of the noise bed once faded in.
pub const NOISE_BED_AMPLITUDE: u8 = 30;
/// Master volume passed in the description options.
pub const MASTER_VOLUME: u8 = 100;
/// Highest accepted layer amplitude.
pub const MAX_AMPLITUDE: u8 = 100;

pub const DEFAULT_FREQUENCY: f64 = 10.0;
pub const DEFAULT_DURATION_MINUTES: u32 = 5;
pub const DEFAULT_CARRIER: f64 = 300.0;
pub const DEFAULT_AMPLITUDE: u8 = 15;
/// Longest session accepted unless the builder is given another cap.
pub const DEFAULT_MAX_DURATION_MINUTES: u32 = 720;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("freq must be a positive number of Hz, got {0}")]
    Frequency(f64),

    #[error("end_freq must be a positive number of Hz, got {0}")]
    EndFrequency(f64),

    #[error("duration must be a positive number of minutes, got {0}")]
    Duration(u32),

    #[error("duration must not exceed {max} minutes, got {got}")]
    DurationTooLong { got: u32, max: u32 },

    #[error("carrier must be a positive number of Hz, got {0}")]
    Carrier(f64),

    #[error("amplitude must be between 0 and 100, got {0}")]
    Amplitude(i64),

    #[error("unknown noise type '{0}' (expected white, pink or brown)")]
    Noise(String),

    #[error("unknown tone mode '{0}' (expected binaural, monaural or isochronic)")]
    Mode(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseType {
    White,
    #[default]
    Pink,
    Brown,
}

impl NoiseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseType::White => "white",
            NoiseType::Pink => "pink",
            NoiseType::Brown => "brown",
        }
    }
}

impl fmt::Display for NoiseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoiseType {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(NoiseType::White),
            "pink" => Ok(NoiseType::Pink),
            "brown" => Ok(NoiseType::Brown),
            _ => Err(ParameterError::Noise(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneMode {
    #[default]
    Binaural,
    Monaural,
    Isochronic,
}

impl ToneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToneMode::Binaural => "binaural",
            ToneMode::Monaural => "monaural",
            ToneMode::Isochronic => "isochronic",
        }
    }
}

impl fmt::Display for ToneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToneMode {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binaural" => Ok(ToneMode::Binaural),
            "monaural" => Ok(ToneMode::Monaural),
            "isochronic" => Ok(ToneMode::Isochronic),
            _ => Err(ParameterError::Mode(s.to_string())),
        }
    }
}

/// Validated request parameters. Fields are private so a value can only be
/// obtained through [`JobParameters::new`] or [`JobParametersBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobParameters {
    frequency: f64,
    duration_minutes: u32,
    noise: NoiseType,
    mode: ToneMode,
    carrier: f64,
    amplitude: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_frequency: Option<f64>,
}

impl JobParameters {
    pub fn new(
        frequency: f64,
        duration_minutes: u32,
        noise: NoiseType,
        mode: ToneMode,
        carrier: f64,
        amplitude: i64,
    ) -> Result<Self, ParameterError> {
        Self::builder()
            .frequency(frequency)
            .duration_minutes(duration_minutes)
            .noise(noise)
            .mode(mode)
            .carrier(carrier)
            .amplitude(amplitude)
            .build()
    }

    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn noise(&self) -> NoiseType {
        self.noise
    }

    pub fn mode(&self) -> ToneMode {
        self.mode
    }

    pub fn carrier(&self) -> f64 {
        self.carrier
    }

    pub fn amplitude(&self) -> u8 {
        self.amplitude
    }

    pub fn end_frequency(&self) -> Option<f64> {
        self.end_frequency
    }

    /// Session length in milliseconds.
    pub fn total_millis(&self) -> u64 {
        self.duration_minutes as u64 * 60_000
    }

    /// Exact PCM byte count of a complete session.
    pub fn expected_bytes(&self) -> u64 {
        pcm::bytes_for_millis(self.total_millis())
    }
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            noise: NoiseType::default(),
            mode: ToneMode::default(),
            carrier: DEFAULT_CARRIER,
            amplitude: DEFAULT_AMPLITUDE,
            end_frequency: None,
        }
    }
}

/// Collects raw values; every unset field keeps its default.
#[derive(Debug, Clone)]
pub struct JobParametersBuilder {
    frequency: f64,
    duration_minutes: u32,
    max_duration_minutes: u32,
    noise: NoiseType,
    mode: ToneMode,
    carrier: f64,
    amplitude: i64,
    end_frequency: Option<f64>,
}

impl Default for JobParametersBuilder {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            max_duration_minutes: DEFAULT_MAX_DURATION_MINUTES,
            noise: NoiseType::default(),
            mode: ToneMode::default(),
            carrier: DEFAULT_CARRIER,
            amplitude: DEFAULT_AMPLITUDE as i64,
            end_frequency: None,
        }
    }
}

impl JobParametersBuilder {
    pub fn frequency(mut self, hz: f64) -> Self {
        self.frequency = hz;
        self
    }

    pub fn duration_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn max_duration_minutes(mut self, minutes: u32) -> Self {
        self.max_duration_minutes = minutes;
        self
    }

    pub fn noise(mut self, noise: NoiseType) -> Self {
        self.noise = noise;
        self
    }

    pub fn mode(mut self, mode: ToneMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn carrier(mut self, hz: f64) -> Self {
        self.carrier = hz;
        self
    }

    pub fn amplitude(mut self, amplitude: i64) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn end_frequency(mut self, hz: Option<f64>) -> Self {
        self.end_frequency = hz;
        self
    }

    pub fn build(self) -> Result<JobParameters, ParameterError> {
        if !is_positive_hz(self.frequency) {
            return Err(ParameterError::Frequency(self.frequency));
        }
        if let Some(end) = self.end_frequency {
            if !is_positive_hz(end) {
                return Err(ParameterError::EndFrequency(end));
            }
        }
        if self.duration_minutes == 0 {
            return Err(ParameterError::Duration(self.duration_minutes));
        }
        if self.duration_minutes > self.max_duration_minutes {
            return Err(ParameterError::DurationTooLong {
                got: self.duration_minutes,
                max: self.max_duration_minutes,
            });
        }
        if !is_positive_hz(self.carrier) {
            return Err(ParameterError::Carrier(self.carrier));
        }
        let amplitude = u8::try_from(self.amplitude)
            .ok()
            .filter(|a| *a <= MAX_AMPLITUDE)
            .ok_or(ParameterError::Amplitude(self.amplitude))?;

        Ok(JobParameters {
            frequency: self.frequency,
            duration_minutes: self.duration_minutes,
            noise: self.noise,
            mode: self.mode,
            carrier: self.carrier,
            amplitude,
            end_frequency: self.end_frequency,
        })
    }
}

fn is_positive_hz(hz: f64) -> bool {
    hz.is_finite() && hz > 0.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Steady,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseLayer {
    pub mode: NoiseType,
    pub amplitude: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneLayer {
    pub mode: ToneMode,
    pub carrier: f64,
    pub resonance: f64,
    pub amplitude: u8,
    pub waveform: Waveform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub noises: Vec<NoiseLayer>,
    pub tones: Vec<ToneLayer>,
}

/// One timeline entry, keyed by its absolute offset in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub time: u64,
    pub transition: Transition,
    pub track: Track,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub samplerate: u32,
    pub volume: u8,
}

/// Document handed to the generator (serialised as JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub description: Vec<String>,
    pub options: JobOptions,
    pub sequence: Vec<Section>,
}

impl JobDescription {
    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.sequence.iter().map(|s| s.time)
    }

    /// Offset of the last section, i.e. the length of the rendered audio.
    pub fn end_millis(&self) -> u64 {
        self.sequence.last().map(|s| s.time).unwrap_or(0)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

/// Build the generator timeline for `params`.
pub fn build(params: &JobParameters) -> JobDescription {
    let total = params.total_millis();
    let pre_fade_out = total - FADE_OUT_MS;
    let start = params.frequency;
    let end = params.end_frequency.unwrap_or(start);
    let transition = if params.end_frequency.is_some() {
        Transition::Smooth
    } else {
        Transition::Steady
    };

    let section = |time: u64, resonance: f64, tone: u8, noise: u8| Section {
        time,
        transition,
        track: Track {
            noises: vec![NoiseLayer {
                mode: params.noise,
                amplitude: noise,
            }],
            tones: vec![ToneLayer {
                mode: params.mode,
                carrier: params.carrier,
                resonance,
                amplitude: tone,
                waveform: Waveform::Sine,
            }],
        },
    };

    let mut sequence = vec![
        section(0, start, 0, 0),
        section(FADE_IN_MS, start, params.amplitude, NOISE_BED_AMPLITUDE),
    ];

    if params.end_frequency.is_some() {
        let steps = (pre_fade_out - FADE_IN_MS) / PROGRESSION_INTERVAL_MS;
        let step = if steps > 0 {
            (end - start) / steps as f64
        } else {
            0.0
        };
        for k in 1..=steps {
            let time = FADE_IN_MS + k * PROGRESSION_INTERVAL_MS;
            if time >= pre_fade_out {
                break;
            }
            let resonance = round_centi(start + step * k as f64);
            sequence.push(section(time, resonance, params.amplitude, NOISE_BED_AMPLITUDE));
        }
    }

    sequence.push(section(pre_fade_out, end, params.amplitude, NOISE_BED_AMPLITUDE));
    sequence.push(section(total, end, 0, 0));

    let mut description = vec![
        format!("Streaming Session - {} minutes", params.duration_minutes),
        format!("Resonance: {}Hz, Carrier: {}Hz", start, params.carrier),
        format!("Mode: {}", params.mode),
    ];
    if params.end_frequency.is_some() {
        description.push(format!("Progression: {}Hz -> {}Hz", start, end));
    }

    JobDescription {
        description,
        options: JobOptions {
            samplerate: pcm::SAMPLE_RATE,
            volume: MASTER_VOLUME,
        },
        sequence,
    }
}

fn round_centi(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_well_formed(desc: &JobDescription) {
        let times: Vec<u64> = desc.timestamps().collect();
        assert!(
            times.windows(2).all(|w| w[0] < w[1]),
            "timestamps must strictly increase: {:?}",
            times
        );
        for section in &desc.sequence {
            for tone in &section.track.tones {
                assert!(tone.amplitude <= MAX_AMPLITUDE);
            }
            for noise in &section.track.noises {
                assert!(noise.amplitude <= MAX_AMPLITUDE);
            }
        }
    }

    #[test]
    fn test_defaults_validate() {
        let params = JobParameters::builder().build().unwrap();
        assert_eq!(params, JobParameters::default());
        assert_eq!(params.noise(), NoiseType::Pink);
        assert_eq!(params.mode(), ToneMode::Binaural);
        assert_eq!(params.amplitude(), 15);
    }

    #[test]
    fn test_build_default_envelope() {
        let desc = build(&JobParameters::default());
        let times: Vec<u64> = desc.timestamps().collect();
        assert_eq!(times, vec![0, 15_000, 270_000, 300_000]);

        let tone_amps: Vec<u8> = desc.sequence.iter().map(|s| s.track.tones[0].amplitude).collect();
        assert_eq!(tone_amps, vec![0, 15, 15, 0]);
        let noise_amps: Vec<u8> = desc.sequence.iter().map(|s| s.track.noises[0].amplitude).collect();
        assert_eq!(noise_amps, vec![0, 30, 30, 0]);

        assert_eq!(desc.options.samplerate, 44_100);
        assert_eq!(desc.end_millis(), 300_000);
        assert!(desc.sequence.iter().all(|s| s.transition == Transition::Steady));
    }

    #[test]
    fn test_build_is_well_formed_across_inputs() {
        for minutes in [1, 2, 3, 5, 17, 60, 720] {
            for amplitude in [0, 1, 50, 100] {
                for end in [None, Some(4.0), Some(14.5)] {
                    let params = JobParameters::builder()
                        .duration_minutes(minutes)
                        .amplitude(amplitude)
                        .end_frequency(end)
                        .build()
                        .unwrap();
                    let desc = build(&params);
                    assert_well_formed(&desc);
                    assert_eq!(desc.end_millis(), params.total_millis());
                }
            }
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let params = JobParameters::builder().frequency(7.83).end_frequency(Some(3.0)).build().unwrap();
        assert_eq!(build(&params), build(&params));
    }

    #[test]
    fn test_progressive_session_interpolates() {
        let params = JobParameters::builder()
            .frequency(10.0)
            .end_frequency(Some(6.0))
            .duration_minutes(10)
            .build()
            .unwrap();
        let desc = build(&params);
        // 600s - 15s - 30s = 555s of body -> four 2 minute steps
        let times: Vec<u64> = desc.timestamps().collect();
        assert_eq!(times, vec![0, 15_000, 135_000, 255_000, 375_000, 495_000, 570_000, 600_000]);
        assert_eq!(desc.sequence[2].track.tones[0].resonance, 9.0);
        assert_eq!(desc.sequence[5].track.tones[0].resonance, 6.0);
        assert_eq!(desc.sequence[7].track.tones[0].resonance, 6.0);
        assert!(desc.sequence.iter().all(|s| s.transition == Transition::Smooth));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert_eq!(
            JobParameters::builder().frequency(0.0).build(),
            Err(ParameterError::Frequency(0.0))
        );
        assert!(JobParameters::builder().frequency(-3.0).build().is_err());
        assert!(JobParameters::builder().frequency(f64::NAN).build().is_err());
        assert_eq!(
            JobParameters::builder().duration_minutes(0).build(),
            Err(ParameterError::Duration(0))
        );
        assert_eq!(
            JobParameters::builder().amplitude(101).build(),
            Err(ParameterError::Amplitude(101))
        );
        assert_eq!(
            JobParameters::builder().amplitude(-1).build(),
            Err(ParameterError::Amplitude(-1))
        );
        assert!(JobParameters::builder().carrier(0.0).build().is_err());
        assert!(JobParameters::builder().end_frequency(Some(0.0)).build().is_err());
        assert_eq!(
            JobParameters::builder().duration_minutes(30).max_duration_minutes(20).build(),
            Err(ParameterError::DurationTooLong { got: 30, max: 20 })
        );
    }

    #[test]
    fn test_duration_capped_without_explicit_limit() {
        let result = JobParameters::new(
            10.0,
            100_000,
            NoiseType::Pink,
            ToneMode::Binaural,
            DEFAULT_CARRIER,
            15,
        );
        assert_eq!(
            result,
            Err(ParameterError::DurationTooLong {
                got: 100_000,
                max: DEFAULT_MAX_DURATION_MINUTES
            })
        );
        assert!(JobParameters::builder()
            .duration_minutes(DEFAULT_MAX_DURATION_MINUTES)
            .end_frequency(Some(2.0))
            .build()
            .is_ok());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("white".parse::<NoiseType>().unwrap(), NoiseType::White);
        assert_eq!("Brown".parse::<NoiseType>().unwrap(), NoiseType::Brown);
        assert!("blue".parse::<NoiseType>().is_err());
        assert_eq!("isochronic".parse::<ToneMode>().unwrap(), ToneMode::Isochronic);
        assert!("stereo".parse::<ToneMode>().is_err());
    }

    #[test]
    fn test_json_shape() {
        let desc = build(&JobParameters::default());
        let value: serde_json::Value = serde_json::from_slice(&desc.to_json().unwrap()).unwrap();
        assert_eq!(value["options"]["samplerate"], 44_100);
        assert_eq!(value["sequence"][1]["time"], 15_000);
        assert_eq!(value["sequence"][1]["transition"], "steady");
        assert_eq!(value["sequence"][1]["track"]["noises"][0]["mode"], "pink");
        assert_eq!(value["sequence"][1]["track"]["tones"][0]["mode"], "binaural");
        assert_eq!(value["sequence"][1]["track"]["tones"][0]["waveform"], "sine");
        assert_eq!(value["description"][0], "Streaming Session - 5 minutes");
    }
}
