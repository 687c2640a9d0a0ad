//! Raw PCM format produced by the generator.
//!
//! The generator writes interleaved signed little-endian samples with no
//! container header, so clients need these values out of band (HTTP headers).

/// Samples per second per channel.
pub const SAMPLE_RATE: u32 = 44_100;
/// Bits per sample.
pub const BIT_DEPTH: u16 = 24;
/// Interleaved channel count (stereo).
pub const CHANNELS: u16 = 2;
/// Sample encoding name as understood by sox/ffmpeg style tooling.
pub const ENCODING: &str = "signed-integer";
/// Byte order of each sample.
pub const ENDIANNESS: &str = "little";
/// Content type announced for the raw stream.
pub const CONTENT_TYPE: &str = "audio/x-raw";

/// Bytes in one sample of one channel.
pub const BYTES_PER_SAMPLE: u64 = (BIT_DEPTH / 8) as u64;
/// Bytes in one interleaved frame (all channels).
pub const BYTES_PER_FRAME: u64 = BYTES_PER_SAMPLE * CHANNELS as u64;

/// Number of bytes the generator emits for `millis` of audio.
pub fn bytes_for_millis(millis: u64) -> u64 {
    millis * SAMPLE_RATE as u64 / 1000 * BYTES_PER_FRAME
}

/// Number of bytes the generator emits for a session of `minutes`.
pub fn bytes_for_minutes(minutes: u32) -> u64 {
    bytes_for_millis(minutes as u64 * 60_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(BYTES_PER_SAMPLE, 3);
        assert_eq!(BYTES_PER_FRAME, 6);
    }

    #[test]
    fn test_five_minute_session_size() {
        assert_eq!(bytes_for_minutes(5), 5 * 60 * 44_100 * 2 * 3);
        assert_eq!(bytes_for_minutes(5), 79_380_000);
    }

    #[test]
    fn test_bytes_for_millis() {
        assert_eq!(bytes_for_millis(1000), 264_600);
        assert_eq!(bytes_for_millis(0), 0);
    }
}
