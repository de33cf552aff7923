// Copyright 2025-2026 CEMAXECUTER LLC

pub mod calls;
pub mod sink;
pub mod wav;

pub use calls::{CallManager, TalkgroupPolicy, CALL_TIMEOUT_MS};
pub use sink::{AudioSink, NullSink, SinkWriter};
pub use wav::WavWriter;

/// Voice codec black box: one instance per active call, dropped when the
/// call ends so no codec state leaks between calls.
pub trait VoiceDecoder: Send {
    /// Decode one encoded voice frame to PCM samples.
    fn decode(&mut self, encoded: &[u8]) -> Vec<i16>;
}

/// Passthrough "codec" for analog FM systems: the frame already carries
/// 16-bit little-endian PCM.
pub struct AnalogPassthrough;

impl VoiceDecoder for AnalogPassthrough {
    fn decode(&mut self, encoded: &[u8]) -> Vec<i16> {
        encoded
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analog_passthrough() {
        let mut codec = AnalogPassthrough;
        let pcm = codec.decode(&[0x34, 0x12, 0xFF, 0x7F]);
        assert_eq!(pcm, vec![0x1234, 0x7FFF]);
    }
}
