// Copyright 2025-2026 CEMAXECUTER LLC

pub mod file;

#[cfg(feature = "rtlsdr")]
pub mod rtlsdr;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crossbeam::channel::Sender;
use num_complex::Complex32;
use thiserror::Error;

/// Errors reported by SDR drivers.
///
/// Everything here is fatal at `open`/`start`. A [`SdrError::TuneOutOfRange`]
/// returned from a live retune leaves the previous frequency in effect.
#[derive(Debug, Error)]
pub enum SdrError {
    #[error("no SDR device found (index {0})")]
    DeviceMissing(u32),
    #[error("failed to open device: {0}")]
    Open(String),
    #[error("frequency {0} Hz is outside the tuner range")]
    TuneOutOfRange(f64),
    #[error("gain setting not supported: {0}")]
    GainUnsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tuner gain mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainMode {
    Auto,
    /// Manual gain in dB.
    Manual(f64),
}

/// Sample buffer: a block of interleaved unsigned 8-bit IQ samples, as
/// delivered by the RTL2832U. One block covers at least ~16 ms of signal.
pub struct SampleBuf {
    /// Interleaved I,Q,I,Q,... as u8
    pub data: Vec<u8>,
    /// Number of complex samples (data.len() / 2)
    pub num_samples: usize,
}

impl SampleBuf {
    /// Convert to complex baseband. The tuner ADC idles slightly above
    /// mid-scale, hence the 127.4 offset.
    pub fn to_complex(&self) -> Vec<Complex32> {
        let mut out = Vec::with_capacity(self.num_samples);
        for pair in self.data.chunks_exact(2) {
            let i = (pair[0] as f32 - 127.4) / 128.0;
            let q = (pair[1] as f32 - 127.4) / 128.0;
            out.push(Complex32::new(i, q));
        }
        out
    }
}

/// Common trait for all SDR backends
pub trait SdrSource: Send {
    /// Start streaming samples into the channel.
    /// This function should run until stop() is called or an error occurs.
    fn start(&mut self, tx: Sender<SampleBuf>) -> Result<(), SdrError>;

    /// Signal the source to stop streaming
    fn stop(&mut self);

    /// Retune the front end. Valid while streaming; on failure the previous
    /// frequency remains effective.
    fn tune(&mut self, frequency_hz: f64) -> Result<(), SdrError>;

    /// Blocks dropped so far because the consumer fell behind.
    fn dropped_blocks(&self) -> u64;

    /// Live handle to the drop counter, for drivers that shed blocks in a
    /// callback after ownership moves to the reader thread.
    fn drop_counter(&self) -> Option<Arc<AtomicU64>> {
        None
    }

    /// Get the sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Get the center frequency in Hz
    fn center_frequency(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_complex_range() {
        let buf = SampleBuf {
            data: vec![0, 255, 127, 128],
            num_samples: 2,
        };
        let c = buf.to_complex();
        assert_eq!(c.len(), 2);
        // 0 maps near -1, 255 near +1, mid-scale near 0
        assert!((c[0].re + 0.995).abs() < 0.01, "re = {}", c[0].re);
        assert!((c[0].im - 0.997).abs() < 0.01, "im = {}", c[0].im);
        assert!(c[1].re.abs() < 0.01);
        assert!(c[1].im.abs() < 0.01);
    }
}
