// Copyright 2025-2026 CEMAXECUTER LLC

pub mod c4fm;
pub mod fir;
pub mod fsk;
pub mod fsk4;
pub mod dqpsk;
pub mod testsig;

use std::f32::consts::PI;

use num_complex::Complex32;

pub use c4fm::C4fmDemod;
pub use dqpsk::Pi4DqpskDemod;
pub use fsk::Fsk2Demod;
pub use fsk4::Fsk4Demod;

/// FM frequency discriminator: arg(s[n] * conj(s[n-1])).
pub struct FmDiscriminator {
    prev: Complex32,
    hz_per_rad: f32,
}

impl FmDiscriminator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            prev: Complex32::new(1.0, 0.0),
            hz_per_rad: sample_rate as f32 / (2.0 * PI),
        }
    }

    /// Instantaneous phase step in radians.
    #[inline]
    pub fn step(&mut self, sample: Complex32) -> f32 {
        let product = sample * self.prev.conj();
        self.prev = sample;
        product.arg()
    }

    /// Instantaneous frequency in Hz.
    #[inline]
    pub fn step_hz(&mut self, sample: Complex32) -> f32 {
        self.step(sample) * self.hz_per_rad
    }

    pub fn reset(&mut self) {
        self.prev = Complex32::new(1.0, 0.0);
    }
}

/// Demodulator for one trunking family, fixed at configuration time.
///
/// Consumes complex baseband blocks and appends detected symbol indices
/// (0..M-1 for M-ary signaling) as floats. Output lags input by the filter
/// group delay plus at most one symbol.
pub enum Demod {
    Fsk2(Fsk2Demod),
    C4fm(C4fmDemod),
    Fsk4(Fsk4Demod),
    Pi4Dqpsk(Pi4DqpskDemod),
}

impl Demod {
    pub fn fsk2(sample_rate: u32, baud: u32) -> Self {
        Demod::Fsk2(Fsk2Demod::new(sample_rate, baud))
    }

    pub fn c4fm(sample_rate: u32) -> Self {
        Demod::C4fm(C4fmDemod::new(sample_rate))
    }

    pub fn fsk4(sample_rate: u32, baud: u32) -> Self {
        Demod::Fsk4(Fsk4Demod::new(sample_rate, baud))
    }

    pub fn pi4_dqpsk(sample_rate: u32, baud: u32, rolloff: f32) -> Self {
        Demod::Pi4Dqpsk(Pi4DqpskDemod::new(sample_rate, baud, rolloff))
    }

    pub fn process(&mut self, block: &[Complex32], out: &mut Vec<f32>) {
        match self {
            Demod::Fsk2(d) => d.process(block, out),
            Demod::C4fm(d) => d.process(block, out),
            Demod::Fsk4(d) => d.process(block, out),
            Demod::Pi4Dqpsk(d) => d.process(block, out),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Demod::Fsk2(d) => d.reset(),
            Demod::C4fm(d) => d.reset(),
            Demod::Fsk4(d) => d.reset(),
            Demod::Pi4Dqpsk(d) => d.reset(),
        }
    }

    pub fn samples_per_symbol(&self) -> f32 {
        match self {
            Demod::Fsk2(d) => d.samples_per_symbol(),
            Demod::C4fm(d) => d.samples_per_symbol(),
            Demod::Fsk4(d) => d.samples_per_symbol(),
            Demod::Pi4Dqpsk(d) => d.samples_per_symbol(),
        }
    }
}
