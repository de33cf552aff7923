use num_complex::Complex32;

use crate::fir::{lowpass_taps, ComplexFir, Fir};
use crate::FmDiscriminator;

/// P25 Phase 1 symbol rate.
pub const SYMBOL_RATE: u32 = 4800;

/// Inner deviation of the four C4FM levels: -3/-1/+1/+3 map to
/// -1800/-600/+600/+1800 Hz.
pub const LEVEL_HZ: f32 = 600.0;

/// C4FM demodulator for P25 Phase 1.
///
/// Baseband low-pass ahead of the discriminator, a symbol-shaping low-pass
/// after it, a fixed symbol-period counter, and a four-level slicer on the
/// ideal deviation levels.
pub struct C4fmDemod {
    baseband: ComplexFir,
    disc: FmDiscriminator,
    shaping: Fir,
    sps: f32,
    counter: f32,
}

impl C4fmDemod {
    pub fn new(sample_rate: u32) -> Self {
        let baseband = ComplexFir::new(lowpass_taps(sample_rate, 6000.0, 51));
        let shaping = Fir::new(lowpass_taps(sample_rate, SYMBOL_RATE as f32 * 1.2, 41));
        Self {
            baseband,
            disc: FmDiscriminator::new(sample_rate),
            shaping,
            sps: sample_rate as f32 / SYMBOL_RATE as f32,
            counter: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.baseband.reset();
        self.disc.reset();
        self.shaping.reset();
        self.counter = 0.0;
    }

    pub fn samples_per_symbol(&self) -> f32 {
        self.sps
    }

    /// Slice a deviation in Hz to a symbol index 0..3 (lowest level first).
    fn slice(deviation: f32) -> f32 {
        if deviation < -2.0 * LEVEL_HZ {
            0.0
        } else if deviation < 0.0 {
            1.0
        } else if deviation < 2.0 * LEVEL_HZ {
            2.0
        } else {
            3.0
        }
    }

    pub fn process(&mut self, block: &[Complex32], out: &mut Vec<f32>) {
        for &sample in block {
            let filtered = self.baseband.process(sample);
            let deviation = self.shaping.process(self.disc.step_hz(filtered));

            self.counter += 1.0;
            if self.counter >= self.sps {
                self.counter -= self.sps;
                out.push(Self::slice(deviation));
            }
        }
    }
}
