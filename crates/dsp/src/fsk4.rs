use num_complex::Complex32;

use crate::fir::{lowpass_taps, Fir};
use crate::FmDiscriminator;

/// Nominal DMR deviations: -3/-1/+1/+3 map to -1944/-648/+648/+1944 Hz.
const OUTER_DEV_HZ: f32 = 1944.0;
const INNER_DEV_HZ: f32 = 648.0;

/// Slow adaptation keeps the thresholds steady through short fades.
const LEVEL_ALPHA: f32 = 0.01;

/// Proportional gain of the Mueller-Muller timing nudge.
const TIMING_GAIN: f32 = 0.01;

/// 4-level FSK demodulator for DMR (4800 symbols/s).
///
/// The slicer thresholds adapt as midpoints of exponentially weighted
/// per-level averages, and a Mueller-Muller error term nudges the symbol
/// counter.
pub struct Fsk4Demod {
    disc: FmDiscriminator,
    lpf: Fir,
    sps: f32,
    counter: f32,
    mu: f32,
    timing_error: f32,
    /// EWMA of the deviation observed for each symbol level.
    level_avg: [f32; 4],
    /// Last three symbol-point deviations, normalized, oldest first.
    history: [f32; 3],
    history_len: usize,
}

impl Fsk4Demod {
    pub fn new(sample_rate: u32, baud: u32) -> Self {
        let taps = lowpass_taps(sample_rate, baud as f32 * 1.2, 41);
        Self {
            disc: FmDiscriminator::new(sample_rate),
            lpf: Fir::new(taps),
            sps: sample_rate as f32 / baud as f32,
            counter: 0.0,
            mu: 0.0,
            timing_error: 0.0,
            level_avg: [-OUTER_DEV_HZ, -INNER_DEV_HZ, INNER_DEV_HZ, OUTER_DEV_HZ],
            history: [0.0; 3],
            history_len: 0,
        }
    }

    pub fn reset(&mut self) {
        self.disc.reset();
        self.lpf.reset();
        self.counter = 0.0;
        self.mu = 0.0;
        self.timing_error = 0.0;
        self.level_avg = [-OUTER_DEV_HZ, -INNER_DEV_HZ, INNER_DEV_HZ, OUTER_DEV_HZ];
        self.history = [0.0; 3];
        self.history_len = 0;
    }

    pub fn samples_per_symbol(&self) -> f32 {
        self.sps
    }

    /// Average spacing between adjacent levels.
    pub fn eye_opening(&self) -> f32 {
        (self.level_avg[3] - self.level_avg[0]) / 3.0
    }

    fn thresholds(&self) -> [f32; 3] {
        [
            (self.level_avg[0] + self.level_avg[1]) / 2.0,
            (self.level_avg[1] + self.level_avg[2]) / 2.0,
            (self.level_avg[2] + self.level_avg[3]) / 2.0,
        ]
    }

    fn slice(&mut self, deviation: f32) -> usize {
        let t = self.thresholds();
        let symbol = if deviation < t[0] {
            0
        } else if deviation < t[1] {
            1
        } else if deviation < t[2] {
            2
        } else {
            3
        };

        let avg = &mut self.level_avg[symbol];
        *avg = (1.0 - LEVEL_ALPHA) * *avg + LEVEL_ALPHA * deviation;
        symbol
    }

    /// Mueller-Muller error (x[k+1] - x[k-1]) * x[k] over the last three
    /// symbol points, accumulated into a fractional counter adjustment.
    fn timing_nudge(&mut self, deviation: f32) {
        let eye = self.eye_opening().max(1.0);
        let normalized = deviation / eye;

        if self.history_len < 3 {
            self.history[self.history_len] = normalized;
            self.history_len += 1;
            return;
        }
        self.history.rotate_left(1);
        self.history[2] = normalized;

        let error = (self.history[2] - self.history[0]) * self.history[1];
        self.timing_error = 0.9 * self.timing_error + 0.1 * error;

        self.mu += self.timing_error * TIMING_GAIN;
        if self.mu > 1.0 {
            self.mu -= 1.0;
            self.counter += 1.0;
        } else if self.mu < -1.0 {
            self.mu += 1.0;
            self.counter -= 1.0;
        }
    }

    pub fn process(&mut self, block: &[Complex32], out: &mut Vec<f32>) {
        for &sample in block {
            let deviation = self.lpf.process(self.disc.step_hz(sample));

            self.counter += 1.0;
            if self.counter >= self.sps {
                self.counter -= self.sps;
                let symbol = self.slice(deviation);
                self.timing_nudge(deviation);
                out.push(symbol as f32);
            }
        }
    }
}
