use std::f32::consts::PI;

use num_complex::Complex32;

use crate::fir::{rrc_taps, ComplexFir};

/// Critically damped second-order loops.
const DAMPING: f32 = 0.707;
/// Normalized loop bandwidths for carrier and timing recovery.
const CARRIER_BW: f32 = 0.01;
const TIMING_BW: f32 = 0.01;

/// pi/4-DQPSK demodulator for TETRA downlinks (18000 symbols/s).
///
/// Root-raised-cosine matched filter, Costas-style carrier loop, Gardner
/// timing loop, and differential phase slicing. The alternating pi/4
/// constellation rotation cancels in the differential detector, so symbols
/// are sliced directly from the phase of current * conj(previous).
pub struct Pi4DqpskDemod {
    rrc: ComplexFir,
    sps: f32,

    carrier_alpha: f32,
    carrier_beta: f32,
    carrier_phase: f32,
    carrier_freq: f32,

    timing_alpha: f32,
    timing_beta: f32,
    timing_phase: f32,
    timing_freq: f32,

    early: Complex32,
    prompt: Complex32,
    late: Complex32,
    prev_decision: Complex32,
}

impl Pi4DqpskDemod {
    pub fn new(sample_rate: u32, symbol_rate: u32, rolloff: f32) -> Self {
        let sps = sample_rate as f32 / symbol_rate as f32;
        let rrc = ComplexFir::new(rrc_taps(sample_rate, symbol_rate, rolloff, 8));

        let denom = 1.0 + 2.0 * DAMPING * CARRIER_BW + CARRIER_BW * CARRIER_BW;
        let carrier_alpha = 4.0 * DAMPING * CARRIER_BW / denom;
        let carrier_beta = 4.0 * CARRIER_BW * CARRIER_BW / denom;

        let denom = 1.0 + 2.0 * DAMPING * TIMING_BW + TIMING_BW * TIMING_BW;
        let timing_alpha = 4.0 * DAMPING * TIMING_BW / denom;
        let timing_beta = 4.0 * TIMING_BW * TIMING_BW / denom;

        Self {
            rrc,
            sps,
            carrier_alpha,
            carrier_beta,
            carrier_phase: 0.0,
            carrier_freq: 0.0,
            timing_alpha,
            timing_beta,
            timing_phase: 0.0,
            timing_freq: 1.0 / sps,
            early: Complex32::new(0.0, 0.0),
            prompt: Complex32::new(0.0, 0.0),
            late: Complex32::new(0.0, 0.0),
            prev_decision: Complex32::new(1.0, 0.0),
        }
    }

    pub fn reset(&mut self) {
        self.rrc.reset();
        self.carrier_phase = 0.0;
        self.carrier_freq = 0.0;
        self.timing_phase = 0.0;
        self.timing_freq = 1.0 / self.sps;
        self.early = Complex32::new(0.0, 0.0);
        self.prompt = Complex32::new(0.0, 0.0);
        self.late = Complex32::new(0.0, 0.0);
        self.prev_decision = Complex32::new(1.0, 0.0);
    }

    pub fn samples_per_symbol(&self) -> f32 {
        self.sps
    }

    /// Four-quadrant QPSK phase error (Costas).
    fn phase_error(sample: Complex32) -> f32 {
        let i = sample.re;
        let q = sample.im;
        if i >= 0.0 && q >= 0.0 {
            -i + q
        } else if i < 0.0 && q >= 0.0 {
            -i - q
        } else if i < 0.0 && q < 0.0 {
            i - q
        } else {
            i + q
        }
    }

    fn carrier_track(&mut self, sample: Complex32) -> Complex32 {
        let nco = Complex32::from_polar(1.0, self.carrier_phase);
        let rotated = sample * nco.conj();

        let error = Self::phase_error(rotated);
        self.carrier_freq += self.carrier_beta * error;
        self.carrier_phase += self.carrier_freq + self.carrier_alpha * error;

        // Wrap to [-2pi, 2pi)
        while self.carrier_phase >= 2.0 * PI {
            self.carrier_phase -= 2.0 * PI;
        }
        while self.carrier_phase < -2.0 * PI {
            self.carrier_phase += 2.0 * PI;
        }

        rotated
    }

    /// Differential phase to symbol index: +pi/4 -> 0, +3pi/4 -> 1,
    /// -pi/4 -> 2, -3pi/4 -> 3.
    fn slice(dphase: f32) -> f32 {
        if dphase >= 0.0 {
            if dphase < PI / 2.0 {
                0.0
            } else {
                1.0
            }
        } else if dphase > -PI / 2.0 {
            2.0
        } else {
            3.0
        }
    }

    pub fn process(&mut self, block: &[Complex32], out: &mut Vec<f32>) {
        for &sample in block {
            let filtered = self.rrc.process(sample);
            let corrected = self.carrier_track(filtered);

            self.timing_phase += self.timing_freq;
            if self.timing_phase >= 1.0 {
                self.timing_phase -= 1.0;

                // Gardner: Re((late - early) * conj(prompt))
                let error = ((self.late - self.early) * self.prompt.conj()).re;
                self.timing_freq += self.timing_beta * error;
                self.timing_freq = self
                    .timing_freq
                    .clamp(0.9 / self.sps, 1.1 / self.sps);
                self.timing_phase += self.timing_alpha * error;

                let decision = self.prompt;
                if decision.norm_sqr() > 1e-9 {
                    let dphase = (decision * self.prev_decision.conj()).arg();
                    out.push(Self::slice(dphase));
                    self.prev_decision = decision;
                }

                self.early = self.prompt;
                self.prompt = self.late;
            }
            self.late = corrected;
        }
    }
}
