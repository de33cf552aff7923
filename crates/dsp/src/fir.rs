use std::f32::consts::PI;

use num_complex::Complex32;

/// FIR filter over real samples, ring-buffered.
pub struct Fir {
    taps: Vec<f32>,
    buffer: Vec<f32>,
    index: usize,
}

impl Fir {
    pub fn new(taps: Vec<f32>) -> Self {
        let len = taps.len();
        Self {
            taps,
            buffer: vec![0.0; len],
            index: 0,
        }
    }

    pub fn process(&mut self, input: f32) -> f32 {
        self.buffer[self.index] = input;

        let mut output = 0.0;
        let mut idx = self.index;
        for &tap in &self.taps {
            output += tap * self.buffer[idx];
            idx = if idx == 0 { self.buffer.len() - 1 } else { idx - 1 };
        }

        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|v| *v = 0.0);
        self.index = 0;
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}

/// FIR filter over complex samples, sharing one set of real taps.
pub struct ComplexFir {
    taps: Vec<f32>,
    buffer: Vec<Complex32>,
    index: usize,
}

impl ComplexFir {
    pub fn new(taps: Vec<f32>) -> Self {
        let len = taps.len();
        Self {
            taps,
            buffer: vec![Complex32::new(0.0, 0.0); len],
            index: 0,
        }
    }

    pub fn process(&mut self, input: Complex32) -> Complex32 {
        self.buffer[self.index] = input;

        let mut output = Complex32::new(0.0, 0.0);
        let mut idx = self.index;
        for &tap in &self.taps {
            output += self.buffer[idx] * tap;
            idx = if idx == 0 { self.buffer.len() - 1 } else { idx - 1 };
        }

        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|v| *v = Complex32::new(0.0, 0.0));
        self.index = 0;
    }
}

/// Hamming-windowed sinc low-pass taps, normalized to unity DC gain.
pub fn lowpass_taps(sample_rate: u32, cutoff_hz: f32, num_taps: usize) -> Vec<f32> {
    let fc = cutoff_hz / sample_rate as f32;
    let m = (num_taps - 1) as f32;
    let mut taps = Vec::with_capacity(num_taps);

    for i in 0..num_taps {
        let n = i as f32 - m / 2.0;
        let sinc = if n == 0.0 {
            2.0 * fc
        } else {
            (2.0 * PI * fc * n).sin() / (PI * n)
        };
        let window = 0.54 - 0.46 * (2.0 * PI * i as f32 / m).cos();
        taps.push(sinc * window);
    }

    let sum: f32 = taps.iter().sum();
    for tap in &mut taps {
        *tap /= sum;
    }
    taps
}

/// Root-raised-cosine taps spanning `span` symbols, normalized to unit energy.
pub fn rrc_taps(sample_rate: u32, symbol_rate: u32, rolloff: f32, span: usize) -> Vec<f32> {
    let sps = sample_rate as f32 / symbol_rate as f32;
    let num_taps = (span as f32 * sps) as usize + 1;
    let t_sym = 1.0 / symbol_rate as f32;
    let t_samp = 1.0 / sample_rate as f32;
    let center = (num_taps / 2) as i32;

    let mut taps = Vec::with_capacity(num_taps);
    for i in 0..num_taps {
        let t = (i as i32 - center) as f32 * t_samp;
        let tap = if t == 0.0 {
            (1.0 + rolloff * (4.0 / PI - 1.0)) / t_sym
        } else if ((t.abs() - t_sym / (4.0 * rolloff)).abs()) < 1e-9 {
            // Singularity at t = ±T/(4α)
            (rolloff / t_sym)
                * ((1.0 + 2.0 / PI) * (PI / (4.0 * rolloff)).sin()
                    + (1.0 - 2.0 / PI) * (PI / (4.0 * rolloff)).cos())
        } else {
            let x = t / t_sym;
            let num = (PI * x * (1.0 - rolloff)).sin()
                + 4.0 * rolloff * x * (PI * x * (1.0 + rolloff)).cos();
            let den = PI * x * (1.0 - (4.0 * rolloff * x).powi(2));
            num / den / t_sym
        };
        taps.push(tap);
    }

    let energy: f32 = taps.iter().map(|t| t * t).sum();
    let norm = energy.sqrt();
    for tap in &mut taps {
        *tap /= norm;
    }
    taps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowpass_dc_gain() {
        let taps = lowpass_taps(48000, 6000.0, 51);
        let mut fir = Fir::new(taps);
        // Unity DC gain: a constant input settles to the same constant
        let mut last = 0.0;
        for _ in 0..200 {
            last = fir.process(1.0);
        }
        assert!((last - 1.0).abs() < 1e-4, "DC gain = {}", last);
    }

    #[test]
    fn test_lowpass_rejects_high_frequency() {
        let taps = lowpass_taps(48000, 2000.0, 51);
        let mut fir = Fir::new(taps);
        // 20 kHz tone through a 2 kHz low-pass should be heavily attenuated
        let mut peak = 0.0f32;
        for i in 0..500 {
            let x = (2.0 * PI * 20000.0 * i as f32 / 48000.0).sin();
            let y = fir.process(x);
            if i > 100 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.05, "stopband peak = {}", peak);
    }

    #[test]
    fn test_rrc_taps_symmetric() {
        let taps = rrc_taps(72000, 18000, 0.35, 8);
        let n = taps.len();
        for i in 0..n / 2 {
            assert!(
                (taps[i] - taps[n - 1 - i]).abs() < 1e-5,
                "tap {} asymmetric",
                i
            );
        }
    }
}
