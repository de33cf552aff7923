use num_complex::Complex32;

use crate::fir::{lowpass_taps, Fir};
use crate::FmDiscriminator;

/// Binary FSK demodulator for SmartNet control channels (3600 or 9600 baud).
///
/// FM discriminator, low-pass at 1.2x the symbol rate, fixed symbol-period
/// counter, sign slicer.
pub struct Fsk2Demod {
    disc: FmDiscriminator,
    lpf: Fir,
    sps: f32,
    counter: f32,
}

impl Fsk2Demod {
    pub fn new(sample_rate: u32, baud: u32) -> Self {
        let taps = lowpass_taps(sample_rate, baud as f32 * 1.2, 51);
        Self {
            disc: FmDiscriminator::new(sample_rate),
            lpf: Fir::new(taps),
            sps: sample_rate as f32 / baud as f32,
            counter: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.disc.reset();
        self.lpf.reset();
        self.counter = 0.0;
    }

    pub fn samples_per_symbol(&self) -> f32 {
        self.sps
    }

    /// Demodulate a block, appending one 0.0/1.0 per detected symbol.
    pub fn process(&mut self, block: &[Complex32], out: &mut Vec<f32>) {
        for &sample in block {
            let deviation = self.lpf.process(self.disc.step_hz(sample));

            self.counter += 1.0;
            if self.counter >= self.sps {
                self.counter -= self.sps;
                out.push(if deviation > 0.0 { 1.0 } else { 0.0 });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsig::fm_modulate;

    #[test]
    fn test_alternating_bits() {
        let fs = 36000;
        let baud = 3600;
        let mut demod = Fsk2Demod::new(fs, baud);

        // 1,0,1,0,... at +/-1200 Hz deviation
        let bits: Vec<u8> = (0..64).map(|i| (i % 2) as u8).collect();
        let devs: Vec<f32> = bits
            .iter()
            .map(|&b| if b == 1 { 1200.0 } else { -1200.0 })
            .collect();
        let iq = fm_modulate(&devs, fs, (fs / baud) as usize);

        let mut symbols = Vec::new();
        demod.process(&iq, &mut symbols);

        // Skip filter settling, then the alternation must be recovered
        let tail = &symbols[8..symbols.len() - 1];
        let mut ok = 0;
        for pair in tail.windows(2) {
            if pair[0] != pair[1] {
                ok += 1;
            }
        }
        assert!(
            ok >= tail.len() - 2,
            "alternation not preserved: {} of {}",
            ok,
            tail.len() - 1
        );
    }

    #[test]
    fn test_symbol_count_matches_block_length() {
        let fs = 36000;
        let baud = 3600;
        let mut demod = Fsk2Demod::new(fs, baud);
        let iq = vec![Complex32::new(1.0, 0.0); 1000];
        let mut symbols = Vec::new();
        demod.process(&iq, &mut symbols);
        let expected = 1000 / (fs / baud) as usize;
        assert!(
            (symbols.len() as i64 - expected as i64).abs() <= 1,
            "{} symbols for {} expected",
            symbols.len(),
            expected
        );
    }
}
