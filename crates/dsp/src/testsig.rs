//! Baseband signal synthesis for tests and offline simulation.

use std::f32::consts::PI;

use num_complex::Complex32;

/// FM-modulate one deviation value (Hz) per symbol, holding each for
/// `sps` samples. Phase is continuous across symbol boundaries.
pub fn fm_modulate(deviations_hz: &[f32], sample_rate: u32, sps: usize) -> Vec<Complex32> {
    let mut out = Vec::with_capacity(deviations_hz.len() * sps);
    let mut phase = 0.0f32;
    for &dev in deviations_hz {
        let step = 2.0 * PI * dev / sample_rate as f32;
        for _ in 0..sps {
            phase += step;
            if phase > PI {
                phase -= 2.0 * PI;
            } else if phase < -PI {
                phase += 2.0 * PI;
            }
            out.push(Complex32::from_polar(1.0, phase));
        }
    }
    out
}

/// pi/4-DQPSK modulator: each symbol index advances the carrier phase by
/// +pi/4, +3pi/4, -pi/4, or -3pi/4 (rectangular pulses).
pub fn dqpsk_modulate(symbols: &[usize], sps: usize) -> Vec<Complex32> {
    const DPHASE: [f32; 4] = [PI / 4.0, 3.0 * PI / 4.0, -PI / 4.0, -3.0 * PI / 4.0];
    let mut out = Vec::with_capacity(symbols.len() * sps);
    let mut phase = 0.0f32;
    for &sym in symbols {
        phase += DPHASE[sym & 3];
        if phase > PI {
            phase -= 2.0 * PI;
        } else if phase < -PI {
            phase += 2.0 * PI;
        }
        let point = Complex32::from_polar(1.0, phase);
        for _ in 0..sps {
            out.push(point);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fm_modulate_constant_envelope() {
        let iq = fm_modulate(&[1800.0, -600.0], 48000, 10);
        assert_eq!(iq.len(), 20);
        for s in &iq {
            assert!((s.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_dqpsk_phase_steps() {
        let iq = dqpsk_modulate(&[0, 1, 3], 1);
        let d1 = (iq[1] * iq[0].conj()).arg();
        let d2 = (iq[2] * iq[1].conj()).arg();
        assert!((d1 - 3.0 * PI / 4.0).abs() < 1e-5);
        assert!((d2 + 3.0 * PI / 4.0).abs() < 1e-5);
    }
}
