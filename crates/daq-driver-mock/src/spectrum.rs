//! Synthetic spectra for the mock spectrometer.

use crate::common::MockRng;

/// Wavelength of the simulated emission line, nanometres.
pub const EMISSION_LINE_NM: f64 = 650.0;

/// Linear dispersion of the simulated spectrograph, nanometres per column.
pub const DISPERSION_NM_PER_PIXEL: f64 = 0.1;

const BASELINE_COUNTS: f64 = 500.0;
const PEAK_COUNTS: f64 = 20_000.0;

/// Generate one frame of a synthetic emission spectrum.
///
/// The frame contains:
/// - a flat dark/baseline level
/// - a Gaussian emission line placed according to `centre_wavelength_nm`
///   (the line sits on the centre column when the grating is centred on it)
/// - a vertical intensity profile peaking in the middle row, so binned and
///   full-sensor readouts look different
/// - uniform read noise of `noise_counts`
///
/// Intensities scale with `exposure_s` and saturate at `u16::MAX`.
pub fn generate_spectrum(
    width: u32,
    height: u32,
    centre_wavelength_nm: f64,
    exposure_s: f64,
    noise_counts: f64,
    rng: &MockRng,
) -> Vec<u16> {
    let w = width as usize;
    let h = height as usize;
    let mut buffer = Vec::with_capacity(w * h);

    let peak_col = w as f64 / 2.0 + (EMISSION_LINE_NM - centre_wavelength_nm) / DISPERSION_NM_PER_PIXEL;
    let sigma = (w as f64 / 80.0).max(1.0);
    let gain = exposure_s.max(0.0);
    let mid_row = (h as f64 - 1.0) / 2.0;

    for y in 0..h {
        let row_weight = if h > 1 {
            let d = (y as f64 - mid_row) / (h as f64 / 2.0);
            (-2.0 * d * d).exp()
        } else {
            1.0
        };

        for x in 0..w {
            let dx = x as f64 - peak_col;
            let line = PEAK_COUNTS * (-(dx * dx) / (2.0 * sigma * sigma)).exp();
            let value = BASELINE_COUNTS + gain * row_weight * line + rng.noise(noise_counts);
            buffer.push(value.clamp(0.0, f64::from(u16::MAX)) as u16);
        }
    }

    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_dimensions() {
        let rng = MockRng::new(Some(1));
        assert_eq!(generate_spectrum(64, 4, 650.0, 1.0, 0.0, &rng).len(), 256);
        assert!(generate_spectrum(0, 1, 650.0, 1.0, 0.0, &rng).is_empty());
    }

    #[test]
    fn test_peak_follows_grating() {
        let rng = MockRng::new(Some(1));
        let centred = generate_spectrum(200, 1, EMISSION_LINE_NM, 1.0, 0.0, &rng);
        let argmax = |v: &[u16]| {
            v.iter()
                .enumerate()
                .max_by_key(|(_, &p)| p)
                .map(|(i, _)| i)
                .unwrap()
        };
        assert_eq!(argmax(&centred), 100);

        // Moving the grating 5 nm to the blue moves the line 50 columns right
        let shifted = generate_spectrum(200, 1, EMISSION_LINE_NM - 5.0, 1.0, 0.0, &rng);
        assert_eq!(argmax(&shifted), 150);
    }

    #[test]
    fn test_baseline_without_exposure() {
        let rng = MockRng::new(Some(1));
        let dark = generate_spectrum(32, 1, 650.0, 0.0, 0.0, &rng);
        assert!(dark.iter().all(|&p| p == 500));
    }
}
