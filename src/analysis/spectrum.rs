use num_complex::Complex;
use rustfft::FftPlanner;

use crate::domain::TimeSeries;
use crate::error::CoreError;

/// Single-sided magnitude spectrum with its frequency axis. The two vectors
/// are always the same length.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub frequencies: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

/// FFT magnitude spectrum of a time series.
///
/// The sampling rate is derived from the first two time samples; values are
/// zero-padded to the next power of two before the transform. Magnitudes are
/// normalized by the original (pre-padding) sample count and only bins below
/// Nyquist are returned.
pub fn fft(series: &TimeSeries) -> Result<Spectrum, CoreError> {
    let n = series.values.len();
    if n < 2 || series.times.len() < 2 {
        return Err(CoreError::invalid(
            "fft requires at least two samples to derive the sampling rate",
        ));
    }

    let dt = series.times[1] - series.times[0];
    if dt <= 0.0 {
        return Err(CoreError::invalid("fft requires strictly increasing times"));
    }
    let fs = 1.0 / dt;

    let padded_len = n.next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = series
        .values
        .iter()
        .map(|&v| Complex::new(v, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)).take(padded_len - n))
        .collect();

    let mut planner = FftPlanner::new();
    let transform = planner.plan_fft_forward(padded_len);
    transform.process(&mut buffer);

    let bins = padded_len / 2;
    let magnitudes: Vec<f64> = buffer[..bins].iter().map(|c| c.norm() / n as f64).collect();

    let df = fs / padded_len as f64;
    let frequencies: Vec<f64> = (0..bins).map(|k| k as f64 * df).collect();

    Ok(Spectrum { frequencies, magnitudes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine_series(fs: f64, n: usize, freq: f64) -> TimeSeries {
        let times: Vec<f64> = (0..n).map(|i| i as f64 / fs).collect();
        let values: Vec<f64> = times.iter().map(|t| (2.0 * PI * freq * t).sin()).collect();
        TimeSeries::new(times, values, fs)
    }

    #[test]
    fn sine_peak_lands_on_nearest_bin() {
        let fs = 1024.0;
        let n = 1024;
        let freq = 64.0;
        let spectrum = fft(&sine_series(fs, n, freq)).unwrap();

        assert_eq!(spectrum.magnitudes.len(), n / 2);
        assert_eq!(spectrum.frequencies.len(), n / 2);

        // Skip DC when locating the peak.
        let (peak_bin, _) = spectrum.magnitudes[1..]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        let peak_freq = spectrum.frequencies[peak_bin + 1];

        let resolution = fs / n as f64;
        assert!(
            (peak_freq - freq).abs() <= resolution,
            "peak at {} Hz, expected {} Hz",
            peak_freq,
            freq
        );
        // Full-scale sine splits its energy across the two symmetric bins.
        assert!((spectrum.magnitudes[peak_bin + 1] - 0.5).abs() < 0.05);
    }

    #[test]
    fn non_power_of_two_input_is_padded() {
        let fs = 100.0;
        let spectrum = fft(&sine_series(fs, 300, 10.0)).unwrap();
        // 300 pads to 512; single-sided output is half of that.
        assert_eq!(spectrum.magnitudes.len(), 256);
        let df = fs / 512.0;
        assert!((spectrum.frequencies[1] - df).abs() < 1e-12);
    }

    #[test]
    fn frequency_axis_starts_at_dc() {
        let spectrum = fft(&sine_series(8.0, 8, 2.0)).unwrap();
        assert_eq!(spectrum.frequencies[0], 0.0);
    }

    #[test]
    fn too_short_series_is_rejected() {
        let s = TimeSeries::new(vec![0.0], vec![1.0], 1.0);
        let err = fft(&s).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }
}
