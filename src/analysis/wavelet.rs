use crate::domain::TimeSeries;
use crate::error::CoreError;

/// Morlet central frequency. 6.0 balances time and frequency resolution and
/// keeps the wavelet's mean close to zero.
const CENTRAL_FREQ: f64 = 6.0;

/// Continuous wavelet transform output. `coefficients` is indexed
/// [scale][time]; `frequencies` carries the scale values verbatim rather
/// than true pseudo-frequencies (a kept simplification of the upstream
/// analysis contract).
#[derive(Debug, Clone)]
pub struct WaveletResult {
    pub coefficients: Vec<Vec<f64>>,
    pub times: Vec<f64>,
    pub scales: Vec<f64>,
    pub frequencies: Vec<f64>,
}

/// Continuous wavelet transform with a complex Morlet mother wavelet.
///
/// For each scale the signal is convolved over a window of
/// `max(10, 4 * scale)` samples centred on each output position; taps falling
/// outside the series contribute nothing. Coefficient magnitudes are scaled
/// by `1 / sqrt(scale)`.
pub fn transform(series: &TimeSeries, scales: &[f64]) -> Result<WaveletResult, CoreError> {
    let signal = &series.values;
    let times = &series.times;
    if signal.len() < 2 || times.len() < 2 {
        return Err(CoreError::invalid(
            "wavelet transform requires at least two samples to derive the sampling interval",
        ));
    }

    let dt = times[1] - times[0];
    let signal_len = signal.len();

    let mut coefficients = vec![vec![0.0; signal_len]; scales.len()];

    for (row, &scale) in coefficients.iter_mut().zip(scales) {
        let window_size = (4.0 * scale) as usize;
        let window_size = window_size.max(10);
        let half_window = (window_size / 2) as isize;

        for (t, coefficient) in row.iter_mut().enumerate() {
            let mut sum_real = 0.0;
            let mut sum_imag = 0.0;

            for n in -half_window..half_window {
                let idx = t as isize + n;
                if idx < 0 || idx >= signal_len as isize {
                    continue;
                }

                let tau = n as f64 * dt;
                let arg = CENTRAL_FREQ * tau / scale;
                let envelope = (-arg * arg / 2.0).exp();

                sum_real += signal[idx as usize] * envelope * arg.cos();
                sum_imag += signal[idx as usize] * envelope * arg.sin();
            }

            *coefficient = (sum_real * sum_real + sum_imag * sum_imag).sqrt() / scale.sqrt();
        }
    }

    Ok(WaveletResult {
        coefficients,
        times: times.clone(),
        scales: scales.to_vec(),
        frequencies: scales.to_vec(),
    })
}

/// Per-scale mean of squared coefficients across time.
pub fn wavelet_power(coefficients: &[Vec<f64>]) -> Vec<f64> {
    coefficients
        .iter()
        .map(|row| {
            if row.is_empty() {
                0.0
            } else {
                row.iter().map(|c| c * c).sum::<f64>() / row.len() as f64
            }
        })
        .collect()
}
