use crate::domain::TimeSeries;
use crate::error::CoreError;

/// Digital filter selection for [`filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
    BandPass,
}

/// Apply a filter to the series values, returning a new value vector.
///
/// These are single-pole exponential approximations, not textbook IIR
/// designs: unit sample spacing is assumed (dt = 1) and the series' actual
/// time values are ignored. Band-pass chains a high-pass at `cutoff` with a
/// low-pass at the second cutoff taken from `extra`.
pub fn filter(
    series: &TimeSeries,
    kind: FilterKind,
    cutoff: f64,
    extra: &[f64],
) -> Result<Vec<f64>, CoreError> {
    match kind {
        FilterKind::LowPass => Ok(low_pass(&series.values, cutoff)),
        FilterKind::HighPass => Ok(high_pass(&series.values, cutoff)),
        FilterKind::BandPass => {
            let high_cutoff = extra.first().copied().ok_or_else(|| {
                CoreError::invalid("band pass filter needs two cutoff frequencies")
            })?;
            Ok(band_pass(&series.values, cutoff, high_cutoff))
        }
    }
}

pub fn low_pass(signal: &[f64], cutoff: f64) -> Vec<f64> {
    let dt = 1.0;
    let alpha = dt / (1.0 / (2.0 * std::f64::consts::PI * cutoff) + dt);

    let mut filtered = Vec::with_capacity(signal.len());
    if let Some(&first) = signal.first() {
        filtered.push(first);
        for i in 1..signal.len() {
            let prev = filtered[i - 1];
            filtered.push(prev + alpha * (signal[i] - prev));
        }
    }
    filtered
}

pub fn high_pass(signal: &[f64], cutoff: f64) -> Vec<f64> {
    let dt = 1.0;
    let alpha = 1.0 / (2.0 * std::f64::consts::PI * cutoff * dt + 1.0);

    let mut filtered = Vec::with_capacity(signal.len());
    if let Some(&first) = signal.first() {
        filtered.push(first);
        for i in 1..signal.len() {
            let prev = filtered[i - 1];
            filtered.push(alpha * (prev + signal[i] - signal[i - 1]));
        }
    }
    filtered
}

/// High-pass at the lower cutoff followed by low-pass at the upper cutoff;
/// two sequential single-pole passes, not a proper band-pass design.
pub fn band_pass(signal: &[f64], low_cutoff: f64, high_cutoff: f64) -> Vec<f64> {
    let high_passed = high_pass(signal, low_cutoff);
    low_pass(&high_passed, high_cutoff)
}
