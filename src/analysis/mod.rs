//! Offline signal-analysis toolkit over captured time series.
//!
//! These operate on demand, never on the streaming path; failures propagate
//! to the caller as typed errors.

pub mod filter;
pub mod script;
pub mod spectrum;
pub mod wavelet;
