//! Smoothing of raw count series
//!
//! Raw device counts are noisy (probe-request flapping, scan cycles), so every
//! downstream statistic works on a smoothed series instead. Two modes:
//! - `Ema` - exponential moving average, `α·raw + (1−α)·prev`, seeded with
//!   the first raw value
//! - `Window` - simple trailing mean over the last W raw values
//!
//! Both are deterministic folds over one location's readings in order: a value
//! depends only on readings at or before it, never on other locations. The
//! store materializes values incrementally via `SmootherState`; `smooth_series`
//! is the reference fold the materialized view must stay equivalent to.

use std::collections::VecDeque;

/// Smoothing mode and its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Smoothing {
    Ema { alpha: f64 },
    Window { size: usize },
}

impl Smoothing {
    /// Fresh per-location fold state for this mode.
    pub fn new_state(&self) -> SmootherState {
        match *self {
            Smoothing::Ema { alpha } => SmootherState::Ema { alpha, last: None },
            Smoothing::Window { size } => SmootherState::Window {
                window: VecDeque::with_capacity(size.max(1)),
                size: size.max(1),
                sum: 0,
            },
        }
    }
}

/// Incremental fold state for one location's series.
#[derive(Debug, Clone)]
pub enum SmootherState {
    Ema {
        alpha: f64,
        last: Option<f64>,
    },
    Window {
        window: VecDeque<u32>,
        size: usize,
        sum: u64,
    },
}

impl SmootherState {
    /// Fold in the next raw value and return the smoothed value for its row.
    pub fn push(&mut self, raw: u32) -> f64 {
        match self {
            SmootherState::Ema { alpha, last } => {
                let smoothed = match *last {
                    // Seed: first row is passed through unchanged
                    None => f64::from(raw),
                    Some(prev) => *alpha * f64::from(raw) + (1.0 - *alpha) * prev,
                };
                *last = Some(smoothed);
                smoothed
            }
            SmootherState::Window { window, size, sum } => {
                window.push_back(raw);
                *sum += u64::from(raw);
                if window.len() > *size {
                    if let Some(evicted) = window.pop_front() {
                        *sum -= u64::from(evicted);
                    }
                }
                *sum as f64 / window.len() as f64
            }
        }
    }
}

/// Reference fold: smooth a whole raw series in order.
///
/// The store's incrementally materialized values must equal this output for
/// the same raw inputs.
pub fn smooth_series(smoothing: &Smoothing, raw: &[u32]) -> Vec<f64> {
    let mut state = smoothing.new_state();
    raw.iter().map(|&value| state.push(value)).collect()
}
