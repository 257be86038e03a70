//! Numerical building blocks for the rankings.

use crate::error::AnalyticsError;
use ta::indicators::SimpleMovingAverage as Sma;
use ta::Next;

/// Simple moving average over `values` with the given window.
///
/// Only fully-populated windows are emitted: the output at position `i`
/// corresponds to the mean of `values[i..i + window]`, so the result has
/// `values.len() - window + 1` elements (or none when the input is shorter
/// than the window).
pub fn simple_moving_average(values: &[f64], window: usize) -> Result<Vec<f64>, AnalyticsError> {
    let mut sma = Sma::new(window).map_err(|e| {
        AnalyticsError::InvalidParameter(format!("moving average window {}: {:?}", window, e))
    })?;

    // `ta` emits partial averages during warm-up; those are dropped.
    let smoothed = values
        .iter()
        .enumerate()
        .map(|(i, value)| (i, sma.next(*value)))
        .filter(|(i, _)| i + 1 >= window)
        .map(|(_, mean)| mean)
        .collect();

    Ok(smoothed)
}

/// Result of an ordinary least squares fit `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

/// Fits a single-variable OLS regression with intercept.
///
/// Returns `None` when the inputs differ in length, hold fewer than two
/// samples, have no variance in `x`, or produce a non-finite coefficient.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (sxx, sxy) = xs
        .iter()
        .zip(ys)
        .fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
            let dx = x - mean_x;
            (sxx + dx * dx, sxy + dx * (y - mean_y))
        });

    if sxx == 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    if !slope.is_finite() || !intercept.is_finite() {
        return None;
    }

    Some(LinearFit { slope, intercept })
}
