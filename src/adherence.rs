//! Adherence regression
//!
//! Fits observed mobility as a linear function of stringency and scores how
//! far observed mobility falls short of (or beyond) what stringency predicts.

use std::f64::consts::E;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IndexError;
use crate::types::AlignedDay;

/// Relative tolerance under which the normal-equation determinant is zero
const SINGULAR_TOLERANCE: f64 = 1e-10;

/// `observed ≈ slope · stringency + intercept`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Least-squares fit through the normal equations
    /// `[Σs² Σs; Σs n] · [a; b] = [Σs·m; Σm]`.
    ///
    /// Fails when the system is singular: fewer than two points, or no
    /// variance in stringency.
    pub fn fit(points: &[(f64, f64)]) -> Result<Self, IndexError> {
        let n = points.len() as f64;
        let (mut sx, mut sxx, mut sy, mut sxy) = (0.0, 0.0, 0.0, 0.0);
        for &(x, y) in points {
            sx += x;
            sxx += x * x;
            sy += y;
            sxy += x * y;
        }

        let det = n * sxx - sx * sx;
        let scale = (n * sxx).max(1.0);
        if points.len() < 2 || !det.is_finite() || det.abs() <= SINGULAR_TOLERANCE * scale {
            return Err(IndexError::SingularRegression(format!(
                "{} points, determinant {:e}",
                points.len(),
                det
            )));
        }

        let slope = (n * sxy - sx * sy) / det;
        let intercept = (sxx * sy - sx * sxy) / det;
        Ok(Self { slope, intercept })
    }

    pub fn predict(&self, stringency: f64) -> f64 {
        self.slope * stringency + self.intercept
    }
}

/// Per-day regression outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdherenceDay {
    pub anticipated_mobility: f64,
    pub deviation_ratio: f64,
    pub adherence: f64,
}

/// `(anticipated - observed) / |anticipated|`, clipped to `[-1, 0]`.
///
/// A zero anticipated mobility yields 0.
pub fn deviation_ratio(anticipated: f64, observed: f64) -> f64 {
    if anticipated == 0.0 {
        return 0.0;
    }
    ((anticipated - observed) / anticipated.abs()).clamp(-1.0, 0.0)
}

/// `(e^r - e^-1) / (1 - e^-1)`, clipped to `[0, 1]`
pub fn adherence_score(deviation_ratio: f64) -> f64 {
    let floor = E.powi(-1);
    ((deviation_ratio.exp() - floor) / (1.0 - floor)).clamp(0.0, 1.0)
}

/// Fit the aligned table and score every day
pub fn score_adherence(days: &[AlignedDay]) -> Result<(LinearFit, Vec<AdherenceDay>), IndexError> {
    let points: Vec<(f64, f64)> = days
        .iter()
        .map(|d| (d.stringency, d.observed_mobility))
        .collect();
    let fit = LinearFit::fit(&points)?;
    debug!(slope = fit.slope, intercept = fit.intercept, points = points.len(), "fitted mobility model");

    let scored = days
        .iter()
        .map(|d| {
            let anticipated_mobility = fit.predict(d.stringency);
            let deviation_ratio = deviation_ratio(anticipated_mobility, d.observed_mobility);
            AdherenceDay {
                anticipated_mobility,
                deviation_ratio,
                adherence: adherence_score(deviation_ratio),
            }
        })
        .collect();

    Ok((fit, scored))
}
