//! Pairwise comparison of detections from the same run.
//!
//! `is_match` decides whether two detections are the same object from the pixel positions and
//! their uncertainties; `sanity_check` then compares the derived physical quantities against the
//! run's percentage thresholds.

use crate::storage::entity::detection;
use log::info;
use serde::{Deserialize, Serialize};

fn default_sigma() -> f64 {
    5.0
}

/// `run.sanity_thresholds`, stored as JSON on the run row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityThresholds {
    pub flux: f64,
    pub spatial_extent: (f64, f64),
    pub spectral_extent: (f64, f64),
    #[serde(default = "default_sigma")]
    pub uncertainty_sigma: f64,
}

impl SanityThresholds {
    pub fn from_json(raw: &str) -> Result<Self, MatchError> {
        serde_json::from_str(raw).map_err(|e| MatchError::Thresholds(e.to_string()))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("Same detection.")]
    SameDetection,
    #[error("Detections {0} and {1} belong to different runs.")]
    DifferentRuns(i32, i32),
    #[error("Detection {id} has no value for {field}")]
    MissingValue { id: i32, field: &'static str },
    #[error("Non-finite {quantity} between detections {a} and {b}")]
    NonFinite {
        a: i32,
        b: i32,
        quantity: &'static str,
    },
    #[error("invalid sanity thresholds: {0}")]
    Thresholds(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SanityVerdict {
    Pass,
    Fail(String),
}

impl SanityVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, SanityVerdict::Pass)
    }
}

fn guard_pair(a: &detection::Model, b: &detection::Model) -> Result<(), MatchError> {
    if a.id == b.id {
        return Err(MatchError::SameDetection);
    }
    if a.run_id != b.run_id {
        return Err(MatchError::DifferentRuns(a.id, b.id));
    }
    Ok(())
}

fn value(d: &detection::Model, v: Option<f64>, field: &'static str) -> Result<f64, MatchError> {
    v.ok_or(MatchError::MissingValue { id: d.id, field })
}

fn finite(
    a: &detection::Model,
    b: &detection::Model,
    v: f64,
    quantity: &'static str,
) -> Result<f64, MatchError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(MatchError::NonFinite {
            a: a.id,
            b: b.id,
            quantity,
        })
    }
}

/// Whether two detections of the same run are the same object.
///
/// Exactly coincident pixel positions always match. Otherwise the spatial and spectral
/// separations must both lie within `uncertainty_sigma` times their propagated errors. When the
/// spatial separation is zero the spatial test holds trivially and only the spectral test
/// decides.
pub fn is_match(
    a: &detection::Model,
    b: &detection::Model,
    thresholds: &SanityThresholds,
) -> Result<bool, MatchError> {
    info!("Checking if detections {} and {} are matches", a.id, b.id);
    guard_pair(a, b)?;

    if a.x == b.x && a.y == b.y && a.z == b.z {
        return Ok(true);
    }

    let sigma = thresholds.uncertainty_sigma;
    let dx2 = (a.x - b.x).powi(2);
    let dy2 = (a.y - b.y).powi(2);
    let d_space = (dx2 + dy2).sqrt();

    let spatial_ok = if dx2 + dy2 == 0.0 {
        true
    } else {
        let ex = value(a, a.err_x, "err_x")?.powi(2) + value(b, b.err_x, "err_x")?.powi(2);
        let ey = value(a, a.err_y, "err_y")?.powi(2) + value(b, b.err_y, "err_y")?.powi(2);
        let d_space_err = finite(
            a,
            b,
            (dx2 * ex + dy2 * ey).sqrt() / (dx2 + dy2),
            "spatial separation error",
        )?;
        info!("Spatial separation: {} +/- {}", d_space, d_space_err);
        d_space <= sigma * d_space_err
    };

    let d_spec = (a.z - b.z).abs();
    let d_spec_err = finite(
        a,
        b,
        (value(a, a.err_z, "err_z")?.powi(2) + value(b, b.err_z, "err_z")?.powi(2)).sqrt(),
        "spectral separation error",
    )?;
    let spectral_ok = d_spec <= sigma * d_spec_err;
    info!(
        "Spectral separation: {} +/- {}; tests passing: ({}, {})",
        d_spec, d_spec_err, spatial_ok, spectral_ok
    );

    Ok(spatial_ok && spectral_ok)
}

/// Symmetric percentage difference; identical zeros differ by nothing.
pub fn percentage_difference(a: f64, b: f64) -> f64 {
    let mean = (a.abs() + b.abs()) / 2.0;
    if mean == 0.0 {
        return 0.0;
    }
    (a - b).abs() * 100.0 / mean
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Compares flux, ellipse axes and line widths of two matching detections.
///
/// The first failing quantity, in the order flux, ell_maj, ell_min, w20, w50, is reported.
pub fn sanity_check(
    a: &detection::Model,
    b: &detection::Model,
    thresholds: &SanityThresholds,
) -> Result<SanityVerdict, MatchError> {
    info!("Running sanity check between detections {} and {}", a.id, b.id);
    guard_pair(a, b)?;

    let (spatial_min, spatial_max) = thresholds.spatial_extent;
    let (spectral_min, spectral_max) = thresholds.spectral_extent;
    let checks: [(&'static str, Option<f64>, Option<f64>, f64); 5] = [
        ("flux", a.f_sum, b.f_sum, thresholds.flux),
        ("ell_maj", a.ell_maj, b.ell_maj, spatial_max),
        ("ell_min", a.ell_min, b.ell_min, spatial_min),
        ("w20", a.w20, b.w20, spectral_max),
        ("w50", a.w50, b.w50, spectral_min),
    ];

    for (field, va, vb, limit) in checks {
        let diff = percentage_difference(value(a, va, field)?, value(b, vb, field)?);
        let diff = finite(a, b, diff, field)?;
        info!("{} comparison: {}% (threshold {}%)", field, diff, limit);
        if diff > limit {
            return Ok(SanityVerdict::Fail(format!(
                "Detections: {}, {} Var: {} Check: {}% > {}%",
                a.id,
                b.id,
                field,
                round2(diff),
                limit
            )));
        }
    }

    Ok(SanityVerdict::Pass)
}
