//! Cross-matching a run against the accepted sources of every other run.
//!
//! Classification is pure: `classify` takes a detection and its nearby candidates and returns a
//! `Decision`. `external_cross_match` gathers candidates, classifies every accepted detection of
//! the run and persists the decisions in one transaction.

use super::components::component_for_run;
use super::matching::MatchError;
use super::naming::release_name;
use super::{load_run, WorkflowContext, WorkflowError, WorkflowResult};
use crate::config::CrossMatchConfig;
use crate::storage::entity::detection;
use crate::storage::repository::{
    AcceptedDetection, AnnotationRepository, ConflictRepository, DetectionRepository,
    RunRepository, SkyBox, SourceRepository,
};
use log::{info, warn};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const AUTHOR: &str = "external_cross_match";

/// A nearby accepted detection from another run, with that run's survey component.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub accepted: AcceptedDetection,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Same object already released in the same component.
    AutoDelete { duplicates: Vec<String> },
    /// Same object released in another component; adopt its source.
    AutoRename { source_id: i32, source_name: String },
    /// Close enough to need an operator.
    Conflict { source_detection_ids: Vec<i32> },
    /// Nothing nearby.
    New,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ExternalReport {
    pub deleted: Vec<i32>,
    pub renamed: Vec<i32>,
    pub conflicts: Vec<i32>,
    pub accepted: Vec<i32>,
}

/// Great-circle distance in arcseconds.
pub fn angular_separation_arcsec(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (dec1, dec2) = (dec1.to_radians(), dec2.to_radians());
    let d_ra = (ra2 - ra1).to_radians();
    let d_dec = dec2 - dec1;
    let h = (d_dec / 2.0).sin().powi(2) + dec1.cos() * dec2.cos() * (d_ra / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin().to_degrees() * 3600.0
}

fn sky(d: &detection::Model) -> Result<(f64, f64, f64), MatchError> {
    let missing = |field: &'static str| MatchError::MissingValue { id: d.id, field };
    Ok((
        d.ra.ok_or_else(|| missing("ra"))?,
        d.dec.ok_or_else(|| missing("dec"))?,
        d.freq.ok_or_else(|| missing("freq"))?,
    ))
}

/// Half widths of the search box; RA widens with declination so the box covers the same sky.
pub fn search_box(ra: f64, dec: f64, cfg: &CrossMatchConfig) -> SkyBox {
    let cos_dec = dec.to_radians().cos();
    let ra_half_width = if cos_dec < 1e-6 {
        180.0
    } else {
        (cfg.search_threshold / cos_dec).min(180.0)
    };
    SkyBox {
        ra,
        dec,
        ra_half_width,
        dec_half_width: cfg.search_threshold,
    }
}

pub fn classify(
    detection: &detection::Model,
    component: &str,
    candidates: &[Candidate],
    cfg: &CrossMatchConfig,
) -> WorkflowResult<Decision> {
    let (ra, dec, freq) = sky(detection)?;

    let mut duplicates = Vec::new();
    let mut adopt: BTreeMap<i32, String> = BTreeMap::new();
    let mut manual = Vec::new();

    for candidate in candidates {
        let other = &candidate.accepted;
        let (c_ra, c_dec, c_freq) = sky(&other.detection)?;
        let sep = angular_separation_arcsec(ra, dec, c_ra, c_dec);
        let d_freq = (freq - c_freq).abs() / 1e6;
        if !sep.is_finite() || !d_freq.is_finite() {
            return Err(MatchError::NonFinite {
                a: detection.id,
                b: other.detection.id,
                quantity: "sky separation",
            }
            .into());
        }

        if sep <= cfg.thresh_spat_auto && d_freq <= cfg.thresh_spec_auto {
            if candidate.component == component {
                duplicates.push(other.source.name.clone());
            } else {
                adopt.insert(other.source.id, other.source.name.clone());
            }
        } else if sep <= cfg.thresh_spat && d_freq <= cfg.thresh_spec {
            manual.push(other.source_detection.id);
        }
    }

    if !duplicates.is_empty() {
        return Ok(Decision::AutoDelete { duplicates });
    }
    if adopt.len() > 1 {
        let names: Vec<&str> = adopt.values().map(String::as_str).collect();
        return Err(WorkflowError::Consistency(format!(
            "Detection {} matches multiple existing sources: {}",
            detection.name,
            names.join(", ")
        )));
    }
    if let Some((source_id, source_name)) = adopt.into_iter().next() {
        return Ok(Decision::AutoRename {
            source_id,
            source_name,
        });
    }
    if !manual.is_empty() {
        manual.sort_unstable();
        manual.dedup();
        return Ok(Decision::Conflict {
            source_detection_ids: manual,
        });
    }
    Ok(Decision::New)
}

pub async fn external_cross_match(
    db: &DatabaseConnection,
    run_id: i32,
    ctx: &WorkflowContext,
) -> WorkflowResult<ExternalReport> {
    let run = load_run(db, run_id).await?;
    let component = component_for_run(db, &run, ctx).await?;
    info!(
        "External cross-match of run {} (component {})",
        run.name, component
    );

    let txn = db.begin().await?;
    RunRepository::lock_for_write(&txn, run_id).await?;

    if DetectionRepository::count_unresolved(&txn, run_id).await? > 0 {
        return Err(WorkflowError::Precondition(format!(
            "Run {} has unresolved detections; resolve them before the external cross-match",
            run.name
        )));
    }
    if ConflictRepository::count_by_run(&txn, run_id).await? > 0 {
        return Err(WorkflowError::Precondition(format!(
            "Run {} has outstanding external conflicts; resolve them first",
            run.name
        )));
    }

    let accepted = DetectionRepository::accepted_in_run(&txn, run_id, true).await?;
    let mut components: HashMap<i32, String> = HashMap::new();
    let mut report = ExternalReport::default();

    for current in &accepted {
        let d = &current.detection;
        let (ra, dec, _) = sky(d)?;
        let nearby =
            DetectionRepository::accepted_near(&txn, run_id, search_box(ra, dec, &ctx.crossmatch))
                .await?;

        let mut candidates = Vec::with_capacity(nearby.len());
        for other in nearby {
            let other_run = other.detection.run_id;
            let other_component = match components.get(&other_run) {
                Some(c) => c.clone(),
                None => {
                    let r = load_run(&txn, other_run).await?;
                    let c = component_for_run(&txn, &r, ctx).await?;
                    components.insert(other_run, c.clone());
                    c
                }
            };
            candidates.push(Candidate {
                accepted: other,
                component: other_component,
            });
        }

        match classify(d, &component, &candidates, &ctx.crossmatch)? {
            Decision::AutoDelete { duplicates } => {
                info!(
                    "Detection {} already released as {}; removing it",
                    d.name,
                    duplicates.join(", ")
                );
                SourceRepository::remove_source_detection(&txn, &current.source_detection).await?;
                AnnotationRepository::add_comment(
                    &txn,
                    d.id,
                    &format!(
                        "Removed by external cross-match: duplicate of {} in {}",
                        duplicates.join(", "),
                        component
                    ),
                    AUTHOR,
                )
                .await?;
                report.deleted.push(d.id);
            }
            Decision::AutoRename {
                source_id,
                source_name,
            } => {
                info!("Detection {} joins existing source {}", d.name, source_name);
                SourceRepository::move_to(&txn, &current.source_detection, source_id).await?;
                report.renamed.push(d.id);
            }
            Decision::Conflict {
                source_detection_ids,
            } => {
                let conflict =
                    ConflictRepository::create(&txn, run_id, d.id, &source_detection_ids).await?;
                warn!(
                    "Detection {} needs manual resolution (conflict {})",
                    d.name, conflict.id
                );
                report.conflicts.push(conflict.id);
            }
            Decision::New => {
                let name = release_name(&current.source.name, &ctx.naming)?;
                if let Some(existing) = SourceRepository::find_by_name(&txn, &name).await? {
                    if existing.id != current.source.id {
                        return Err(WorkflowError::Consistency(format!(
                            "Release name {} of detection {} is already taken",
                            name, d.name
                        )));
                    }
                }
                report.accepted.push(d.id);
            }
        }
    }

    txn.commit().await?;
    info!(
        "External cross-match of run {}: {} deleted, {} renamed, {} conflicts, {} new",
        run.name,
        report.deleted.len(),
        report.renamed.len(),
        report.conflicts.len(),
        report.accepted.len()
    );
    Ok(report)
}
