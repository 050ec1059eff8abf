//! Operator resolution of external conflicts.
//!
//! Each terminal action removes the conflict in the same transaction as its data change; a
//! failed action leaves both the data and the conflict as they were.

use super::naming::release_name;
use super::{WorkflowContext, WorkflowError, WorkflowResult};
use crate::storage::entity::{external_conflict, source_detection};
use crate::storage::repository::{
    AnnotationRepository, ConflictRepository, DetectionRepository, RunRepository,
    SourceRepository,
};
use log::info;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    /// "Replace detection in source"
    Merge,
    /// "Copy old source name"
    Rename,
    /// "Keep new source name"
    New,
    Ignore,
    Delete,
    /// Tag and/or comment both sides; the conflict stays open.
    Annotate {
        tag: Option<String>,
        comment: Option<String>,
    },
}

impl FromStr for ConflictAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" | "replace" => Ok(ConflictAction::Merge),
            "rename" | "copy" => Ok(ConflictAction::Rename),
            "new" | "keep" => Ok(ConflictAction::New),
            "ignore" => Ok(ConflictAction::Ignore),
            "delete" => Ok(ConflictAction::Delete),
            other => Err(format!(
                "unknown conflict action '{}' (merge|rename|new|ignore|delete|annotate)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    ResolvedMerged,
    ResolvedRenamed,
    ResolvedNew,
    ResolvedIgnored,
    ResolvedDeleted,
    Annotated,
}

impl fmt::Display for ConflictOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictOutcome::ResolvedMerged => "resolved (merged)",
            ConflictOutcome::ResolvedRenamed => "resolved (renamed)",
            ConflictOutcome::ResolvedNew => "resolved (new source)",
            ConflictOutcome::ResolvedIgnored => "resolved (ignored)",
            ConflictOutcome::ResolvedDeleted => "resolved (deleted)",
            ConflictOutcome::Annotated => "annotated",
        };
        f.write_str(s)
    }
}

pub async fn resolve_conflict(
    db: &DatabaseConnection,
    conflict_id: i32,
    action: ConflictAction,
    ctx: &WorkflowContext,
) -> WorkflowResult<ConflictOutcome> {
    let txn = db.begin().await?;
    RunRepository::lock_for_conflict(&txn, conflict_id).await?;
    let conflict = ConflictRepository::find(&txn, conflict_id)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("External conflict {}", conflict_id)))?;
    info!("Conflict {}: {:?}", conflict.id, action);

    let outcome = match action {
        ConflictAction::Merge => merge(&txn, &conflict).await?,
        ConflictAction::Rename => rename(&txn, &conflict).await?,
        ConflictAction::New => keep_new(&txn, &conflict, ctx).await?,
        ConflictAction::Ignore => {
            ConflictRepository::delete(&txn, conflict.id).await?;
            ConflictOutcome::ResolvedIgnored
        }
        ConflictAction::Delete => delete(&txn, &conflict).await?,
        ConflictAction::Annotate { tag, comment } => {
            annotate(&txn, &conflict, tag.as_deref(), comment.as_deref(), ctx).await?
        }
    };

    txn.commit().await?;
    info!("Conflict {} {}", conflict_id, outcome);
    Ok(outcome)
}

async fn current_link<C: ConnectionTrait>(
    db: &C,
    conflict: &external_conflict::Model,
) -> WorkflowResult<source_detection::Model> {
    SourceRepository::source_detection_of(db, conflict.detection_id)
        .await?
        .ok_or_else(|| {
            WorkflowError::Precondition(format!(
                "Detection {} of conflict {} is not accepted",
                conflict.detection_id, conflict.id
            ))
        })
}

async fn conflicting_links<C: ConnectionTrait>(
    db: &C,
    conflict: &external_conflict::Model,
) -> WorkflowResult<Vec<source_detection::Model>> {
    let ids = conflict.conflict_ids().map_err(|e| {
        WorkflowError::Consistency(format!(
            "Conflict {} has an unreadable source-detection list: {}",
            conflict.id, e
        ))
    })?;
    let links = SourceRepository::find_source_detections(db, &ids).await?;
    if links.len() != ids.len() {
        return Err(WorkflowError::Consistency(format!(
            "Conflict {} references source-detections that no longer exist",
            conflict.id
        )));
    }
    Ok(links)
}

async fn single_conflicting_link<C: ConnectionTrait>(
    db: &C,
    conflict: &external_conflict::Model,
) -> WorkflowResult<source_detection::Model> {
    let mut links = conflicting_links(db, conflict).await?;
    if links.len() != 1 {
        return Err(WorkflowError::Precondition(format!(
            "Conflict {} has {} potential sources; exactly one is required",
            conflict.id,
            links.len()
        )));
    }
    Ok(links.remove(0))
}

/// The detection takes the place of the conflicting one inside its source.
async fn merge<C: ConnectionTrait>(
    db: &C,
    conflict: &external_conflict::Model,
) -> WorkflowResult<ConflictOutcome> {
    let current = current_link(db, conflict).await?;
    let old = single_conflicting_link(db, conflict).await?;
    info!(
        "Replacing detection {} with {} in source {}",
        old.detection_id, conflict.detection_id, old.source_id
    );

    SourceRepository::move_to(db, &current, old.source_id).await?;
    SourceRepository::remove_source_detection(db, &old).await?;
    ConflictRepository::delete(db, conflict.id).await?;
    Ok(ConflictOutcome::ResolvedMerged)
}

/// The detection joins the existing source under its name.
async fn rename<C: ConnectionTrait>(
    db: &C,
    conflict: &external_conflict::Model,
) -> WorkflowResult<ConflictOutcome> {
    let current = current_link(db, conflict).await?;
    let existing = single_conflicting_link(db, conflict).await?;
    info!(
        "Adding detection {} to existing source {}",
        conflict.detection_id, existing.source_id
    );

    SourceRepository::move_to(db, &current, existing.source_id).await?;
    ConflictRepository::delete(db, conflict.id).await?;
    Ok(ConflictOutcome::ResolvedRenamed)
}

/// The detection stays a separate source under its own release name.
async fn keep_new<C: ConnectionTrait>(
    db: &C,
    conflict: &external_conflict::Model,
    ctx: &WorkflowContext,
) -> WorkflowResult<ConflictOutcome> {
    let detection = DetectionRepository::find(db, conflict.detection_id)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("Detection {}", conflict.detection_id)))?;
    let current = current_link(db, conflict).await?;
    let name = release_name(&detection.name, &ctx.naming)?;

    if let Some(taken) = SourceRepository::find_by_name(db, &name).await? {
        if taken.id != current.source_id {
            return Err(WorkflowError::Consistency(format!(
                "Existing source with name {} exists so cannot accept this detection",
                name
            )));
        }
    }
    info!("Adding official name {} to detection {}", name, detection.name);
    SourceRepository::rename(db, current.source_id, &name).await?;
    ConflictRepository::delete(db, conflict.id).await?;
    Ok(ConflictOutcome::ResolvedNew)
}

/// Withdraws the detection from its source and closes every conflict it is part of.
async fn delete<C: ConnectionTrait>(
    db: &C,
    conflict: &external_conflict::Model,
) -> WorkflowResult<ConflictOutcome> {
    if let Some(current) = SourceRepository::source_detection_of(db, conflict.detection_id).await? {
        SourceRepository::remove_source_detection(db, &current).await?;
    }
    ConflictRepository::delete(db, conflict.id).await?;
    let others = ConflictRepository::delete_for_detection(db, conflict.detection_id).await?;
    if others > 0 {
        info!(
            "Closed {} further conflicts of detection {}",
            others, conflict.detection_id
        );
    }
    Ok(ConflictOutcome::ResolvedDeleted)
}

async fn annotate<C: ConnectionTrait>(
    db: &C,
    conflict: &external_conflict::Model,
    tag: Option<&str>,
    comment: Option<&str>,
    ctx: &WorkflowContext,
) -> WorkflowResult<ConflictOutcome> {
    let current = current_link(db, conflict).await?;
    let others = conflicting_links(db, conflict).await?;

    if let Some(tag) = tag.map(str::trim).filter(|t| !t.is_empty()) {
        let tag = AnnotationRepository::get_or_create_tag(db, tag, None).await?;
        for sd in std::iter::once(&current).chain(others.iter()) {
            AnnotationRepository::tag_source_detection(db, tag.id, sd.id, &ctx.operator).await?;
        }
    }
    if let Some(text) = comment.map(str::trim).filter(|c| !c.is_empty()) {
        for detection_id in std::iter::once(current.detection_id)
            .chain(others.iter().map(|sd| sd.detection_id))
        {
            AnnotationRepository::add_comment(db, detection_id, text, &ctx.operator).await?;
        }
    }
    Ok(ConflictOutcome::Annotated)
}
