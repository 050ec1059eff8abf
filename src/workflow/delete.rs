use super::{load_run, WorkflowResult};
use crate::storage::repository::{DetectionRepository, RunRepository};
use log::info;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeleteReport {
    pub run: String,
    pub detections: usize,
}

/// Removes a run with everything hanging off it. Sources shared with other runs survive.
pub async fn delete_run(db: &DatabaseConnection, run_id: i32) -> WorkflowResult<DeleteReport> {
    let run = load_run(db, run_id).await?;
    let txn = db.begin().await?;
    RunRepository::lock_for_write(&txn, run_id).await?;

    let detections = DetectionRepository::list_by_run(&txn, run_id).await?;
    for d in &detections {
        DetectionRepository::delete_with_dependants(&txn, d.id).await?;
    }
    RunRepository::delete_shell(&txn, run_id).await?;
    txn.commit().await?;

    info!("Deleted run {} ({} detections)", run.name, detections.len());
    Ok(DeleteReport {
        run: run.name,
        detections: detections.len(),
    })
}
