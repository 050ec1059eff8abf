use crate::app_state::AppEvent;
use crate::config::InspectionConfig;
use crate::storage::repository::{ConflictRepository, DetectionRepository, RunRepository, TaskRepository};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;

const LIST_LIMIT: u64 = 100;

pub async fn refresh_ui(db: &Arc<DatabaseConnection>, tx: &mpsc::UnboundedSender<AppEvent>) {
    refresh_runs(db, tx).await;
    refresh_jobs(db, tx).await;
}

pub async fn refresh_runs(db: &Arc<DatabaseConnection>, tx: &mpsc::UnboundedSender<AppEvent>) {
    match RunRepository::summaries(db.as_ref(), LIST_LIMIT).await {
        Ok(runs) => {
            let _ = tx.send(AppEvent::Runs(runs));
        }
        Err(e) => log::warn!("run summaries failed: {}", e),
    }
}

pub async fn refresh_jobs(db: &Arc<DatabaseConnection>, tx: &mpsc::UnboundedSender<AppEvent>) {
    let jobs = TaskRepository::list_recent(db.as_ref(), LIST_LIMIT).await;
    let stats = TaskRepository::get_stats(db.as_ref()).await;
    match (jobs, stats) {
        (Ok(jobs), Ok(stats)) => {
            let _ = tx.send(AppEvent::Jobs(jobs, stats));
        }
        (Err(e), _) | (_, Err(e)) => log::warn!("task listing failed: {}", e),
    }
}

pub async fn load_conflicts(
    db: &Arc<DatabaseConnection>,
    run_id: i32,
    tx: &mpsc::UnboundedSender<AppEvent>,
) {
    match ConflictRepository::list_by_run(db.as_ref(), run_id).await {
        Ok(rows) => {
            let _ = tx.send(AppEvent::Conflicts(run_id, rows));
        }
        Err(e) => {
            let _ = tx.send(AppEvent::Error(format!("✗ conflicts of run {}: {}", run_id, e)));
        }
    }
}

pub async fn load_unresolved(
    db: &Arc<DatabaseConnection>,
    run_id: i32,
    tx: &mpsc::UnboundedSender<AppEvent>,
) {
    match DetectionRepository::list_unresolved(db.as_ref(), run_id).await {
        Ok(rows) => {
            let _ = tx.send(AppEvent::Unresolved(run_id, rows));
        }
        Err(e) => {
            let _ = tx.send(AppEvent::Error(format!(
                "✗ unresolved detections of run {}: {}",
                run_id, e
            )));
        }
    }
}

pub async fn load_inspection(
    db: &Arc<DatabaseConnection>,
    run_id: i32,
    thresholds: &InspectionConfig,
    tx: &mpsc::UnboundedSender<AppEvent>,
) {
    match DetectionRepository::pending_inspection(
        db.as_ref(),
        run_id,
        thresholds.min_n_pix,
        thresholds.min_rel,
    )
    .await
    {
        Ok(rows) => {
            if rows.is_empty() {
                let _ = tx.send(AppEvent::Message(format!(
                    "✓ Nothing left to inspect in run {}",
                    run_id
                )));
            }
            let _ = tx.send(AppEvent::Inspect(run_id, rows));
        }
        Err(e) => {
            let _ = tx.send(AppEvent::Error(format!(
                "✗ inspection queue of run {}: {}",
                run_id, e
            )));
        }
    }
}
