use crate::tasks::model::WorkflowJob;
use crate::workflow::delete::delete_run;
use crate::workflow::external::external_cross_match;
use crate::workflow::internal::internal_cross_match;
use crate::workflow::release::release_sources;
use crate::workflow::WorkflowContext;
use async_trait::async_trait;
use log::info;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::sync::Arc;

/// Executes one claimed job. `Err` carries the message stored on the task row.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &WorkflowJob) -> Result<Value, String>;
}

/// Runs jobs against the workflow functions.
pub struct WorkflowRunner {
    db: Arc<DatabaseConnection>,
    ctx: Arc<WorkflowContext>,
}

impl WorkflowRunner {
    pub fn new(db: Arc<DatabaseConnection>, ctx: Arc<WorkflowContext>) -> Self {
        Self { db, ctx }
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

#[async_trait]
impl JobRunner for WorkflowRunner {
    async fn run(&self, job: &WorkflowJob) -> Result<Value, String> {
        info!("▶ {} on run {}", job.func(), job.run_id());
        let db = self.db.as_ref();
        let ctx = self.ctx.as_ref();
        match job {
            WorkflowJob::InternalCrossMatch { run_id } => internal_cross_match(db, *run_id)
                .await
                .map_err(|e| e.to_string())
                .and_then(|flagged| to_json(serde_json::json!({ "unresolved": flagged }))),
            WorkflowJob::ExternalCrossMatch { run_id } => external_cross_match(db, *run_id, ctx)
                .await
                .map_err(|e| e.to_string())
                .and_then(to_json),
            WorkflowJob::ReleaseSources { run_id } => release_sources(db, *run_id, ctx)
                .await
                .map_err(|e| e.to_string())
                .and_then(to_json),
            WorkflowJob::DeleteRun { run_id } => delete_run(db, *run_id)
                .await
                .map_err(|e| e.to_string())
                .and_then(to_json),
        }
    }
}
