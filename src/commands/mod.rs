pub mod app_command;

pub use app_command::AppCommand;

use crate::app_service::{
    load_conflicts, load_inspection, load_unresolved, refresh_jobs, refresh_runs,
};
use crate::app_state::AppEvent;
use crate::tasks::TaskService;
use crate::workflow::actions::{dispatch, ActionRequest};
use crate::workflow::conflict::resolve_conflict;
use crate::workflow::WorkflowContext;
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Background side of the console: every command typed in the TUI lands here.
pub struct CommandHandler {
    db: Arc<DatabaseConnection>,
    ctx: Arc<WorkflowContext>,
    tasks: Arc<TaskService>,
    evt_tx: mpsc::UnboundedSender<AppEvent>,
}

impl CommandHandler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ctx: Arc<WorkflowContext>,
        tasks: Arc<TaskService>,
        evt_tx: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            db,
            ctx,
            tasks,
            evt_tx,
        }
    }

    /// Drains the command channel until the TUI drops its sender.
    pub async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<AppCommand>) {
        while let Some(cmd) = cmd_rx.recv().await {
            self.handle(cmd).await;
        }
        info!("command channel closed");
    }

    pub async fn handle(&self, cmd: AppCommand) {
        match cmd {
            AppCommand::Runs => refresh_runs(&self.db, &self.evt_tx).await,
            AppCommand::Jobs => refresh_jobs(&self.db, &self.evt_tx).await,
            AppCommand::Conflicts { run_id } => load_conflicts(&self.db, run_id, &self.evt_tx).await,
            AppCommand::Unresolved { run_id } => {
                load_unresolved(&self.db, run_id, &self.evt_tx).await
            }
            AppCommand::Inspect { run_id } => {
                load_inspection(&self.db, run_id, &self.ctx.inspection, &self.evt_tx).await
            }
            AppCommand::Submit(job) => match self.tasks.submit(job.clone(), &self.ctx.operator).await {
                Ok(id) => {
                    self.message(format!(
                        "Queued task {} ({} on run {})",
                        id,
                        job.func(),
                        job.run_id()
                    ));
                    refresh_jobs(&self.db, &self.evt_tx).await;
                }
                Err(e) => self.error(format!("✗ {}: {}", job.func(), e)),
            },
            AppCommand::Action {
                action,
                detection_ids,
                payload,
            } => {
                let request =
                    ActionRequest::new(detection_ids, &self.ctx.operator).with_payload(payload);
                match dispatch(&self.db, action, &request, &self.ctx).await {
                    Ok(report) => {
                        for msg in report.messages {
                            self.message(format!("✓ {}", msg));
                        }
                        refresh_runs(&self.db, &self.evt_tx).await;
                    }
                    Err(e) => {
                        warn!("action {} failed: {}", action, e);
                        self.error(format!("✗ {}: {}", action, e));
                    }
                }
            }
            AppCommand::Conflict {
                conflict_id,
                action,
            } => match resolve_conflict(&self.db, conflict_id, action, &self.ctx).await {
                Ok(outcome) => {
                    self.message(format!("✓ Conflict {} {}", conflict_id, outcome));
                    refresh_runs(&self.db, &self.evt_tx).await;
                }
                Err(e) => self.error(format!("✗ Conflict {}: {}", conflict_id, e)),
            },
            AppCommand::Help => self.message(app_command::HELP.to_string()),
            AppCommand::Quit => self.message("Quit requested".to_string()),
            AppCommand::Unknown(msg) => self.error(format!("⚠ {}", msg)),
        }
    }

    fn message(&self, msg: String) {
        let _ = self.evt_tx.send(AppEvent::Message(msg));
    }

    fn error(&self, msg: String) {
        let _ = self.evt_tx.send(AppEvent::Error(msg));
    }
}
