use crate::app_state::AppEvent;
use crate::storage::entity::task;
use crate::storage::repository::{TaskRepository, TaskStats};
use crate::tasks::model::{TaskError, WorkflowJob, EXCLUSIVE_FUNCS};
use crate::tasks::worker::JobRunner;
use log::{error, info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{sleep, timeout, Duration};

const IDLE_POLL: Duration = Duration::from_secs(2);

pub struct TaskService {
    db: Arc<DatabaseConnection>,
    runner: Arc<dyn JobRunner>,
    evt_tx: mpsc::UnboundedSender<AppEvent>,
    worker_count: usize,
    submit_lock: Mutex<()>,
    wake: Arc<Notify>,
}

impl TaskService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        runner: Arc<dyn JobRunner>,
        evt_tx: mpsc::UnboundedSender<AppEvent>,
        worker_count: usize,
    ) -> Self {
        Self {
            db,
            runner,
            evt_tx,
            worker_count: worker_count.max(1),
            submit_lock: Mutex::new(()),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Queues a job and returns its task id without waiting for it to run.
    ///
    /// An exclusive job is refused while another exclusive task is PENDING or RUNNING.
    /// Submissions are serialized so the check and the insert cannot interleave.
    pub async fn submit(&self, job: WorkflowJob, user: &str) -> Result<i32, TaskError> {
        let _guard = self.submit_lock.lock().await;

        if job.is_exclusive() {
            if let Some(active) = TaskRepository::find_active(self.db.as_ref(), EXCLUSIVE_FUNCS).await? {
                warn!(
                    "Refusing {} on run {}: task {} ({}) is {}",
                    job.func(),
                    job.run_id(),
                    active.id,
                    active.func,
                    active.state
                );
                return Err(TaskError::Conflict {
                    active_id: active.id,
                    func: active.func,
                });
            }
        }

        let id = TaskRepository::create(self.db.as_ref(), job.func(), job.args(), user).await?;
        info!("Queued task {} ({} on run {})", id, job.func(), job.run_id());
        self.wake.notify_one();
        Ok(id)
    }

    /// Starts the resident workers. Each claims the oldest pending task, runs it and records
    /// the outcome; idle workers sleep until a submission wakes them or the poll interval ends.
    pub fn start_workers(&self) {
        for idx in 0..self.worker_count {
            let worker_id = format!("w{}", idx + 1);
            let db = self.db.clone();
            let runner = self.runner.clone();
            let evt_tx = self.evt_tx.clone();
            let wake = self.wake.clone();

            tokio::spawn(async move {
                loop {
                    let claimed = match TaskRepository::claim_next(&db).await {
                        Ok(t) => t,
                        Err(e) => {
                            let _ = evt_tx.send(AppEvent::Log(format!("⚠ claim_next failed: {}", e)));
                            sleep(Duration::from_millis(500)).await;
                            continue;
                        }
                    };

                    let Some(row) = claimed else {
                        let _ = timeout(IDLE_POLL, wake.notified()).await;
                        continue;
                    };

                    info!("🚀 [{}] task {} ({})", worker_id, row.id, row.func);
                    Self::execute(&db, runner.as_ref(), row, &evt_tx).await;
                }
            });
        }
    }

    async fn execute(
        db: &DatabaseConnection,
        runner: &dyn JobRunner,
        row: task::Model,
        evt_tx: &mpsc::UnboundedSender<AppEvent>,
    ) {
        let outcome = match WorkflowJob::from_row(&row.func, &row.args) {
            Ok(job) => runner.run(&job).await,
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(retval) => {
                info!("✓ task {} ({}) completed", row.id, row.func);
                if let Err(e) = TaskRepository::mark_completed(db, row.id, retval.to_string()).await
                {
                    error!("Could not record completion of task {}: {}", row.id, e);
                }
                let _ = evt_tx.send(AppEvent::Message(format!(
                    "✓ Task {} ({}) completed",
                    row.id, row.func
                )));
            }
            Err(message) => {
                warn!("✗ task {} ({}) failed: {}", row.id, row.func, message);
                if let Err(e) = TaskRepository::mark_error(db, row.id, message.clone()).await {
                    error!("Could not record failure of task {}: {}", row.id, e);
                }
                let _ = evt_tx.send(AppEvent::Error(format!(
                    "✗ Task {} ({}) failed: {}",
                    row.id, row.func, message
                )));
            }
        }
        let _ = evt_tx.send(AppEvent::TasksChanged);
    }

    /// Start-up recovery: tasks a previous process left PENDING or RUNNING are marked ERROR.
    pub async fn recover(&self) {
        info!("Recovering interrupted tasks...");
        match TaskRepository::fail_stale(self.db.as_ref()).await {
            Ok(count) if count > 0 => {
                info!("✓ {} interrupted tasks marked as ERROR", count);
                let _ = self.evt_tx.send(AppEvent::Log(format!(
                    "⚠ Recovery: {} interrupted tasks marked as ERROR",
                    count
                )));
            }
            Ok(_) => info!("No interrupted tasks"),
            Err(e) => error!("Task recovery failed: {}", e),
        }
    }

    pub async fn stats(&self) -> Result<TaskStats, TaskError> {
        Ok(TaskRepository::get_stats(self.db.as_ref()).await?)
    }
}
