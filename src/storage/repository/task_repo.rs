use crate::storage::entity::task::{self, ActiveModel as TaskActiveModel, Entity as Task};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};

pub const PENDING: &str = "PENDING";
pub const RUNNING: &str = "RUNNING";
pub const COMPLETED: &str = "COMPLETED";
pub const ERROR: &str = "ERROR";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
}

pub struct TaskRepository;

impl TaskRepository {
    pub async fn create<C: ConnectionTrait>(
        db: &C,
        func: &str,
        args: String,
        user: &str,
    ) -> Result<i32, sea_orm::DbErr> {
        let active_model = TaskActiveModel {
            func: Set(func.to_string()),
            args: Set(args),
            state: Set(PENDING.to_string()),
            user: Set(user.to_string()),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        };
        Ok(active_model.insert(db).await?.id)
    }

    pub async fn find<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Option<task::Model>, sea_orm::DbErr> {
        Task::find_by_id(id).one(db).await
    }

    /// First PENDING or RUNNING task whose func is one of `funcs`.
    pub async fn find_active<C: ConnectionTrait>(
        db: &C,
        funcs: &[&str],
    ) -> Result<Option<task::Model>, sea_orm::DbErr> {
        Task::find()
            .filter(task::Column::Func.is_in(funcs.iter().copied()))
            .filter(task::Column::State.is_in([PENDING, RUNNING]))
            .order_by_asc(task::Column::Id)
            .one(db)
            .await
    }

    /// Atomically moves the oldest PENDING task to RUNNING.
    pub async fn claim_next(db: &DatabaseConnection) -> Result<Option<task::Model>, sea_orm::DbErr> {
        let txn = db.begin().await?;

        let picked = Task::find()
            .filter(task::Column::State.eq(PENDING))
            .order_by_asc(task::Column::CreatedAt)
            .order_by_asc(task::Column::Id)
            .one(&txn)
            .await?;

        let Some(job) = picked else {
            txn.commit().await?;
            return Ok(None);
        };

        let now = Utc::now().timestamp();
        let res = Task::update_many()
            .col_expr(task::Column::State, Expr::value(RUNNING))
            .col_expr(task::Column::Start, Expr::value(now))
            .filter(task::Column::Id.eq(job.id))
            .filter(task::Column::State.eq(PENDING))
            .exec(&txn)
            .await?;
        let claimed = if res.rows_affected == 1 {
            Task::find_by_id(job.id).one(&txn).await?
        } else {
            None
        };
        txn.commit().await?;
        Ok(claimed)
    }

    pub async fn mark_completed<C: ConnectionTrait>(
        db: &C,
        id: i32,
        retval: String,
    ) -> Result<(), sea_orm::DbErr> {
        TaskActiveModel {
            id: Set(id),
            state: Set(COMPLETED.to_string()),
            retval: Set(Some(retval)),
            end: Set(Some(Utc::now().timestamp())),
            ..Default::default()
        }
        .update(db)
        .await?;
        Ok(())
    }

    pub async fn mark_error<C: ConnectionTrait>(
        db: &C,
        id: i32,
        message: String,
    ) -> Result<(), sea_orm::DbErr> {
        TaskActiveModel {
            id: Set(id),
            state: Set(ERROR.to_string()),
            error: Set(Some(message)),
            end: Set(Some(Utc::now().timestamp())),
            ..Default::default()
        }
        .update(db)
        .await?;
        Ok(())
    }

    /// Tasks a previous process left unfinished can never complete; they become ERROR.
    pub async fn fail_stale<C: ConnectionTrait>(db: &C) -> Result<u64, sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        let res = Task::update_many()
            .col_expr(task::Column::State, Expr::value(ERROR))
            .col_expr(task::Column::Error, Expr::value("interrupted"))
            .col_expr(task::Column::End, Expr::value(now))
            .filter(task::Column::State.is_in([PENDING, RUNNING]))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn list_recent<C: ConnectionTrait>(
        db: &C,
        limit: u64,
    ) -> Result<Vec<task::Model>, sea_orm::DbErr> {
        Task::find()
            .order_by_desc(task::Column::Id)
            .limit(limit)
            .all(db)
            .await
    }

    pub async fn get_stats<C: ConnectionTrait>(db: &C) -> Result<TaskStats, sea_orm::DbErr> {
        let count_state = move |state: &'static str| {
            Task::find()
                .filter(task::Column::State.eq(state))
                .count(db)
        };
        Ok(TaskStats {
            total: Task::find().count(db).await? as usize,
            pending: count_state(PENDING).await? as usize,
            running: count_state(RUNNING).await? as usize,
            completed: count_state(COMPLETED).await? as usize,
            error: count_state(ERROR).await? as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::memory_db;

    #[tokio::test]
    async fn claim_moves_oldest_pending_to_running() {
        let db = memory_db().await;
        let first = TaskRepository::create(&db, "internal_cross_match", "{}".into(), "op")
            .await
            .unwrap();
        TaskRepository::create(&db, "release_sources", "{}".into(), "op")
            .await
            .unwrap();

        let claimed = TaskRepository::claim_next(&db).await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.state, RUNNING);
        assert!(claimed.start.is_some());

        let active = TaskRepository::find_active(&db, &["internal_cross_match"])
            .await
            .unwrap();
        assert_eq!(active.map(|t| t.id), Some(first));
    }

    #[tokio::test]
    async fn stale_tasks_are_failed_on_recovery() {
        let db = memory_db().await;
        let id = TaskRepository::create(&db, "delete_run", "{}".into(), "op")
            .await
            .unwrap();
        TaskRepository::claim_next(&db).await.unwrap();
        let done = TaskRepository::create(&db, "delete_run", "{}".into(), "op")
            .await
            .unwrap();
        TaskRepository::mark_completed(&db, done, "null".into())
            .await
            .unwrap();

        assert_eq!(TaskRepository::fail_stale(&db).await.unwrap(), 1);
        let task = TaskRepository::find(&db, id).await.unwrap().unwrap();
        assert_eq!(task.state, ERROR);
        assert_eq!(task.error.as_deref(), Some("interrupted"));

        let stats = TaskRepository::get_stats(&db).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.error, 1);
    }
}
