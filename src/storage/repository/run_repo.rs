use crate::storage::entity::{
    detection, external_conflict, instance,
    run::{self, Entity as Run},
    source_detection, survey_component, survey_component_run,
};
use crate::storage::repository::ConflictRepository;
use sea_orm::sea_query::{Expr, Query, SelectStatement, SimpleExpr};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub id: i32,
    pub name: String,
    pub detections: u64,
    pub accepted: u64,
    pub unresolved: u64,
    pub conflicts: u64,
}

pub struct RunRepository;

impl RunRepository {
    pub async fn find<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Option<run::Model>, sea_orm::DbErr> {
        Run::find_by_id(id).one(db).await
    }

    /// Takes the write lock for the surrounding transaction by touching the run row.
    ///
    /// Must be the first statement of the transaction. SQLite starts a deferred transaction
    /// as a reader, and a reader cannot become the writer once another connection has
    /// committed in between. Concurrent writers wait on the busy timeout until commit.
    pub async fn lock_for_write<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<(), sea_orm::DbErr> {
        touch(db, run::Column::Id.eq(run_id)).await
    }

    /// Same as `lock_for_write`, for the runs owning the given detections.
    pub async fn lock_for_detections<C: ConnectionTrait>(
        db: &C,
        detection_ids: &[i32],
    ) -> Result<(), sea_orm::DbErr> {
        let owners = Query::select()
            .column(detection::Column::RunId)
            .from(detection::Entity)
            .and_where(detection::Column::Id.is_in(detection_ids.iter().copied()))
            .to_owned();
        touch(db, run::Column::Id.in_subquery(owners)).await
    }

    /// Same as `lock_for_write`, for the run of an external conflict.
    pub async fn lock_for_conflict<C: ConnectionTrait>(
        db: &C,
        conflict_id: i32,
    ) -> Result<(), sea_orm::DbErr> {
        let owner: SelectStatement = Query::select()
            .column(external_conflict::Column::RunId)
            .from(external_conflict::Entity)
            .and_where(external_conflict::Column::Id.eq(conflict_id))
            .to_owned();
        touch(db, run::Column::Id.in_subquery(owner)).await
    }

    pub async fn summaries<C: ConnectionTrait>(
        db: &C,
        limit: u64,
    ) -> Result<Vec<RunSummary>, sea_orm::DbErr> {
        let runs = Run::find()
            .order_by_desc(run::Column::Id)
            .limit(limit)
            .all(db)
            .await?;

        let mut out = Vec::with_capacity(runs.len());
        for run in runs {
            let in_run = detection::Entity::find().filter(detection::Column::RunId.eq(run.id));
            let detections = in_run.clone().count(db).await?;
            let unresolved = in_run
                .clone()
                .filter(detection::Column::Unresolved.eq(true))
                .count(db)
                .await?;
            let accepted = source_detection::Entity::find()
                .inner_join(detection::Entity)
                .filter(detection::Column::RunId.eq(run.id))
                .count(db)
                .await?;
            let conflicts = ConflictRepository::count_by_run(db, run.id).await?;
            out.push(RunSummary {
                id: run.id,
                name: run.name,
                detections,
                accepted,
                unresolved,
                conflicts,
            });
        }
        Ok(out)
    }

    /// Names of the survey components the run is a member of.
    pub async fn component_names<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<Vec<String>, sea_orm::DbErr> {
        let memberships = survey_component_run::Entity::find()
            .filter(survey_component_run::Column::RunId.eq(run_id))
            .find_also_related(survey_component::Entity)
            .order_by_asc(survey_component_run::Column::Id)
            .all(db)
            .await?;
        Ok(memberships
            .into_iter()
            .filter_map(|(_, component)| component.map(|c| c.name))
            .collect())
    }

    /// Removes the instances, component memberships and the run row itself. Detections must
    /// already be gone.
    pub async fn delete_shell<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<(), sea_orm::DbErr> {
        ConflictRepository::delete_for_run(db, run_id).await?;
        instance::Entity::delete_many()
            .filter(instance::Column::RunId.eq(run_id))
            .exec(db)
            .await?;
        survey_component_run::Entity::delete_many()
            .filter(survey_component_run::Column::RunId.eq(run_id))
            .exec(db)
            .await?;
        Run::delete_by_id(run_id).exec(db).await?;
        Ok(())
    }
}

/// No-op update. It opens the write transaction even when no row matches.
async fn touch<C: ConnectionTrait>(db: &C, filter: SimpleExpr) -> Result<(), sea_orm::DbErr> {
    Run::update_many()
        .col_expr(run::Column::Id, Expr::col(run::Column::Id).into())
        .filter(filter)
        .exec(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{
        accept_as, detection_at, insert_component, insert_detection, insert_run, memory_db,
    };

    #[tokio::test]
    async fn summary_counts_detections_by_state() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d1 = insert_detection(&db, detection_at(run, inst, "a", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let mut unresolved = detection_at(run, inst, "b", (2.0, 2.0, 2.0), (1.0, 1.0, 1.4e9));
        unresolved.unresolved = true;
        insert_detection(&db, unresolved).await;
        accept_as(&db, d1.id, "S1").await;

        let summaries = RunRepository::summaries(&db, 10).await.unwrap();
        assert_eq!(
            summaries,
            vec![RunSummary {
                id: run,
                name: "SER_1".into(),
                detections: 2,
                accepted: 1,
                unresolved: 1,
                conflicts: 0,
            }]
        );
    }

    #[tokio::test]
    async fn component_membership_lookup() {
        let db = memory_db().await;
        let (run, _) = insert_run(&db, "SB123").await;
        let (other, _) = insert_run(&db, "SB456").await;
        insert_component(&db, "Pilot Phase 2", &[run]).await;

        assert_eq!(
            RunRepository::component_names(&db, run).await.unwrap(),
            vec!["Pilot Phase 2".to_string()]
        );
        assert!(RunRepository::component_names(&db, other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_lock_holds_other_writers_until_commit() {
        use crate::storage::establish_connection;
        use crate::storage::repository::{
            AnnotationRepository, DetectionRepository, SourceRepository,
        };
        use sea_orm::TransactionTrait;
        use std::time::Duration;

        let path = std::env::temp_dir().join(format!("curator-write-lock-{}.db", std::process::id()));
        let cleanup = |path: &std::path::Path| {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
            }
        };
        cleanup(path.as_path());
        let db = establish_connection(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d = insert_detection(&db, detection_at(run, inst, "a", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let sd = accept_as(&db, d.id, "S1").await;

        let txn = db.begin().await.unwrap();
        RunRepository::lock_for_write(&txn, run).await.unwrap();
        let scanned = DetectionRepository::accepted_in_run(&txn, run, true).await.unwrap();
        assert_eq!(scanned.len(), 1);

        // a manual edit from another pooled connection
        let other = db.clone();
        let edit = tokio::spawn(async move {
            AnnotationRepository::add_comment(&other, d.id, "manual note", "op").await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!edit.is_finished());

        SourceRepository::remove_source_detection(&txn, &sd).await.unwrap();
        txn.commit().await.unwrap();

        let comment = edit.await.unwrap().unwrap();
        assert_eq!(comment.comment, "manual note");
        assert!(SourceRepository::source_detection_of(&db, d.id).await.unwrap().is_none());

        drop(db);
        cleanup(path.as_path());
    }

    #[tokio::test]
    async fn lock_helpers_change_nothing() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d = insert_detection(&db, detection_at(run, inst, "a", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let sd = accept_as(&db, d.id, "S1").await;
        let conflict = ConflictRepository::create(&db, run, d.id, &[sd.id]).await.unwrap();
        let before = RunRepository::find(&db, run).await.unwrap();

        RunRepository::lock_for_write(&db, run).await.unwrap();
        RunRepository::lock_for_detections(&db, &[d.id, 999]).await.unwrap();
        RunRepository::lock_for_conflict(&db, conflict.id).await.unwrap();
        RunRepository::lock_for_write(&db, 999).await.unwrap();

        assert_eq!(RunRepository::find(&db, run).await.unwrap(), before);
    }
}
