use crate::storage::entity::external_conflict::{
    self, ActiveModel as ConflictActiveModel, Entity as ExternalConflict,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};

pub struct ConflictRepository;

impl ConflictRepository {
    pub async fn create<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
        detection_id: i32,
        source_detection_ids: &[i32],
    ) -> Result<external_conflict::Model, sea_orm::DbErr> {
        let ids = serde_json::to_string(source_detection_ids)
            .map_err(|e| sea_orm::DbErr::Custom(e.to_string()))?;
        ConflictActiveModel {
            run_id: Set(run_id),
            detection_id: Set(detection_id),
            conflict_source_detection_ids: Set(ids),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Option<external_conflict::Model>, sea_orm::DbErr> {
        ExternalConflict::find_by_id(id).one(db).await
    }

    pub async fn list_by_run<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<Vec<external_conflict::Model>, sea_orm::DbErr> {
        ExternalConflict::find()
            .filter(external_conflict::Column::RunId.eq(run_id))
            .order_by_asc(external_conflict::Column::Id)
            .all(db)
            .await
    }

    pub async fn count_by_run<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<u64, sea_orm::DbErr> {
        ExternalConflict::find()
            .filter(external_conflict::Column::RunId.eq(run_id))
            .count(db)
            .await
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, id: i32) -> Result<(), sea_orm::DbErr> {
        ExternalConflict::delete_by_id(id).exec(db).await?;
        Ok(())
    }

    pub async fn delete_for_detection<C: ConnectionTrait>(
        db: &C,
        detection_id: i32,
    ) -> Result<u64, sea_orm::DbErr> {
        let res = ExternalConflict::delete_many()
            .filter(external_conflict::Column::DetectionId.eq(detection_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn delete_for_run<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<u64, sea_orm::DbErr> {
        let res = ExternalConflict::delete_many()
            .filter(external_conflict::Column::RunId.eq(run_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// Strips a removed source-detection from every conflict listing it. A conflict left with
    /// nothing to compare against is deleted.
    pub async fn drop_reference<C: ConnectionTrait>(
        db: &C,
        source_detection_id: i32,
    ) -> Result<(), sea_orm::DbErr> {
        let needle = source_detection_id.to_string();
        let candidates = ExternalConflict::find()
            .filter(external_conflict::Column::ConflictSourceDetectionIds.contains(needle.as_str()))
            .all(db)
            .await?;

        for conflict in candidates {
            let ids = conflict.conflict_ids().map_err(|e| {
                sea_orm::DbErr::Custom(format!("conflict {} has a corrupt id list: {}", conflict.id, e))
            })?;
            if !ids.contains(&source_detection_id) {
                continue;
            }
            let kept: Vec<i32> = ids
                .into_iter()
                .filter(|id| *id != source_detection_id)
                .collect();
            if kept.is_empty() {
                Self::delete(db, conflict.id).await?;
            } else {
                let encoded = serde_json::to_string(&kept)
                    .map_err(|e| sea_orm::DbErr::Custom(e.to_string()))?;
                ConflictActiveModel {
                    id: Set(conflict.id),
                    conflict_source_detection_ids: Set(encoded),
                    ..Default::default()
                }
                .update(db)
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{accept_as, detection_at, insert_detection, insert_run, memory_db};

    #[tokio::test]
    async fn dropping_a_reference_shrinks_or_deletes_conflicts() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d = insert_detection(&db, detection_at(run, inst, "a", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let o1 = insert_detection(&db, detection_at(run, inst, "b", (2.0, 2.0, 2.0), (2.0, 2.0, 1.4e9))).await;
        let o2 = insert_detection(&db, detection_at(run, inst, "c", (3.0, 3.0, 3.0), (3.0, 3.0, 1.4e9))).await;
        let sd1 = accept_as(&db, o1.id, "S1").await;
        let sd2 = accept_as(&db, o2.id, "S2").await;

        let both = ConflictRepository::create(&db, run, d.id, &[sd1.id, sd2.id]).await.unwrap();
        let single = ConflictRepository::create(&db, run, d.id, &[sd1.id]).await.unwrap();

        ConflictRepository::drop_reference(&db, sd1.id).await.unwrap();

        let both = ConflictRepository::find(&db, both.id).await.unwrap().unwrap();
        assert_eq!(both.conflict_ids().unwrap(), vec![sd2.id]);
        assert!(ConflictRepository::find(&db, single.id).await.unwrap().is_none());
        assert_eq!(ConflictRepository::count_by_run(&db, run).await.unwrap(), 1);
    }
}
