use crate::storage::entity::{
    detection::{self, Entity as Detection},
    source::{self, Entity as Source},
    source_detection::{self, Entity as SourceDetection},
};
use crate::storage::repository::{AnnotationRepository, ConflictRepository, SourceRepository};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select,
};
use std::collections::HashMap;

/// A detection together with the source it was accepted under.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedDetection {
    pub detection: detection::Model,
    pub source_detection: source_detection::Model,
    pub source: source::Model,
}

/// Sky search window around a position, degrees.
#[derive(Debug, Clone, Copy)]
pub struct SkyBox {
    pub ra: f64,
    pub dec: f64,
    pub ra_half_width: f64,
    pub dec_half_width: f64,
}

pub struct DetectionRepository;

impl DetectionRepository {
    pub async fn find<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Option<detection::Model>, sea_orm::DbErr> {
        Detection::find_by_id(id).one(db).await
    }

    pub async fn find_many<C: ConnectionTrait>(
        db: &C,
        ids: &[i32],
    ) -> Result<Vec<detection::Model>, sea_orm::DbErr> {
        Detection::find()
            .filter(detection::Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(detection::Column::Id)
            .all(db)
            .await
    }

    pub async fn list_by_run<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<Vec<detection::Model>, sea_orm::DbErr> {
        Detection::find()
            .filter(detection::Column::RunId.eq(run_id))
            .order_by_asc(detection::Column::Id)
            .all(db)
            .await
    }

    pub async fn list_unresolved<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<Vec<detection::Model>, sea_orm::DbErr> {
        Detection::find()
            .filter(detection::Column::RunId.eq(run_id))
            .filter(detection::Column::Unresolved.eq(true))
            .order_by_asc(detection::Column::Id)
            .all(db)
            .await
    }

    pub async fn count_unresolved<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
    ) -> Result<u64, sea_orm::DbErr> {
        Detection::find()
            .filter(detection::Column::RunId.eq(run_id))
            .filter(detection::Column::Unresolved.eq(true))
            .count(db)
            .await
    }

    /// Detections of a run waiting for a manual accept or reject: not linked to any source,
    /// with at least `min_n_pix` voxels and reliability `min_rel`. Missing values never qualify.
    pub async fn pending_inspection<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
        min_n_pix: i32,
        min_rel: f64,
    ) -> Result<Vec<detection::Model>, sea_orm::DbErr> {
        Detection::find()
            .filter(detection::Column::RunId.eq(run_id))
            .filter(detection::Column::NPix.gte(min_n_pix))
            .filter(detection::Column::Rel.gte(min_rel))
            .filter(
                detection::Column::Id.not_in_subquery(
                    Query::select()
                        .column(source_detection::Column::DetectionId)
                        .from(SourceDetection)
                        .to_owned(),
                ),
            )
            .order_by_asc(detection::Column::Id)
            .all(db)
            .await
    }

    pub async fn set_unresolved<C: ConnectionTrait>(
        db: &C,
        ids: &[i32],
        unresolved: bool,
    ) -> Result<u64, sea_orm::DbErr> {
        if ids.is_empty() {
            return Ok(0);
        }
        let res = Detection::update_many()
            .col_expr(detection::Column::Unresolved, Expr::value(unresolved))
            .filter(detection::Column::Id.is_in(ids.iter().copied()))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// Accepted detections of a run. With `lock`, the rows are selected FOR UPDATE where the
    /// backend has row locks. SQLite has none; callers take the database write lock first
    /// with `RunRepository::lock_for_write`.
    pub async fn accepted_in_run<C: ConnectionTrait>(
        db: &C,
        run_id: i32,
        lock: bool,
    ) -> Result<Vec<AcceptedDetection>, sea_orm::DbErr> {
        let query = Detection::find()
            .filter(detection::Column::RunId.eq(run_id))
            .order_by_asc(detection::Column::Id);
        let detections = with_lock(db, query, lock).all(db).await?;
        Self::with_sources(db, detections).await
    }

    /// Accepted detections of other runs inside the sky box. The RA window wraps at 0/360.
    pub async fn accepted_near<C: ConnectionTrait>(
        db: &C,
        exclude_run_id: i32,
        window: SkyBox,
    ) -> Result<Vec<AcceptedDetection>, sea_orm::DbErr> {
        let ra_lo = window.ra - window.ra_half_width;
        let ra_hi = window.ra + window.ra_half_width;
        let ra_cond = if window.ra_half_width >= 180.0 {
            Condition::all()
        } else if ra_lo < 0.0 {
            Condition::any()
                .add(detection::Column::Ra.gte(ra_lo + 360.0))
                .add(detection::Column::Ra.lte(ra_hi))
        } else if ra_hi >= 360.0 {
            Condition::any()
                .add(detection::Column::Ra.gte(ra_lo))
                .add(detection::Column::Ra.lte(ra_hi - 360.0))
        } else {
            Condition::all().add(detection::Column::Ra.between(ra_lo, ra_hi))
        };

        let detections = Detection::find()
            .filter(detection::Column::RunId.ne(exclude_run_id))
            .filter(detection::Column::Ra.is_not_null())
            .filter(ra_cond)
            .filter(detection::Column::Dec.between(
                window.dec - window.dec_half_width,
                window.dec + window.dec_half_width,
            ))
            .order_by_asc(detection::Column::Id)
            .all(db)
            .await?;
        Self::with_sources(db, detections).await
    }

    async fn with_sources<C: ConnectionTrait>(
        db: &C,
        detections: Vec<detection::Model>,
    ) -> Result<Vec<AcceptedDetection>, sea_orm::DbErr> {
        if detections.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i32> = detections.iter().map(|d| d.id).collect();
        let links: HashMap<i32, source_detection::Model> = SourceDetection::find()
            .filter(source_detection::Column::DetectionId.is_in(ids))
            .all(db)
            .await?
            .into_iter()
            .map(|sd| (sd.detection_id, sd))
            .collect();
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let source_ids: Vec<i32> = links.values().map(|sd| sd.source_id).collect();
        let sources: HashMap<i32, source::Model> = Source::find()
            .filter(source::Column::Id.is_in(source_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        Ok(detections
            .into_iter()
            .filter_map(|detection| {
                let sd = links.get(&detection.id)?.clone();
                let source = sources.get(&sd.source_id)?.clone();
                Some(AcceptedDetection {
                    detection,
                    source_detection: sd,
                    source,
                })
            })
            .collect())
    }

    /// Deletes a detection with its comments, conflicts and source link.
    pub async fn delete_with_dependants<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<(), sea_orm::DbErr> {
        AnnotationRepository::delete_comments_for(db, id).await?;
        ConflictRepository::delete_for_detection(db, id).await?;
        if let Some(sd) = SourceRepository::source_detection_of(db, id).await? {
            SourceRepository::remove_source_detection(db, &sd).await?;
        }
        Detection::delete_by_id(id).exec(db).await?;
        Ok(())
    }
}

fn with_lock<C: ConnectionTrait>(
    db: &C,
    query: Select<Detection>,
    lock: bool,
) -> Select<Detection> {
    if lock && db.get_database_backend() != DatabaseBackend::Sqlite {
        query.lock_exclusive()
    } else {
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{accept_as, detection_at, insert_detection, insert_run, memory_db};

    #[tokio::test]
    async fn accepted_in_run_skips_unaccepted() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d1 = insert_detection(&db, detection_at(run, inst, "a", (1.0, 1.0, 1.0), (10.0, -30.0, 1.4e9))).await;
        insert_detection(&db, detection_at(run, inst, "b", (2.0, 2.0, 2.0), (10.0, -30.0, 1.4e9))).await;
        accept_as(&db, d1.id, "S1").await;

        let accepted = DetectionRepository::accepted_in_run(&db, run, true).await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].detection.id, d1.id);
        assert_eq!(accepted[0].source.name, "S1");
    }

    #[tokio::test]
    async fn inspection_queue_lists_large_reliable_unaccepted_detections() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let (other, other_inst) = insert_run(&db, "SER_2").await;
        let with = |name: &str, n_pix: Option<i32>, rel: Option<f64>| {
            let mut d = detection_at(run, inst, name, (1.0, 1.0, 1.0), (10.0, -30.0, 1.4e9));
            d.n_pix = n_pix;
            d.rel = rel;
            d
        };
        let pending = insert_detection(&db, with("pending", Some(300), Some(0.7))).await;
        let accepted = insert_detection(&db, with("accepted", Some(900), Some(0.99))).await;
        insert_detection(&db, with("small", Some(299), Some(0.9))).await;
        insert_detection(&db, with("faint", Some(500), Some(0.69))).await;
        insert_detection(&db, with("unknown", None, Some(0.9))).await;
        let mut elsewhere = detection_at(other, other_inst, "elsewhere", (1.0, 1.0, 1.0), (10.0, -30.0, 1.4e9));
        elsewhere.n_pix = Some(1000);
        elsewhere.rel = Some(1.0);
        insert_detection(&db, elsewhere).await;
        accept_as(&db, accepted.id, "S1").await;

        let queue = DetectionRepository::pending_inspection(&db, run, 300, 0.7).await.unwrap();
        let ids: Vec<i32> = queue.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![pending.id]);

        let loose = DetectionRepository::pending_inspection(&db, run, 0, 0.0).await.unwrap();
        assert_eq!(loose.len(), 3);
    }

    #[tokio::test]
    async fn sky_box_excludes_own_run_and_wraps_ra() {
        let db = memory_db().await;
        let (run_a, inst_a) = insert_run(&db, "SER_A").await;
        let (run_b, inst_b) = insert_run(&db, "SER_B").await;
        let own = insert_detection(&db, detection_at(run_a, inst_a, "own", (1.0, 1.0, 1.0), (0.01, -30.0, 1.4e9))).await;
        let wrapped = insert_detection(&db, detection_at(run_b, inst_b, "w", (1.0, 1.0, 1.0), (359.98, -30.0, 1.4e9))).await;
        let far = insert_detection(&db, detection_at(run_b, inst_b, "f", (1.0, 1.0, 1.0), (5.0, -30.0, 1.4e9))).await;
        accept_as(&db, own.id, "S0").await;
        accept_as(&db, wrapped.id, "S1").await;
        accept_as(&db, far.id, "S2").await;

        let window = SkyBox {
            ra: 0.01,
            dec: -30.0,
            ra_half_width: 0.1,
            dec_half_width: 0.1,
        };
        let found = DetectionRepository::accepted_near(&db, run_a, window).await.unwrap();
        let ids: Vec<i32> = found.iter().map(|a| a.detection.id).collect();
        assert_eq!(ids, vec![wrapped.id]);
    }

    #[tokio::test]
    async fn delete_with_dependants_clears_links() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d = insert_detection(&db, detection_at(run, inst, "a", (1.0, 1.0, 1.0), (10.0, -30.0, 1.4e9))).await;
        let sd = accept_as(&db, d.id, "S1").await;
        AnnotationRepository::add_comment(&db, d.id, "note", "op").await.unwrap();
        ConflictRepository::create(&db, run, d.id, &[sd.id]).await.unwrap();

        DetectionRepository::delete_with_dependants(&db, d.id).await.unwrap();

        assert!(DetectionRepository::find(&db, d.id).await.unwrap().is_none());
        assert!(SourceRepository::find(&db, sd.source_id).await.unwrap().is_none());
        assert_eq!(ConflictRepository::count_by_run(&db, run).await.unwrap(), 0);
    }
}
