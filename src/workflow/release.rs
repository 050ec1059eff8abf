use super::naming::release_name;
use super::{load_run, WorkflowContext, WorkflowError, WorkflowResult};
use crate::storage::repository::{
    AnnotationRepository, ConflictRepository, DetectionRepository, RunRepository,
    SourceRepository,
};
use log::info;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReleaseReport {
    /// (source id, release name)
    pub released: Vec<(i32, String)>,
    /// Detections whose source already carries a release name.
    pub unchanged: Vec<i32>,
}

/// Gives every working source of the run its public name and tags the source-detection.
pub async fn release_sources(
    db: &DatabaseConnection,
    run_id: i32,
    ctx: &WorkflowContext,
) -> WorkflowResult<ReleaseReport> {
    let run = load_run(db, run_id).await?;
    let txn = db.begin().await?;
    RunRepository::lock_for_write(&txn, run_id).await?;

    if DetectionRepository::count_unresolved(&txn, run_id).await? > 0 {
        return Err(WorkflowError::Precondition(format!(
            "Run {} has unresolved detections; nothing was released",
            run.name
        )));
    }
    if ConflictRepository::count_by_run(&txn, run_id).await? > 0 {
        return Err(WorkflowError::Precondition(format!(
            "Run {} has outstanding external conflicts; nothing was released",
            run.name
        )));
    }

    let tag = AnnotationRepository::get_or_create_tag(
        &txn,
        &ctx.release_tag,
        Some("Source released under its public name"),
    )
    .await?;

    let mut report = ReleaseReport::default();
    for accepted in DetectionRepository::accepted_in_run(&txn, run_id, true).await? {
        // sources adopted from earlier releases already carry their public name
        let name = release_name(&accepted.source.name, &ctx.naming)?;
        if name == accepted.source.name {
            report.unchanged.push(accepted.detection.id);
            continue;
        }
        if let Some(taken) = SourceRepository::find_by_name(&txn, &name).await? {
            if taken.id != accepted.source.id {
                return Err(WorkflowError::Consistency(format!(
                    "Cannot release {}: source {} (id {}) already exists",
                    accepted.detection.name, name, taken.id
                )));
            }
            // shared source renamed earlier in this pass
            AnnotationRepository::tag_source_detection(
                &txn,
                tag.id,
                accepted.source_detection.id,
                &ctx.operator,
            )
            .await?;
            report.unchanged.push(accepted.detection.id);
            continue;
        }
        info!("Releasing {} as {}", accepted.source.name, name);
        SourceRepository::rename(&txn, accepted.source.id, &name).await?;
        AnnotationRepository::tag_source_detection(
            &txn,
            tag.id,
            accepted.source_detection.id,
            &ctx.operator,
        )
        .await?;
        report.released.push((accepted.source.id, name));
    }

    txn.commit().await?;
    info!(
        "Run {}: {} sources released, {} unchanged",
        run.name,
        report.released.len(),
        report.unchanged.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{accept_as, detection_at, insert_detection, insert_run, memory_db};
    use crate::workflow::test_context;

    #[tokio::test]
    async fn working_names_become_release_names() {
        let db = memory_db().await;
        let ctx = test_context();
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d1 = insert_detection(&db, detection_at(run, inst, "SoFiA J123456.7-654321.0", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let sd1 = accept_as(&db, d1.id, "SoFiA J123456.7-654321.0").await;
        let d2 = insert_detection(&db, detection_at(run, inst, "SoFiA J000001.0+000001.0", (2.0, 2.0, 2.0), (1.0, 1.0, 1.4e9))).await;
        accept_as(&db, d2.id, "WALLABY J000001+000001").await;

        let report = release_sources(&db, run, &ctx).await.unwrap();
        assert_eq!(
            report.released,
            vec![(sd1.source_id, "WALLABY J123456-654321".to_string())]
        );
        assert_eq!(report.unchanged, vec![d2.id]);

        let source = SourceRepository::find(&db, sd1.source_id).await.unwrap().unwrap();
        assert_eq!(source.name, "WALLABY J123456-654321");
        assert_eq!(
            AnnotationRepository::tags_for(&db, sd1.id).await.unwrap(),
            vec!["Released".to_string()]
        );

        // a second release is a no-op
        let again = release_sources(&db, run, &ctx).await.unwrap();
        assert!(again.released.is_empty());
    }

    #[tokio::test]
    async fn shared_source_tags_every_source_detection() {
        let db = memory_db().await;
        let ctx = test_context();
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d1 = insert_detection(&db, detection_at(run, inst, "SoFiA J101010.1-101010.1", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let sd1 = accept_as(&db, d1.id, "SoFiA J101010.1-101010.1").await;
        let d2 = insert_detection(&db, detection_at(run, inst, "SoFiA J101010.2-101010.2", (9.0, 9.0, 9.0), (1.0, 1.0, 1.4e9))).await;
        let sd2 = SourceRepository::attach(&db, sd1.source_id, d2.id).await.unwrap();

        let report = release_sources(&db, run, &ctx).await.unwrap();
        assert_eq!(
            report.released,
            vec![(sd1.source_id, "WALLABY J101010-101010".to_string())]
        );
        assert_eq!(report.unchanged, vec![d2.id]);
        for sd in [sd1.id, sd2.id] {
            assert_eq!(
                AnnotationRepository::tags_for(&db, sd).await.unwrap(),
                vec!["Released".to_string()]
            );
        }
    }

    #[tokio::test]
    async fn collision_rolls_back_the_whole_release() {
        let db = memory_db().await;
        let ctx = test_context();
        let (old, old_inst) = insert_run(&db, "SER_0").await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let taken = insert_detection(&db, detection_at(old, old_inst, "x", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        accept_as(&db, taken.id, "WALLABY J000002-000002").await;

        let ok = insert_detection(&db, detection_at(run, inst, "SoFiA J000001.0-000001.0", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let ok_sd = accept_as(&db, ok.id, "SoFiA J000001.0-000001.0").await;
        let clash = insert_detection(&db, detection_at(run, inst, "SoFiA J000002.0-000002.0", (2.0, 2.0, 2.0), (1.0, 1.0, 1.4e9))).await;
        accept_as(&db, clash.id, "SoFiA J000002.0-000002.0").await;

        let err = release_sources(&db, run, &ctx).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Consistency(_)));
        let source = SourceRepository::find(&db, ok_sd.source_id).await.unwrap().unwrap();
        assert_eq!(source.name, "SoFiA J000001.0-000001.0");
    }

    #[tokio::test]
    async fn outstanding_conflicts_block_release() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d = insert_detection(&db, detection_at(run, inst, "SoFiA J000001.0-000001.0", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let sd = accept_as(&db, d.id, "SoFiA J000001.0-000001.0").await;
        ConflictRepository::create(&db, run, d.id, &[sd.id]).await.unwrap();

        assert!(matches!(
            release_sources(&db, run, &test_context()).await,
            Err(WorkflowError::Precondition(_))
        ));
    }
}
