use super::matching::is_match;
use super::{load_run, run_thresholds, WorkflowError, WorkflowResult};
use crate::storage::repository::{DetectionRepository, RunRepository};
use log::info;
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::collections::BTreeSet;

/// Flags every accepted detection of the run that matches another one as unresolved.
///
/// Returns the flagged detection ids in ascending order.
pub async fn internal_cross_match(db: &DatabaseConnection, run_id: i32) -> WorkflowResult<Vec<i32>> {
    let run = load_run(db, run_id).await?;
    let thresholds = run_thresholds(&run)?;

    let txn = db.begin().await?;
    RunRepository::lock_for_write(&txn, run_id).await?;

    if DetectionRepository::count_unresolved(&txn, run_id).await? > 0 {
        return Err(WorkflowError::Precondition(format!(
            "Run {} has unresolved detections; resolve them before the internal cross-match",
            run.name
        )));
    }

    let accepted = DetectionRepository::accepted_in_run(&txn, run_id, true).await?;
    info!(
        "Internal cross-match of run {}: {} accepted detections",
        run.name,
        accepted.len()
    );

    let mut flagged = BTreeSet::new();
    for (i, a) in accepted.iter().enumerate() {
        for b in &accepted[i + 1..] {
            if is_match(&a.detection, &b.detection, &thresholds)? {
                info!(
                    "Detections {} and {} are duplicates",
                    a.detection.name, b.detection.name
                );
                flagged.insert(a.detection.id);
                flagged.insert(b.detection.id);
            }
        }
    }

    let flagged: Vec<i32> = flagged.into_iter().collect();
    DetectionRepository::set_unresolved(&txn, &flagged, true).await?;
    txn.commit().await?;

    info!(
        "Internal cross-match of run {} flagged {} detections",
        run.name,
        flagged.len()
    );
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{accept_as, detection_at, insert_detection, insert_run, memory_db};

    #[tokio::test]
    async fn duplicates_are_flagged_in_pairs() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let a = insert_detection(&db, detection_at(run, inst, "a", (10.0, 10.0, 10.0), (1.0, 1.0, 1.4e9))).await;
        let b = insert_detection(&db, detection_at(run, inst, "b", (10.5, 10.0, 10.0), (1.0, 1.0, 1.4e9))).await;
        let far = insert_detection(&db, detection_at(run, inst, "c", (300.0, 300.0, 10.0), (2.0, 2.0, 1.4e9))).await;
        let not_accepted = insert_detection(&db, detection_at(run, inst, "d", (10.0, 10.0, 10.0), (1.0, 1.0, 1.4e9))).await;
        for (d, name) in [(&a, "A"), (&b, "B"), (&far, "C")] {
            accept_as(&db, d.id, name).await;
        }

        let flagged = internal_cross_match(&db, run).await.unwrap();
        assert_eq!(flagged, vec![a.id, b.id]);

        let unresolved: Vec<i32> = DetectionRepository::list_unresolved(&db, run)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(unresolved, vec![a.id, b.id]);
        assert!(!unresolved.contains(&not_accepted.id));
    }

    #[tokio::test]
    async fn refuses_to_run_with_unresolved_detections() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let a = insert_detection(&db, detection_at(run, inst, "a", (10.0, 10.0, 10.0), (1.0, 1.0, 1.4e9))).await;
        let b = insert_detection(&db, detection_at(run, inst, "b", (10.0, 10.0, 10.0), (1.0, 1.0, 1.4e9))).await;
        accept_as(&db, a.id, "A").await;
        accept_as(&db, b.id, "B").await;
        DetectionRepository::set_unresolved(&db, &[a.id], true).await.unwrap();

        let err = internal_cross_match(&db, run).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Precondition(_)));
        // b untouched
        let b = DetectionRepository::find(&db, b.id).await.unwrap().unwrap();
        assert!(!b.unresolved);
    }

    #[tokio::test]
    async fn computation_error_rolls_back() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let a = insert_detection(&db, detection_at(run, inst, "a", (10.0, 10.0, 10.0), (1.0, 1.0, 1.4e9))).await;
        let b = insert_detection(&db, detection_at(run, inst, "b", (10.0, 10.0, 10.0), (1.0, 1.0, 1.4e9))).await;
        let mut broken = detection_at(run, inst, "c", (11.0, 12.0, 10.0), (1.0, 1.0, 1.4e9));
        broken.err_x = None;
        let c = insert_detection(&db, broken).await;
        for (d, name) in [(&a, "A"), (&b, "B"), (&c, "C")] {
            accept_as(&db, d.id, name).await;
        }

        let err = internal_cross_match(&db, run).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Computation(_)));
        assert_eq!(DetectionRepository::count_unresolved(&db, run).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let db = memory_db().await;
        assert!(matches!(
            internal_cross_match(&db, 42).await,
            Err(WorkflowError::NotFound(_))
        ));
    }
}
