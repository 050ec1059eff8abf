//! Operator actions on selected detections, looked up by name in `ACTIONS`.

use super::matching::{is_match, sanity_check, SanityVerdict};
use super::{load_run, run_thresholds, WorkflowContext, WorkflowError, WorkflowResult};
use crate::storage::entity::detection;
use crate::storage::repository::{
    AnnotationRepository, DetectionRepository, RunRepository, SourceRepository,
};
use futures::future::BoxFuture;
use log::info;
use rand::seq::SliceRandom;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ActionPayload {
    #[default]
    None,
    Tag {
        name: String,
        description: Option<String>,
    },
    Comment(String),
    Accept {
        tag: Option<String>,
        comment: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub detection_ids: Vec<i32>,
    pub operator: String,
    pub payload: ActionPayload,
}

impl ActionRequest {
    pub fn new(detection_ids: Vec<i32>, operator: &str) -> Self {
        Self {
            detection_ids,
            operator: operator.to_string(),
            payload: ActionPayload::None,
        }
    }

    pub fn with_payload(mut self, payload: ActionPayload) -> Self {
        self.payload = payload;
        self
    }
}

/// Operator-facing lines describing what the action did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ActionReport {
    pub messages: Vec<String>,
}

impl ActionReport {
    fn push(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }
}

pub type ActionHandler = for<'a> fn(
    &'a DatabaseConnection,
    &'a ActionRequest,
    &'a WorkflowContext,
) -> BoxFuture<'a, WorkflowResult<ActionReport>>;

pub const ACTIONS: &[(&str, ActionHandler)] = &[
    ("check", check),
    ("auto_resolve", auto_resolve),
    ("manual_resolve", manual_resolve),
    ("accept", accept),
    ("reject", reject),
    ("tag", tag),
    ("comment", comment),
];

pub async fn dispatch(
    db: &DatabaseConnection,
    action: &str,
    request: &ActionRequest,
    ctx: &WorkflowContext,
) -> WorkflowResult<ActionReport> {
    let handler = ACTIONS
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, handler)| *handler)
        .ok_or_else(|| WorkflowError::NotFound(format!("Action {}", action)))?;
    info!(
        "Action {} on detections {:?} by {}",
        action, request.detection_ids, request.operator
    );
    handler(db, request, ctx).await
}

/// Loads the selection in id order; every id must exist.
async fn selected<C: ConnectionTrait>(
    db: &C,
    request: &ActionRequest,
) -> WorkflowResult<Vec<detection::Model>> {
    if request.detection_ids.is_empty() {
        return Err(WorkflowError::Precondition("No detections selected".into()));
    }
    let mut ids = request.detection_ids.clone();
    ids.sort_unstable();
    ids.dedup();
    let found = DetectionRepository::find_many(db, &ids).await?;
    if let Some(missing) = ids.iter().find(|id| !found.iter().any(|d| d.id == **id)) {
        return Err(WorkflowError::NotFound(format!("Detection {}", missing)));
    }
    Ok(found)
}

/// Like `selected`, after taking the write lock on the runs of the selection.
async fn selected_for_update<C: ConnectionTrait>(
    txn: &C,
    request: &ActionRequest,
) -> WorkflowResult<Vec<detection::Model>> {
    RunRepository::lock_for_detections(txn, &request.detection_ids).await?;
    selected(txn, request).await
}

fn single_run(detections: &[detection::Model]) -> WorkflowResult<i32> {
    let run_id = detections[0].run_id;
    if detections.iter().any(|d| d.run_id != run_id) {
        return Err(WorkflowError::Precondition(
            "Selected detections must belong to the same run".into(),
        ));
    }
    Ok(run_id)
}

fn at_least_two(detections: &[detection::Model]) -> WorkflowResult<()> {
    if detections.len() < 2 {
        return Err(WorkflowError::Precondition(
            "Select at least two detections".into(),
        ));
    }
    Ok(())
}

fn check<'a>(
    db: &'a DatabaseConnection,
    request: &'a ActionRequest,
    _ctx: &'a WorkflowContext,
) -> BoxFuture<'a, WorkflowResult<ActionReport>> {
    Box::pin(async move {
        let detections = selected(db, request).await?;
        at_least_two(&detections)?;
        let run = load_run(db, single_run(&detections)?).await?;
        let thresholds = run_thresholds(&run)?;

        let mut report = ActionReport::default();
        for (i, a) in detections.iter().enumerate() {
            for b in &detections[i + 1..] {
                if !is_match(a, b, &thresholds)? {
                    return Err(WorkflowError::Precondition(format!(
                        "Detections {} and {} are not a match",
                        a.id, b.id
                    )));
                }
                match sanity_check(a, b, &thresholds)? {
                    SanityVerdict::Pass => report.push(format!(
                        "Detections {}, {} passed the sanity check",
                        a.id, b.id
                    )),
                    SanityVerdict::Fail(msg) => report.push(msg),
                }
            }
        }
        Ok(report)
    })
}

fn auto_resolve<'a>(
    db: &'a DatabaseConnection,
    request: &'a ActionRequest,
    _ctx: &'a WorkflowContext,
) -> BoxFuture<'a, WorkflowResult<ActionReport>> {
    Box::pin(async move {
        let txn = db.begin().await?;
        let detections = selected_for_update(&txn, request).await?;
        at_least_two(&detections)?;
        let run = load_run(&txn, single_run(&detections)?).await?;
        let thresholds = run_thresholds(&run)?;

        for (i, a) in detections.iter().enumerate() {
            for b in &detections[i + 1..] {
                if !is_match(a, b, &thresholds)? {
                    return Err(WorkflowError::Precondition(format!(
                        "Detections {} and {} are not a match; resolve them manually",
                        a.id, b.id
                    )));
                }
            }
        }

        let keep = {
            let mut rng = rand::thread_rng();
            detections
                .choose(&mut rng)
                .map(|d| d.id)
                .ok_or_else(|| WorkflowError::Precondition("No detections selected".into()))?
        };

        let mut report = ActionReport::default();
        for d in detections.iter().filter(|d| d.id != keep) {
            DetectionRepository::delete_with_dependants(&txn, d.id).await?;
            report.push(format!("Deleted duplicate detection {} ({})", d.id, d.name));
        }
        DetectionRepository::set_unresolved(&txn, &[keep], false).await?;
        txn.commit().await?;

        report.push(format!("Kept detection {}", keep));
        Ok(report)
    })
}

fn manual_resolve<'a>(
    db: &'a DatabaseConnection,
    request: &'a ActionRequest,
    _ctx: &'a WorkflowContext,
) -> BoxFuture<'a, WorkflowResult<ActionReport>> {
    Box::pin(async move {
        let txn = db.begin().await?;
        let detections = selected_for_update(&txn, request).await?;
        let ids: Vec<i32> = detections.iter().map(|d| d.id).collect();
        DetectionRepository::set_unresolved(&txn, &ids, false).await?;
        txn.commit().await?;
        Ok(ActionReport {
            messages: vec![format!("Marked {} detections as resolved", ids.len())],
        })
    })
}

fn accept<'a>(
    db: &'a DatabaseConnection,
    request: &'a ActionRequest,
    _ctx: &'a WorkflowContext,
) -> BoxFuture<'a, WorkflowResult<ActionReport>> {
    Box::pin(async move {
        let (tag_name, comment_text) = match &request.payload {
            ActionPayload::Accept { tag, comment } => (tag.as_deref(), comment.as_deref()),
            _ => (None, None),
        };

        let txn = db.begin().await?;
        let detections = selected_for_update(&txn, request).await?;
        if let Some(d) = detections.iter().find(|d| d.unresolved) {
            return Err(WorkflowError::Precondition(format!(
                "Detection {} is unresolved and cannot be accepted",
                d.name
            )));
        }

        let mut report = ActionReport::default();
        for d in &detections {
            let sd = match SourceRepository::source_detection_of(&txn, d.id).await? {
                Some(sd) => {
                    report.push(format!("Detection {} already accepted", d.name));
                    sd
                }
                None => {
                    let source = SourceRepository::get_or_create(&txn, &d.name).await?;
                    report.push(format!("Accepted {} as source {}", d.id, source.name));
                    SourceRepository::attach(&txn, source.id, d.id).await?
                }
            };
            if let Some(name) = tag_name.filter(|t| !t.trim().is_empty()) {
                let tag = AnnotationRepository::get_or_create_tag(&txn, name.trim(), None).await?;
                AnnotationRepository::tag_source_detection(&txn, tag.id, sd.id, &request.operator)
                    .await?;
            }
            if let Some(text) = comment_text.filter(|c| !c.trim().is_empty()) {
                AnnotationRepository::add_comment(&txn, d.id, text.trim(), &request.operator)
                    .await?;
            }
        }
        txn.commit().await?;
        Ok(report)
    })
}

fn reject<'a>(
    db: &'a DatabaseConnection,
    request: &'a ActionRequest,
    _ctx: &'a WorkflowContext,
) -> BoxFuture<'a, WorkflowResult<ActionReport>> {
    Box::pin(async move {
        let txn = db.begin().await?;
        let detections = selected_for_update(&txn, request).await?;
        let mut report = ActionReport::default();
        for d in &detections {
            DetectionRepository::delete_with_dependants(&txn, d.id).await?;
            report.push(format!("Deleted detection {} ({})", d.id, d.name));
        }
        txn.commit().await?;
        Ok(report)
    })
}

fn tag<'a>(
    db: &'a DatabaseConnection,
    request: &'a ActionRequest,
    _ctx: &'a WorkflowContext,
) -> BoxFuture<'a, WorkflowResult<ActionReport>> {
    Box::pin(async move {
        let (name, description) = match &request.payload {
            ActionPayload::Tag { name, description } if !name.trim().is_empty() => {
                (name.trim(), description.as_deref())
            }
            _ => return Err(WorkflowError::Precondition("Tag name is required".into())),
        };

        let txn = db.begin().await?;
        let detections = selected_for_update(&txn, request).await?;
        let tag = AnnotationRepository::get_or_create_tag(&txn, name, description).await?;
        let mut report = ActionReport::default();
        for d in &detections {
            let sd = SourceRepository::source_detection_of(&txn, d.id)
                .await?
                .ok_or_else(|| {
                    WorkflowError::Precondition(format!(
                        "Detection {} must be accepted before it can be tagged",
                        d.name
                    ))
                })?;
            AnnotationRepository::tag_source_detection(&txn, tag.id, sd.id, &request.operator)
                .await?;
            report.push(format!("Tagged {} with {}", d.name, tag.name));
        }
        txn.commit().await?;
        Ok(report)
    })
}

fn comment<'a>(
    db: &'a DatabaseConnection,
    request: &'a ActionRequest,
    _ctx: &'a WorkflowContext,
) -> BoxFuture<'a, WorkflowResult<ActionReport>> {
    Box::pin(async move {
        let text = match &request.payload {
            ActionPayload::Comment(text) if !text.trim().is_empty() => text.trim(),
            _ => return Err(WorkflowError::Precondition("Comment text is required".into())),
        };

        let txn = db.begin().await?;
        let detections = selected_for_update(&txn, request).await?;
        for d in &detections {
            AnnotationRepository::add_comment(&txn, d.id, text, &request.operator).await?;
        }
        txn.commit().await?;
        Ok(ActionReport {
            messages: vec![format!("Commented on {} detections", detections.len())],
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{accept_as, detection_at, insert_detection, insert_run, memory_db};
    use crate::workflow::test_context;

    async fn pair(db: &DatabaseConnection) -> (i32, i32, detection::Model, detection::Model) {
        let (run, inst) = insert_run(db, "SER_1").await;
        let mut a = detection_at(run, inst, "SoFiA J000001.0-000001.0", (10.0, 10.0, 10.0), (1.0, 1.0, 1.4e9));
        a.unresolved = true;
        let mut b = detection_at(run, inst, "SoFiA J000001.1-000001.1", (10.5, 10.0, 10.0), (1.0, 1.0, 1.4e9));
        b.unresolved = true;
        b.f_sum = Some(150.0);
        (run, inst, insert_detection(db, a).await, insert_detection(db, b).await)
    }

    #[test]
    fn table_names_are_unique() {
        let mut names: Vec<&str> = ACTIONS.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ACTIONS.len());
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let db = memory_db().await;
        let req = ActionRequest::new(vec![1], "op");
        assert!(matches!(
            dispatch(&db, "explode", &req, &test_context()).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn check_reports_sanity_failures() {
        let db = memory_db().await;
        let (_, _, a, b) = pair(&db).await;
        let req = ActionRequest::new(vec![a.id, b.id], "op");
        let report = dispatch(&db, "check", &req, &test_context()).await.unwrap();
        assert_eq!(report.messages.len(), 1);
        assert!(report.messages[0].contains("Var: flux"));

        let single = ActionRequest::new(vec![a.id], "op");
        assert!(matches!(
            dispatch(&db, "check", &single, &test_context()).await,
            Err(WorkflowError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn auto_resolve_keeps_exactly_one() {
        let db = memory_db().await;
        let (run, _, a, b) = pair(&db).await;
        accept_as(&db, a.id, "A").await;
        accept_as(&db, b.id, "B").await;

        let req = ActionRequest::new(vec![a.id, b.id], "op");
        dispatch(&db, "auto_resolve", &req, &test_context()).await.unwrap();

        let remaining = DetectionRepository::list_by_run(&db, run).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].unresolved);
        assert!([a.id, b.id].contains(&remaining[0].id));
    }

    #[tokio::test]
    async fn auto_resolve_refuses_non_matching_pairs() {
        let db = memory_db().await;
        let (run, inst, a, _) = pair(&db).await;
        let far = insert_detection(&db, detection_at(run, inst, "far", (300.0, 300.0, 300.0), (1.0, 1.0, 1.4e9))).await;

        let req = ActionRequest::new(vec![a.id, far.id], "op");
        assert!(matches!(
            dispatch(&db, "auto_resolve", &req, &test_context()).await,
            Err(WorkflowError::Precondition(_))
        ));
        assert_eq!(DetectionRepository::list_by_run(&db, run).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn manual_resolve_then_accept_with_tag() {
        let db = memory_db().await;
        let ctx = test_context();
        let (run, _, a, b) = pair(&db).await;

        let accept_req = ActionRequest::new(vec![a.id], "op").with_payload(ActionPayload::Accept {
            tag: Some("Good".into()),
            comment: Some("clean spectrum".into()),
        });
        assert!(matches!(
            dispatch(&db, "accept", &accept_req, &ctx).await,
            Err(WorkflowError::Precondition(_))
        ));

        dispatch(&db, "manual_resolve", &ActionRequest::new(vec![a.id, b.id], "op"), &ctx)
            .await
            .unwrap();
        assert_eq!(DetectionRepository::count_unresolved(&db, run).await.unwrap(), 0);

        dispatch(&db, "accept", &accept_req, &ctx).await.unwrap();
        let sd = SourceRepository::source_detection_of(&db, a.id).await.unwrap().unwrap();
        let source = SourceRepository::find(&db, sd.source_id).await.unwrap().unwrap();
        assert_eq!(source.name, a.name);
        assert_eq!(
            AnnotationRepository::tags_for(&db, sd.id).await.unwrap(),
            vec!["Good".to_string()]
        );
        assert_eq!(AnnotationRepository::comments_for(&db, a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tag_requires_accepted_detection() {
        let db = memory_db().await;
        let (_, _, a, _) = pair(&db).await;
        let req = ActionRequest::new(vec![a.id], "op").with_payload(ActionPayload::Tag {
            name: "Inspect".into(),
            description: None,
        });
        assert!(matches!(
            dispatch(&db, "tag", &req, &test_context()).await,
            Err(WorkflowError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn empty_comment_is_rejected_and_reject_deletes() {
        let db = memory_db().await;
        let ctx = test_context();
        let (run, _, a, b) = pair(&db).await;

        let empty = ActionRequest::new(vec![a.id], "op").with_payload(ActionPayload::Comment("  ".into()));
        assert!(dispatch(&db, "comment", &empty, &ctx).await.is_err());

        let note = ActionRequest::new(vec![a.id], "op").with_payload(ActionPayload::Comment("dup".into()));
        dispatch(&db, "comment", &note, &ctx).await.unwrap();

        dispatch(&db, "reject", &ActionRequest::new(vec![a.id], "op"), &ctx)
            .await
            .unwrap();
        let left: Vec<i32> = DetectionRepository::list_by_run(&db, run)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(left, vec![b.id]);
        assert!(AnnotationRepository::comments_for(&db, a.id).await.unwrap().is_empty());
    }
}
