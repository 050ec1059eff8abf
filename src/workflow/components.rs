use super::{WorkflowContext, WorkflowError, WorkflowResult};
use crate::storage::entity::run;
use crate::storage::repository::RunRepository;
use log::info;
use sea_orm::ConnectionTrait;

/// Survey component of a run: explicit membership first, then the run-name patterns.
pub async fn component_for_run<C: ConnectionTrait>(
    db: &C,
    run: &run::Model,
    ctx: &WorkflowContext,
) -> WorkflowResult<String> {
    if let Some(name) = RunRepository::component_names(db, run.id).await?.into_iter().next() {
        return Ok(name);
    }
    if let Some(name) = component_from_run_name(&run.name, ctx) {
        info!("Run {} mapped to component {} by name", run.name, name);
        return Ok(name);
    }
    Err(WorkflowError::Precondition(format!(
        "Run {} is not part of any survey component",
        run.name
    )))
}

pub fn component_from_run_name(run_name: &str, ctx: &WorkflowContext) -> Option<String> {
    ctx.run_name_components
        .iter()
        .find(|(re, _)| re.is_match(run_name))
        .map(|(_, component)| component.clone())
}
