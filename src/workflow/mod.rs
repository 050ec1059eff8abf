//! Curation workflow over runs, detections and sources.
//!
//! Every run-level operation opens one transaction and either commits all of its mutations or
//! none of them.

pub mod actions;
pub mod components;
pub mod conflict;
pub mod delete;
pub mod external;
pub mod internal;
pub mod matching;
pub mod naming;
pub mod release;

use crate::config::{AppConfig, ConfigError, CrossMatchConfig, InspectionConfig, NamingConfig};
use crate::storage::entity::run;
use crate::storage::repository::RunRepository;
use matching::{MatchError, SanityThresholds};
use naming::NamingError;
use regex::Regex;
use sea_orm::{ConnectionTrait, DbErr};

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    /// Wrong selection or state; nothing was changed.
    #[error("{0}")]
    Precondition(String),
    /// Stored data contradicts what the operation expects.
    #[error("{0}")]
    Consistency(String),
    #[error(transparent)]
    Computation(#[from] MatchError),
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Settings every workflow operation reads.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub naming: NamingConfig,
    pub crossmatch: CrossMatchConfig,
    pub inspection: InspectionConfig,
    pub release_tag: String,
    pub operator: String,
    pub run_name_components: Vec<(Regex, String)>,
}

impl WorkflowContext {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        let run_name_components = cfg
            .run_name_components
            .iter()
            .map(|(pattern, component)| {
                Regex::new(pattern)
                    .map(|re| (re, component.clone()))
                    .map_err(|e| ConfigError::Pattern(pattern.clone(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            naming: cfg.naming.clone(),
            crossmatch: cfg.crossmatch.clone(),
            inspection: cfg.inspection.clone(),
            release_tag: cfg.release_tag.clone(),
            operator: cfg.operator.clone(),
            run_name_components,
        })
    }
}

pub(crate) async fn load_run<C: ConnectionTrait>(db: &C, run_id: i32) -> WorkflowResult<run::Model> {
    RunRepository::find(db, run_id)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("Run {}", run_id)))
}

pub(crate) fn run_thresholds(run: &run::Model) -> WorkflowResult<SanityThresholds> {
    Ok(SanityThresholds::from_json(&run.sanity_thresholds)?)
}

#[cfg(test)]
pub(crate) fn test_context() -> WorkflowContext {
    let mut ctx = WorkflowContext::from_config(&AppConfig::default()).unwrap();
    ctx.operator = "tester".to_string();
    ctx
}
