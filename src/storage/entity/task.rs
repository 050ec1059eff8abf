use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "task")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub func: String,  // internal_cross_match / external_cross_match / release_sources / delete_run
    pub args: String,  // JSON
    pub state: String, // PENDING/RUNNING/COMPLETED/ERROR
    pub user: String,
    pub retval: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
