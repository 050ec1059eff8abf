use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Quality checked identity a detection is merged into once accepted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "source")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::source_detection::Entity")]
    SourceDetection,
}

impl Related<super::source_detection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SourceDetection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
