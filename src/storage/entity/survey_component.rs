use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "survey_component")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::survey_component_run::Entity")]
    SurveyComponentRun,
}

impl Related<super::survey_component_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SurveyComponentRun.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
