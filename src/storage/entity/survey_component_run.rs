use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "survey_component_run")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub survey_component_id: i32,
    pub run_id: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::survey_component::Entity",
        from = "Column::SurveyComponentId",
        to = "super::survey_component::Column::Id"
    )]
    SurveyComponent,
    #[sea_orm(
        belongs_to = "super::run::Entity",
        from = "Column::RunId",
        to = "super::run::Column::Id"
    )]
    Run,
}

impl Related<super::survey_component::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SurveyComponent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
