use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "external_conflict")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub run_id: i32,
    pub detection_id: i32,
    pub conflict_source_detection_ids: String, // JSON array of source_detection ids
}

impl Model {
    pub fn conflict_ids(&self) -> Result<Vec<i32>, serde_json::Error> {
        serde_json::from_str(&self.conflict_source_detection_ids)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::detection::Entity",
        from = "Column::DetectionId",
        to = "super::detection::Column::Id"
    )]
    Detection,
}

impl Related<super::detection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Detection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
