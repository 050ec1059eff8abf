use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "run")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub sanity_thresholds: String, // JSON: flux / spatial_extent / spectral_extent / uncertainty_sigma
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::detection::Entity")]
    Detection,
    #[sea_orm(has_many = "super::instance::Entity")]
    Instance,
}

impl Related<super::detection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Detection.def()
    }
}

impl Related<super::instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Instance.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
