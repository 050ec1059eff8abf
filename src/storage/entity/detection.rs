use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "detection")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub run_id: i32,
    pub instance_id: i32,
    pub name: String,

    // pixel space
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub x_min: Option<i32>,
    pub x_max: Option<i32>,
    pub y_min: Option<i32>,
    pub y_max: Option<i32>,
    pub z_min: Option<i32>,
    pub z_max: Option<i32>,
    pub n_pix: Option<i32>,

    // sky position: ra/dec in degrees, freq in Hz
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub freq: Option<f64>,

    pub f_sum: Option<f64>,
    pub ell_maj: Option<f64>,
    pub ell_min: Option<f64>,
    pub w20: Option<f64>,
    pub w50: Option<f64>,
    pub rel: Option<f64>,

    pub err_x: Option<f64>,
    pub err_y: Option<f64>,
    pub err_z: Option<f64>,
    pub err_f_sum: Option<f64>,

    pub unresolved: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::run::Entity",
        from = "Column::RunId",
        to = "super::run::Column::Id"
    )]
    Run,
    #[sea_orm(
        belongs_to = "super::instance::Entity",
        from = "Column::InstanceId",
        to = "super::instance::Column::Id"
    )]
    Instance,
}

impl Related<super::run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
