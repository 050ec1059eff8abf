//! Fixtures shared by the unit tests.

use crate::storage::entity::{
    detection, instance, run, source, source_detection, survey_component, survey_component_run,
};
use crate::storage::establish_connection;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

pub const THRESHOLDS: &str =
    r#"{"flux":10,"spatial_extent":[5,20],"spectral_extent":[5,20],"uncertainty_sigma":5}"#;

pub async fn memory_db() -> DatabaseConnection {
    establish_connection("sqlite::memory:")
        .await
        .expect("in-memory database")
}

/// Inserts a run with one instance; returns (run_id, instance_id).
pub async fn insert_run(db: &DatabaseConnection, name: &str) -> (i32, i32) {
    let run = run::ActiveModel {
        name: Set(name.to_string()),
        sanity_thresholds: Set(THRESHOLDS.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
    let instance = instance::ActiveModel {
        run_id: Set(run.id),
        filename: Set(format!("{}.fits", name)),
        boundary: Set("[0, 100, 0, 100, 0, 100]".to_string()),
        run_date: Set(0),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
    (run.id, instance.id)
}

/// Detection at pixel (x, y, z) and sky (ra, dec, freq) with unit uncertainties and
/// identical shape statistics.
pub fn detection_at(
    run_id: i32,
    instance_id: i32,
    name: &str,
    pixel: (f64, f64, f64),
    sky: (f64, f64, f64),
) -> detection::Model {
    detection::Model {
        id: 0,
        run_id,
        instance_id,
        name: name.to_string(),
        x: pixel.0,
        y: pixel.1,
        z: pixel.2,
        x_min: None,
        x_max: None,
        y_min: None,
        y_max: None,
        z_min: None,
        z_max: None,
        n_pix: Some(500),
        ra: Some(sky.0),
        dec: Some(sky.1),
        freq: Some(sky.2),
        f_sum: Some(100.0),
        ell_maj: Some(10.0),
        ell_min: Some(5.0),
        w20: Some(200.0),
        w50: Some(150.0),
        rel: Some(0.9),
        err_x: Some(1.0),
        err_y: Some(1.0),
        err_z: Some(1.0),
        err_f_sum: Some(1.0),
        unresolved: false,
    }
}

pub async fn insert_detection(db: &DatabaseConnection, model: detection::Model) -> detection::Model {
    let mut am = detection::ActiveModel::from(model).reset_all();
    am.id = sea_orm::ActiveValue::NotSet;
    am.insert(db).await.unwrap()
}

/// Accepts a detection under a source with the given name; returns the source_detection.
pub async fn accept_as(
    db: &DatabaseConnection,
    detection_id: i32,
    source_name: &str,
) -> source_detection::Model {
    let source = source::ActiveModel {
        name: Set(source_name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
    source_detection::ActiveModel {
        source_id: Set(source.id),
        detection_id: Set(detection_id),
        added_at: Set(0),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_component(db: &DatabaseConnection, name: &str, run_ids: &[i32]) {
    let component = survey_component::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
    for run_id in run_ids {
        survey_component_run::ActiveModel {
            survey_component_id: Set(component.id),
            run_id: Set(*run_id),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();
    }
}
