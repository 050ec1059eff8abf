use crate::storage::entity::{
    comment, detection, external_conflict, instance, run, source, source_detection,
    survey_component, survey_component_run, tag, tag_source_detection, task,
};
use log::info;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    EntityTrait, Schema, Statement,
};
use std::time::Duration;

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    if db_url.contains(":memory:") {
        // in-memory SQLite lives and dies with its connection
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(10)
            .min_connections(2)
            .idle_timeout(Duration::from_secs(8))
            .max_lifetime(Duration::from_secs(8));
    }
    opt.connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Info);

    let db = Database::connect(opt).await?;

    if db.get_database_backend() == DatabaseBackend::Sqlite {
        db.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "PRAGMA journal_mode=WAL;".to_string(),
        ))
        .await?;
    }

    create_tables(&db).await?;

    info!("Database connection established and schema initialized.");

    Ok(db)
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let stmt = builder.build(schema.create_table_from_entity(entity).if_not_exists());
    db.execute(stmt).await?;
    Ok(())
}

/// Referenced tables first.
async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, run::Entity).await?;
    create_table(db, instance::Entity).await?;
    create_table(db, detection::Entity).await?;
    create_table(db, source::Entity).await?;
    create_table(db, source_detection::Entity).await?;
    create_table(db, external_conflict::Entity).await?;
    create_table(db, tag::Entity).await?;
    create_table(db, tag_source_detection::Entity).await?;
    create_table(db, comment::Entity).await?;
    create_table(db, survey_component::Entity).await?;
    create_table(db, survey_component_run::Entity).await?;
    create_table(db, task::Entity).await?;

    // at most one membership per (component, run)
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_survey_component_run_unique ON survey_component_run(survey_component_id, run_id);".to_string(),
    ))
    .await?;
    // lookups by run are on every workflow path
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "CREATE INDEX IF NOT EXISTS idx_detection_run ON detection(run_id);".to_string(),
    ))
    .await?;

    Ok(())
}
