use crate::storage::entity::{
    source::{self, Entity as Source},
    source_detection::{self, Entity as SourceDetection},
    tag_source_detection,
};
use crate::storage::repository::ConflictRepository;
use chrono::Utc;
use log::info;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
};

pub struct SourceRepository;

impl SourceRepository {
    pub async fn find<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Option<source::Model>, sea_orm::DbErr> {
        Source::find_by_id(id).one(db).await
    }

    pub async fn find_by_name<C: ConnectionTrait>(
        db: &C,
        name: &str,
    ) -> Result<Option<source::Model>, sea_orm::DbErr> {
        Source::find()
            .filter(source::Column::Name.eq(name))
            .one(db)
            .await
    }

    pub async fn get_or_create<C: ConnectionTrait>(
        db: &C,
        name: &str,
    ) -> Result<source::Model, sea_orm::DbErr> {
        if let Some(existing) = Self::find_by_name(db, name).await? {
            return Ok(existing);
        }
        source::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn rename<C: ConnectionTrait>(
        db: &C,
        source_id: i32,
        name: &str,
    ) -> Result<(), sea_orm::DbErr> {
        source::ActiveModel {
            id: Set(source_id),
            name: Set(name.to_string()),
        }
        .update(db)
        .await?;
        Ok(())
    }

    pub async fn source_detection_of<C: ConnectionTrait>(
        db: &C,
        detection_id: i32,
    ) -> Result<Option<source_detection::Model>, sea_orm::DbErr> {
        SourceDetection::find()
            .filter(source_detection::Column::DetectionId.eq(detection_id))
            .one(db)
            .await
    }

    pub async fn find_source_detection<C: ConnectionTrait>(
        db: &C,
        id: i32,
    ) -> Result<Option<source_detection::Model>, sea_orm::DbErr> {
        SourceDetection::find_by_id(id).one(db).await
    }

    pub async fn find_source_detections<C: ConnectionTrait>(
        db: &C,
        ids: &[i32],
    ) -> Result<Vec<source_detection::Model>, sea_orm::DbErr> {
        SourceDetection::find()
            .filter(source_detection::Column::Id.is_in(ids.iter().copied()))
            .all(db)
            .await
    }

    pub async fn attach<C: ConnectionTrait>(
        db: &C,
        source_id: i32,
        detection_id: i32,
    ) -> Result<source_detection::Model, sea_orm::DbErr> {
        source_detection::ActiveModel {
            source_id: Set(source_id),
            detection_id: Set(detection_id),
            added_at: Set(Utc::now().timestamp()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// Points a source-detection at another source; the previous source goes if nothing else
    /// references it.
    pub async fn move_to<C: ConnectionTrait>(
        db: &C,
        sd: &source_detection::Model,
        source_id: i32,
    ) -> Result<(), sea_orm::DbErr> {
        if sd.source_id == source_id {
            return Ok(());
        }
        source_detection::ActiveModel {
            id: Set(sd.id),
            source_id: Set(source_id),
            ..Default::default()
        }
        .update(db)
        .await?;
        Self::delete_if_orphaned(db, sd.source_id).await?;
        Ok(())
    }

    /// Removes a source-detection with its tag links and conflict references, then its source
    /// if orphaned.
    pub async fn remove_source_detection<C: ConnectionTrait>(
        db: &C,
        sd: &source_detection::Model,
    ) -> Result<(), sea_orm::DbErr> {
        tag_source_detection::Entity::delete_many()
            .filter(tag_source_detection::Column::SourceDetectionId.eq(sd.id))
            .exec(db)
            .await?;
        ConflictRepository::drop_reference(db, sd.id).await?;
        SourceDetection::delete_by_id(sd.id).exec(db).await?;
        Self::delete_if_orphaned(db, sd.source_id).await?;
        Ok(())
    }

    pub async fn delete_if_orphaned<C: ConnectionTrait>(
        db: &C,
        source_id: i32,
    ) -> Result<bool, sea_orm::DbErr> {
        let remaining = SourceDetection::find()
            .filter(source_detection::Column::SourceId.eq(source_id))
            .count(db)
            .await?;
        if remaining > 0 {
            return Ok(false);
        }
        let res = Source::delete_by_id(source_id).exec(db).await?;
        if res.rows_affected > 0 {
            info!("Removed orphaned source {}", source_id);
        }
        Ok(res.rows_affected > 0)
    }
}
