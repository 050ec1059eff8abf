use crate::storage::entity::{comment, tag, tag_source_detection};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};

/// Tags and comments. Both are append-only apart from cascades on delete.
pub struct AnnotationRepository;

impl AnnotationRepository {
    pub async fn add_comment<C: ConnectionTrait>(
        db: &C,
        detection_id: i32,
        text: &str,
        author: &str,
    ) -> Result<comment::Model, sea_orm::DbErr> {
        comment::ActiveModel {
            comment: Set(text.to_string()),
            author: Set(Some(author.to_string())),
            detection_id: Set(detection_id),
            updated_at: Set(Utc::now().timestamp()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn comments_for<C: ConnectionTrait>(
        db: &C,
        detection_id: i32,
    ) -> Result<Vec<comment::Model>, sea_orm::DbErr> {
        comment::Entity::find()
            .filter(comment::Column::DetectionId.eq(detection_id))
            .order_by_asc(comment::Column::Id)
            .all(db)
            .await
    }

    pub async fn delete_comments_for<C: ConnectionTrait>(
        db: &C,
        detection_id: i32,
    ) -> Result<u64, sea_orm::DbErr> {
        let res = comment::Entity::delete_many()
            .filter(comment::Column::DetectionId.eq(detection_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn get_or_create_tag<C: ConnectionTrait>(
        db: &C,
        name: &str,
        description: Option<&str>,
    ) -> Result<tag::Model, sea_orm::DbErr> {
        if let Some(existing) = tag::Entity::find()
            .filter(tag::Column::Name.eq(name))
            .one(db)
            .await?
        {
            return Ok(existing);
        }
        tag::ActiveModel {
            name: Set(name.to_string()),
            description: Set(description.map(str::to_string)),
            added_at: Set(Utc::now().timestamp()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// Attaches a tag once; a repeated attach returns the existing link.
    pub async fn tag_source_detection<C: ConnectionTrait>(
        db: &C,
        tag_id: i32,
        source_detection_id: i32,
        author: &str,
    ) -> Result<tag_source_detection::Model, sea_orm::DbErr> {
        if let Some(existing) = tag_source_detection::Entity::find()
            .filter(tag_source_detection::Column::TagId.eq(tag_id))
            .filter(tag_source_detection::Column::SourceDetectionId.eq(source_detection_id))
            .one(db)
            .await?
        {
            return Ok(existing);
        }
        tag_source_detection::ActiveModel {
            tag_id: Set(tag_id),
            source_detection_id: Set(source_detection_id),
            author: Set(Some(author.to_string())),
            added_at: Set(Utc::now().timestamp()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn tags_for<C: ConnectionTrait>(
        db: &C,
        source_detection_id: i32,
    ) -> Result<Vec<String>, sea_orm::DbErr> {
        let links = tag_source_detection::Entity::find()
            .filter(tag_source_detection::Column::SourceDetectionId.eq(source_detection_id))
            .all(db)
            .await?;
        let tag_ids: Vec<i32> = links.iter().map(|l| l.tag_id).collect();
        let tags = tag::Entity::find()
            .filter(tag::Column::Id.is_in(tag_ids))
            .order_by_asc(tag::Column::Name)
            .all(db)
            .await?;
        Ok(tags.into_iter().map(|t| t.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{accept_as, detection_at, insert_detection, insert_run, memory_db};

    #[tokio::test]
    async fn tags_are_shared_and_attached_once() {
        let db = memory_db().await;
        let (run, inst) = insert_run(&db, "SER_1").await;
        let d = insert_detection(&db, detection_at(run, inst, "a", (1.0, 1.0, 1.0), (1.0, 1.0, 1.4e9))).await;
        let sd = accept_as(&db, d.id, "S1").await;

        let t1 = AnnotationRepository::get_or_create_tag(&db, "Released", Some("public"))
            .await
            .unwrap();
        let t2 = AnnotationRepository::get_or_create_tag(&db, "Released", None)
            .await
            .unwrap();
        assert_eq!(t1.id, t2.id);

        AnnotationRepository::tag_source_detection(&db, t1.id, sd.id, "op").await.unwrap();
        AnnotationRepository::tag_source_detection(&db, t1.id, sd.id, "op").await.unwrap();
        assert_eq!(
            AnnotationRepository::tags_for(&db, sd.id).await.unwrap(),
            vec!["Released".to_string()]
        );

        AnnotationRepository::add_comment(&db, d.id, "looks fine", "op").await.unwrap();
        let comments = AnnotationRepository::comments_for(&db, d.id).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author.as_deref(), Some("op"));
    }
}
