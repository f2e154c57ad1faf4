use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use hearth_db::Database;
use hearth_types::api::{Claims, LikeResponse};
use hearth_types::models::NotificationKind;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::notifications::{PendingPush, pending_push, record_notification};
use crate::run_blocking;

/// Structurally the comment path minus content: toggling a like on persists
/// the row and, for someone else's post, one notification. Toggling off
/// removes the like but never retracts a notification.
pub(crate) fn toggle_like_record(
    db: &Database,
    actor: Uuid,
    post_id: Uuid,
) -> Result<(LikeResponse, Option<PendingPush>), ApiError> {
    let post = db
        .get_post(&post_id.to_string())?
        .ok_or(ApiError::NotFound("post"))?;

    let like_id = Uuid::new_v4();
    let liked = db.toggle_like(&like_id.to_string(), &post.id, &actor.to_string())?;

    let push = if liked && post.author_id != actor.to_string() {
        let metadata = serde_json::json!({ "post_id": post_id });
        let notification = record_notification(
            db,
            &post.author_id,
            &actor.to_string(),
            NotificationKind::Like,
            "liked your post",
            &metadata,
        )?;
        Some(pending_push(db, &notification))
    } else {
        None
    };

    let like_count = db.like_count(&post.id)?;

    Ok((LikeResponse { liked, like_count }, push))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let (response, push) =
        run_blocking(move || toggle_like_record(&db_state.db, claims.sub, post_id)).await?;

    if let Some(push) = push {
        state.sink.publish(push.receiver, push.event);
    }

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn setup_with_post() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&uid(1).to_string(), "ann", "ann@example.com", "hash", "user")
            .unwrap();
        db.create_user(&uid(2).to_string(), "ben", "ben@example.com", "hash", "user")
            .unwrap();

        let post_id = uid(10);
        db.insert_post(&post_id.to_string(), &uid(1).to_string(), "first post")
            .unwrap();
        (db, post_id)
    }

    #[test]
    fn liking_someone_elses_post_notifies_once() {
        let (db, post_id) = setup_with_post();

        let (response, push) = toggle_like_record(&db, uid(2), post_id).unwrap();
        assert!(response.liked);
        assert_eq!(response.like_count, 1);
        assert!(push.is_some());

        let rows = db.get_notifications(&uid(1).to_string(), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "like");
    }

    #[test]
    fn unliking_keeps_the_notification() {
        let (db, post_id) = setup_with_post();

        toggle_like_record(&db, uid(2), post_id).unwrap();
        let (response, push) = toggle_like_record(&db, uid(2), post_id).unwrap();

        assert!(!response.liked);
        assert_eq!(response.like_count, 0);
        assert!(push.is_none());
        // The like row is gone; the notification stays.
        assert_eq!(db.get_notifications(&uid(1).to_string(), 10).unwrap().len(), 1);
    }

    #[test]
    fn liking_own_post_is_silent() {
        let (db, post_id) = setup_with_post();

        let (response, push) = toggle_like_record(&db, uid(1), post_id).unwrap();
        assert!(response.liked);
        assert!(push.is_none());
        assert!(db.get_notifications(&uid(1).to_string(), 10).unwrap().is_empty());
    }

    #[test]
    fn liking_missing_post_is_not_found() {
        let (db, _) = setup_with_post();

        let err = toggle_like_record(&db, uid(2), uid(99)).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
