use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use hearth_db::Database;
use hearth_types::api::{Claims, CommentResponse, CreateCommentRequest};
use hearth_types::models::{NotificationKind, UserSummary};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::notifications::{PendingPush, pending_push, record_notification};
use crate::run_blocking;
use crate::views::{parse_timestamp, profile_view};

#[derive(Debug)]
pub(crate) struct CreatedComment {
    pub comment: CommentResponse,
    pub push: Option<PendingPush>,
}

/// The comment path: validate, load the post, persist the comment, and when
/// the commenter is not the post's author, persist one notification for the
/// author. Push payload assembly happens here too, but actual delivery is
/// the caller's problem; nothing in this function touches a transport.
pub(crate) fn create_comment_record(
    db: &Database,
    actor: Uuid,
    post_id: Uuid,
    content: &str,
) -> Result<CreatedComment, ApiError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::InvalidArgument(
            "comment content is required".into(),
        ));
    }

    let post = db
        .get_post(&post_id.to_string())?
        .ok_or(ApiError::NotFound("post"))?;

    let comment_id = Uuid::new_v4();
    db.insert_comment(
        &comment_id.to_string(),
        &post.id,
        &actor.to_string(),
        content,
    )?;

    let row = db
        .get_comment(&comment_id.to_string())?
        .ok_or_else(|| anyhow::anyhow!("comment vanished after insert: {}", comment_id))?;

    // Self-comments never notify
    let push = if post.author_id != actor.to_string() {
        let metadata = serde_json::json!({
            "post_id": post_id,
            "comment_id": comment_id,
        });
        let notification = record_notification(
            db,
            &post.author_id,
            &actor.to_string(),
            NotificationKind::Comment,
            "commented on your post",
            &metadata,
        )?;
        Some(pending_push(db, &notification))
    } else {
        None
    };

    let profile = db.get_profile(&row.author_id)?.map(|p| profile_view(&p));

    Ok(CreatedComment {
        comment: CommentResponse {
            id: comment_id,
            post_id,
            author: UserSummary {
                id: actor,
                username: row.author_username.clone(),
                profile,
            },
            content: row.content.clone(),
            created_at: parse_timestamp(&row.created_at),
        },
        push,
    })
}

pub(crate) fn delete_comment_record(
    db: &Database,
    actor: Uuid,
    comment_id: Uuid,
) -> Result<(), ApiError> {
    let row = db
        .get_comment(&comment_id.to_string())?
        .ok_or(ApiError::NotFound("comment"))?;

    if row.author_id != actor.to_string() {
        return Err(ApiError::Forbidden(
            "only the author may delete a comment".into(),
        ));
    }

    // Notifications already sent for this comment are left in place.
    db.delete_comment(&row.id)?;
    Ok(())
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let created = run_blocking(move || {
        create_comment_record(&db_state.db, claims.sub, post_id, &req.content)
    })
    .await?;

    // Best-effort push to the post author's live sessions. Persisted state is
    // already committed; delivery failure is invisible to the caller.
    if let Some(push) = created.push {
        state.sink.publish(push.receiver, push.event);
    }

    Ok((StatusCode::CREATED, Json(created.comment)))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(move || delete_comment_record(&state.db, claims.sub, comment_id)).await?;

    Ok(StatusCode::NO_CONTENT)
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
    fn commenting_on_someone_elses_post_notifies_the_author() {
        let (db, post_id) = setup_with_post();

        let created = create_comment_record(&db, uid(2), post_id, "nice").unwrap();
        assert_eq!(created.comment.author.username, "ben");
        assert_eq!(created.comment.content, "nice");

        let rows = db.get_notifications(&uid(1).to_string(), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "comment");
        assert_eq!(rows[0].sender_id, uid(2).to_string());
        assert_eq!(rows[0].receiver_id, uid(1).to_string());

        let metadata: serde_json::Value = serde_json::from_str(&rows[0].metadata).unwrap();
        assert_eq!(metadata["post_id"], serde_json::json!(post_id));
        assert_eq!(
            metadata["comment_id"],
            serde_json::json!(created.comment.id)
        );

        let push = created.push.expect("notification should carry a push");
        assert_eq!(push.receiver, uid(1));
    }

    #[test]
    fn commenting_on_own_post_creates_no_notification() {
        let (db, post_id) = setup_with_post();

        let created = create_comment_record(&db, uid(1), post_id, "me again").unwrap();
        assert!(created.push.is_none());
        assert!(db.get_notifications(&uid(1).to_string(), 10).unwrap().is_empty());
    }

    #[test]
    fn blank_content_is_rejected() {
        let (db, post_id) = setup_with_post();

        let err = create_comment_record(&db, uid(2), post_id, "   ").unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn commenting_on_missing_post_is_not_found() {
        let (db, _) = setup_with_post();

        let err = create_comment_record(&db, uid(2), uid(99), "hello").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn only_the_author_may_delete() {
        let (db, post_id) = setup_with_post();
        let created = create_comment_record(&db, uid(2), post_id, "nice").unwrap();

        let err = delete_comment_record(&db, uid(1), created.comment.id).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(db.get_comment(&created.comment.id.to_string()).unwrap().is_some());

        delete_comment_record(&db, uid(2), created.comment.id).unwrap();
        assert!(db.get_comment(&created.comment.id.to_string()).unwrap().is_none());

        let err = delete_comment_record(&db, uid(2), created.comment.id).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn deleting_a_comment_keeps_its_notification() {
        let (db, post_id) = setup_with_post();
        let created = create_comment_record(&db, uid(2), post_id, "nice").unwrap();

        delete_comment_record(&db, uid(2), created.comment.id).unwrap();
        assert_eq!(db.get_notifications(&uid(1).to_string(), 10).unwrap().len(), 1);
    }
}
