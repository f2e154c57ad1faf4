use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use hearth_db::Database;
use hearth_db::models::NotificationRow;
use hearth_types::api::{Claims, NotificationQuery, NotificationResponse, UnreadCountResponse};
use hearth_types::events::GatewayEvent;
use hearth_types::models::{NotificationKind, UserSummary};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;
use crate::views::{parse_timestamp, parse_uuid, profile_map, profile_view, user_summary};

/// A gateway event ready to hand to the sink once the blocking persistence
/// step is done. Push is advisory: dropping this on the floor loses nothing
/// durable.
#[derive(Debug)]
pub(crate) struct PendingPush {
    pub receiver: Uuid,
    pub event: GatewayEvent,
}

/// Persist a notification row and return it joined with the sender username.
pub(crate) fn record_notification(
    db: &Database,
    receiver_id: &str,
    sender_id: &str,
    kind: NotificationKind,
    body: &str,
    metadata: &serde_json::Value,
) -> Result<NotificationRow, ApiError> {
    let id = Uuid::new_v4();
    db.insert_notification(
        &id.to_string(),
        receiver_id,
        sender_id,
        kind.as_str(),
        body,
        &metadata.to_string(),
    )?;

    let row = db
        .get_notification(&id.to_string())?
        .ok_or_else(|| anyhow::anyhow!("notification vanished after insert: {}", id))?;

    Ok(row)
}

/// Build the push payload for a freshly persisted notification. The sender's
/// profile ride along so the client can render without a second round trip.
pub(crate) fn pending_push(db: &Database, row: &NotificationRow) -> PendingPush {
    // Best-effort enrichment: a failed profile lookup degrades the payload,
    // never the operation.
    let profile = db
        .get_profile(&row.sender_id)
        .ok()
        .flatten()
        .map(|p| profile_view(&p));

    let sender = UserSummary {
        id: parse_uuid(&row.sender_id, "sender id"),
        username: row.sender_username.clone(),
        profile,
    };

    PendingPush {
        receiver: parse_uuid(&row.receiver_id, "receiver id"),
        event: GatewayEvent::NotificationNew {
            id: parse_uuid(&row.id, "notification id"),
            kind: row.kind.parse().unwrap_or(NotificationKind::Comment),
            body: row.body.clone(),
            sender,
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
            created_at: parse_timestamp(&row.created_at),
        },
    }
}

pub(crate) fn mark_read_record(
    db: &Database,
    actor: Uuid,
    notification_id: Uuid,
) -> Result<(), ApiError> {
    let row = db
        .get_notification(&notification_id.to_string())?
        .ok_or(ApiError::NotFound("notification"))?;

    if row.receiver_id != actor.to_string() {
        return Err(ApiError::Forbidden(
            "only the receiver may mark a notification read".into(),
        ));
    }

    db.mark_notification_read(&row.id)?;
    Ok(())
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NotificationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(200);

    let notifications = run_blocking(move || {
        let rows = state.db.get_notifications(&claims.sub.to_string(), limit)?;

        let sender_ids: Vec<String> = rows.iter().map(|r| r.sender_id.clone()).collect();
        let profiles = profile_map(&state.db, &sender_ids)?;

        let notifications: Vec<NotificationResponse> = rows
            .iter()
            .map(|row| NotificationResponse {
                id: parse_uuid(&row.id, "notification id"),
                kind: row.kind.parse().unwrap_or(NotificationKind::Comment),
                body: row.body.clone(),
                sender: user_summary(&row.sender_id, &row.sender_username, &profiles),
                metadata: serde_json::from_str(&row.metadata)
                    .unwrap_or(serde_json::Value::Null),
                read: row.read,
                created_at: parse_timestamp(&row.created_at),
            })
            .collect();

        Ok(notifications)
    })
    .await?;

    Ok(Json(notifications))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let unread = run_blocking(move || {
        Ok(state
            .db
            .unread_notification_count(&claims.sub.to_string())?)
    })
    .await?;

    Ok(Json(UnreadCountResponse { unread }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(move || mark_read_record(&state.db, claims.sub, notification_id)).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(move || {
        state
            .db
            .mark_all_notifications_read(&claims.sub.to_string())?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&uid(1).to_string(), "ann", "ann@example.com", "hash", "user")
            .unwrap();
        db.create_user(&uid(2).to_string(), "ben", "ben@example.com", "hash", "user")
            .unwrap();
        db
    }

    #[test]
    fn mark_read_is_receiver_only() {
        let db = setup();
        let row = record_notification(
            &db,
            &uid(1).to_string(),
            &uid(2).to_string(),
            NotificationKind::Comment,
            "commented on your post",
            &serde_json::json!({}),
        )
        .unwrap();
        let id: Uuid = row.id.parse().unwrap();

        let err = mark_read_record(&db, uid(2), id).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(db.unread_notification_count(&uid(1).to_string()).unwrap(), 1);

        mark_read_record(&db, uid(1), id).unwrap();
        assert_eq!(db.unread_notification_count(&uid(1).to_string()).unwrap(), 0);
    }

    #[test]
    fn mark_read_unknown_id_is_not_found() {
        let db = setup();
        let err = mark_read_record(&db, uid(1), uid(99)).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn push_payload_carries_sender_and_metadata() {
        let db = setup();
        db.upsert_profile(&uid(2).to_string(), Some("Ben"), None, None, None, None)
            .unwrap();

        let row = record_notification(
            &db,
            &uid(1).to_string(),
            &uid(2).to_string(),
            NotificationKind::Like,
            "liked your post",
            &serde_json::json!({"post_id": uid(7)}),
        )
        .unwrap();

        let push = pending_push(&db, &row);
        assert_eq!(push.receiver, uid(1));
        match push.event {
            GatewayEvent::NotificationNew { kind, sender, metadata, .. } => {
                assert_eq!(kind, NotificationKind::Like);
                assert_eq!(sender.username, "ben");
                assert_eq!(
                    sender.profile.unwrap().display_name.as_deref(),
                    Some("Ben")
                );
                assert_eq!(metadata["post_id"], serde_json::json!(uid(7)));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
