use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use hearth_db::Database;
use hearth_db::models::FriendshipRow;
use hearth_db::queries::FriendRequestOutcome;
use hearth_types::api::{
    Claims, FriendDecision, FriendEntry, FriendshipResponse, PendingRequestEntry,
    RespondFriendRequest, SendFriendRequest,
};
use hearth_types::models::{FriendshipStatus, NotificationKind};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::notifications::{PendingPush, pending_push, record_notification};
use crate::run_blocking;
use crate::views::{parse_timestamp, parse_uuid, profile_map, user_summary};

/// Whether a declined pair may be asked again. The strict default treats any
/// existing row as blocking; flipping this on lets a new request re-open a
/// declined row as pending with the new orientation.
#[derive(Debug, Clone, Copy)]
pub struct FriendPolicy {
    pub rerequest_after_decline: bool,
}

impl Default for FriendPolicy {
    fn default() -> Self {
        Self {
            rerequest_after_decline: false,
        }
    }
}

fn to_response(row: &FriendshipRow) -> FriendshipResponse {
    FriendshipResponse {
        id: parse_uuid(&row.id, "friendship id"),
        user_id: parse_uuid(&row.user_id, "user id"),
        friend_id: parse_uuid(&row.friend_id, "friend id"),
        status: row.status.parse().unwrap_or(FriendshipStatus::Pending),
        created_at: parse_timestamp(&row.created_at),
    }
}

fn request_notification(
    db: &Database,
    row: &FriendshipRow,
) -> Result<PendingPush, ApiError> {
    let notification = record_notification(
        db,
        &row.friend_id,
        &row.user_id,
        NotificationKind::FriendRequest,
        "sent you a friend request",
        &serde_json::json!({ "request_id": row.id }),
    )?;
    Ok(pending_push(db, &notification))
}

/// Send a friend request. The insert is atomic: the canonical pair index
/// decides races, so there is no separate existence check to lose.
pub(crate) fn send_request_record(
    db: &Database,
    policy: FriendPolicy,
    actor: Uuid,
    target: Uuid,
) -> Result<(FriendshipResponse, Option<PendingPush>), ApiError> {
    if actor == target {
        return Err(ApiError::InvalidArgument(
            "cannot send a friend request to yourself".into(),
        ));
    }

    if db.get_user_by_id(&target.to_string())?.is_none() {
        return Err(ApiError::NotFound("user"));
    }

    let request_id = Uuid::new_v4();
    let outcome =
        db.insert_friend_request(&request_id.to_string(), &actor.to_string(), &target.to_string())?;

    match outcome {
        FriendRequestOutcome::Created(row) => {
            let push = request_notification(db, &row)?;
            Ok((to_response(&row), Some(push)))
        }
        FriendRequestOutcome::DuplicatePair(existing) => {
            if policy.rerequest_after_decline
                && existing.status == FriendshipStatus::Declined.as_str()
                && db.reopen_declined_pair(&existing.id, &actor.to_string(), &target.to_string())?
            {
                let row = db
                    .get_friendship(&existing.id)?
                    .ok_or_else(|| anyhow::anyhow!("friendship vanished: {}", existing.id))?;
                let push = request_notification(db, &row)?;
                return Ok((to_response(&row), Some(push)));
            }

            Err(ApiError::Conflict(
                "a relationship between these users already exists".into(),
            ))
        }
    }
}

/// Respond to a pending request. Only the addressed party may answer, and
/// only once: the transition is a guarded update, so a row that already
/// reached a terminal state conflicts instead of flipping.
pub(crate) fn respond_request_record(
    db: &Database,
    actor: Uuid,
    request_id: Uuid,
    decision: FriendDecision,
) -> Result<(FriendshipResponse, Option<PendingPush>), ApiError> {
    let row = db
        .get_friendship(&request_id.to_string())?
        .ok_or(ApiError::NotFound("friend request"))?;

    if row.friend_id != actor.to_string() {
        return Err(ApiError::Forbidden(
            "only the addressed user may respond to this request".into(),
        ));
    }

    let to_status = match decision {
        FriendDecision::Accept => FriendshipStatus::Accepted,
        FriendDecision::Decline => FriendshipStatus::Declined,
    };

    if !db.transition_friendship(&row.id, to_status.as_str())? {
        return Err(ApiError::Conflict(
            "this request has already been answered".into(),
        ));
    }

    let updated = db
        .get_friendship(&row.id)?
        .ok_or_else(|| anyhow::anyhow!("friendship vanished: {}", row.id))?;

    let push = match decision {
        FriendDecision::Accept => {
            let notification = record_notification(
                db,
                &updated.user_id,
                &actor.to_string(),
                NotificationKind::FriendAccept,
                "accepted your friend request",
                &serde_json::json!({ "request_id": updated.id }),
            )?;
            Some(pending_push(db, &notification))
        }
        FriendDecision::Decline => None,
    };

    Ok((to_response(&updated), push))
}

pub async fn send_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendFriendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let policy = state.friends;
    let (response, push) = run_blocking(move || {
        send_request_record(&db_state.db, policy, claims.sub, req.target_id)
    })
    .await?;

    if let Some(push) = push {
        state.sink.publish(push.receiver, push.event);
    }

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn respond_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RespondFriendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let (response, push) = run_blocking(move || {
        respond_request_record(&db_state.db, claims.sub, req.request_id, req.decision)
    })
    .await?;

    if let Some(push) = push {
        state.sink.publish(push.receiver, push.event);
    }

    Ok(Json(response))
}

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let friends = run_blocking(move || {
        let rows = state.db.list_friends(&claims.sub.to_string())?;

        let ids: Vec<String> = rows.iter().map(|r| r.user_id.clone()).collect();
        let profiles = profile_map(&state.db, &ids)?;

        let friends: Vec<FriendEntry> = rows
            .iter()
            .map(|row| FriendEntry {
                user: user_summary(&row.user_id, &row.username, &profiles),
                since: parse_timestamp(&row.created_at),
            })
            .collect();

        Ok(friends)
    })
    .await?;

    Ok(Json(friends))
}

pub async fn list_pending(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let pending = run_blocking(move || {
        let rows = state.db.list_pending_requests(&claims.sub.to_string())?;

        let ids: Vec<String> = rows.iter().map(|r| r.requester_id.clone()).collect();
        let profiles = profile_map(&state.db, &ids)?;

        let pending: Vec<PendingRequestEntry> = rows
            .iter()
            .map(|row| PendingRequestEntry {
                request_id: parse_uuid(&row.request_id, "request id"),
                from: user_summary(&row.requester_id, &row.requester_username, &profiles),
                created_at: parse_timestamp(&row.created_at),
            })
            .collect();

        Ok(pending)
    })
    .await?;

    Ok(Json(pending))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        for (n, name) in [(1, "ann"), (2, "ben"), (3, "cat")] {
            db.create_user(
                &uid(n).to_string(),
                name,
                &format!("{}@example.com", name),
                "hash",
                "user",
            )
            .unwrap();
        }
        db
    }

    const STRICT: FriendPolicy = FriendPolicy {
        rerequest_after_decline: false,
    };
    const LENIENT: FriendPolicy = FriendPolicy {
        rerequest_after_decline: true,
    };

    #[test]
    fn self_request_is_invalid() {
        let db = setup();
        let err = send_request_record(&db, STRICT, uid(1), uid(1)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn request_to_unknown_user_is_not_found() {
        let db = setup();
        let err = send_request_record(&db, STRICT, uid(1), uid(99)).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn request_creates_pending_row_and_notifies_target() {
        let db = setup();

        let (response, push) = send_request_record(&db, STRICT, uid(1), uid(2)).unwrap();
        assert_eq!(response.status, FriendshipStatus::Pending);
        assert_eq!(response.user_id, uid(1));
        assert_eq!(response.friend_id, uid(2));

        assert_eq!(push.unwrap().receiver, uid(2));
        let rows = db.get_notifications(&uid(2).to_string(), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "friend_request");
    }

    #[test]
    fn duplicate_pair_conflicts_in_both_directions() {
        let db = setup();
        send_request_record(&db, STRICT, uid(1), uid(2)).unwrap();

        let err = send_request_record(&db, STRICT, uid(1), uid(2)).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = send_request_record(&db, STRICT, uid(2), uid(1)).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn only_the_addressed_party_may_respond() {
        let db = setup();
        let (request, _) = send_request_record(&db, STRICT, uid(1), uid(2)).unwrap();

        // The requester cannot answer their own request
        let err =
            respond_request_record(&db, uid(1), request.id, FriendDecision::Accept).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // Neither can a bystander
        let err =
            respond_request_record(&db, uid(3), request.id, FriendDecision::Accept).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let row = db.get_friendship(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "pending");
    }

    #[test]
    fn responding_to_unknown_request_is_not_found() {
        let db = setup();
        let err =
            respond_request_record(&db, uid(2), uid(99), FriendDecision::Accept).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn accept_notifies_the_requester_and_is_final() {
        let db = setup();
        let (request, _) = send_request_record(&db, STRICT, uid(1), uid(2)).unwrap();

        let (response, push) =
            respond_request_record(&db, uid(2), request.id, FriendDecision::Accept).unwrap();
        assert_eq!(response.status, FriendshipStatus::Accepted);
        assert_eq!(push.unwrap().receiver, uid(1));

        let rows = db.get_notifications(&uid(1).to_string(), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "friend_accept");

        // Terminal rows cannot be re-answered
        let err =
            respond_request_record(&db, uid(2), request.id, FriendDecision::Decline).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let row = db.get_friendship(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "accepted");
    }

    #[test]
    fn decline_blocks_retry_under_the_strict_policy() {
        let db = setup();
        let (request, _) = send_request_record(&db, STRICT, uid(1), uid(2)).unwrap();

        let (response, push) =
            respond_request_record(&db, uid(2), request.id, FriendDecision::Decline).unwrap();
        assert_eq!(response.status, FriendshipStatus::Declined);
        assert!(push.is_none());

        let err = send_request_record(&db, STRICT, uid(1), uid(2)).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn decline_allows_retry_under_the_lenient_policy() {
        let db = setup();
        let (request, _) = send_request_record(&db, LENIENT, uid(1), uid(2)).unwrap();
        respond_request_record(&db, uid(2), request.id, FriendDecision::Decline).unwrap();

        // The declined row re-opens as pending, oriented from the new requester
        let (response, push) = send_request_record(&db, LENIENT, uid(2), uid(1)).unwrap();
        assert_eq!(response.status, FriendshipStatus::Pending);
        assert_eq!(response.user_id, uid(2));
        assert_eq!(response.friend_id, uid(1));
        assert_eq!(push.unwrap().receiver, uid(1));

        // A pending pair still conflicts even under the lenient policy
        let err = send_request_record(&db, LENIENT, uid(1), uid(2)).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn friends_and_pending_views() {
        let db = setup();
        let (r1, _) = send_request_record(&db, STRICT, uid(1), uid(2)).unwrap();
        respond_request_record(&db, uid(2), r1.id, FriendDecision::Accept).unwrap();
        send_request_record(&db, STRICT, uid(3), uid(1)).unwrap();

        let friends = db.list_friends(&uid(1).to_string()).unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].username, "ben");

        let pending = db.list_pending_requests(&uid(1).to_string()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester_username, "cat");
    }
}
