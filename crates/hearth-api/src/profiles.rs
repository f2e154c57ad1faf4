use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use uuid::Uuid;

use hearth_types::api::{Claims, SearchQuery, SearchResult, UpdateProfileRequest};
use hearth_types::models::{FriendshipStatus, UserSummary};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;
use crate::views::{profile_map, profile_view, user_summary};

const SEARCH_LIMIT: u32 = 20;

/// Blank or unparseable birthdays become null rather than an error, matching
/// how the profile form has always behaved.
fn normalize_birthday(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.to_string())
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = run_blocking(move || {
        let user = state
            .db
            .get_user_by_id(&user_id.to_string())?
            .ok_or(ApiError::NotFound("user"))?;

        let profile = state
            .db
            .get_profile(&user.id)?
            .map(|row| profile_view(&row));

        Ok(UserSummary {
            id: user_id,
            username: user.username,
            profile,
        })
    })
    .await?;

    Ok(Json(summary))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_blocking(move || {
        let birthday = normalize_birthday(req.birthday.as_deref());

        state.db.upsert_profile(
            &claims.sub.to_string(),
            req.display_name.as_deref(),
            req.bio.as_deref(),
            req.avatar_url.as_deref(),
            req.cover_url.as_deref(),
            birthday.as_deref(),
        )?;

        let row = state
            .db
            .get_profile(&claims.sub.to_string())?
            .ok_or_else(|| anyhow::anyhow!("profile vanished after upsert"))?;

        Ok(profile_view(&row))
    })
    .await?;

    Ok(Json(profile))
}

/// Search other users by username or display name, each hit annotated with
/// the friendship status between the searcher and the hit.
pub async fn search_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let results = run_blocking(move || {
        let q = query.q.as_deref().unwrap_or("").trim().to_string();
        let hits = state
            .db
            .search_users(&claims.sub.to_string(), &q, SEARCH_LIMIT)?;

        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let profiles = profile_map(&state.db, &ids)?;

        let statuses: HashMap<String, FriendshipStatus> = state
            .db
            .friendship_statuses_with(&claims.sub.to_string(), &ids)?
            .into_iter()
            .filter_map(|(id, status)| Some((id, status.parse().ok()?)))
            .collect();

        let results: Vec<SearchResult> = hits
            .iter()
            .map(|(id, username)| {
                let summary = user_summary(id, username, &profiles);
                SearchResult {
                    id: summary.id,
                    username: summary.username,
                    profile: summary.profile,
                    friendship: statuses.get(id).copied(),
                }
            })
            .collect();

        Ok(results)
    })
    .await?;

    Ok(Json(results))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birthday_normalization() {
        assert_eq!(normalize_birthday(None), None);
        assert_eq!(normalize_birthday(Some("")), None);
        assert_eq!(normalize_birthday(Some("   ")), None);
        assert_eq!(normalize_birthday(Some("not-a-date")), None);
        assert_eq!(normalize_birthday(Some("1990-13-40")), None);
        assert_eq!(
            normalize_birthday(Some("1990-01-31")),
            Some("1990-01-31".to_string())
        );
    }
}
