//! Read-only reporting for the admin dashboard. All routes sit behind
//! `middleware::require_admin`; nothing here mutates state.

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};

use hearth_types::api::{
    AdminActivityQuery, AdminCommentEntry, AdminInteractionQuery, AdminLikeEntry, AdminStats,
    AdminUserEntry, RoleCount,
};
use hearth_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;
use crate::views::{parse_timestamp, parse_uuid};

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = run_blocking(move || {
        let counts = state.db.table_counts()?;
        let users_by_role = state
            .db
            .users_by_role()?
            .into_iter()
            .map(|(role, count)| RoleCount { role, count })
            .collect();

        Ok(AdminStats {
            total_users: counts.users,
            total_posts: counts.posts,
            total_likes: counts.likes,
            total_comments: counts.comments,
            users_by_role,
        })
    })
    .await?;

    Ok(Json(stats))
}

pub async fn recent_comments(
    State(state): State<AppState>,
    Query(query): Query<AdminInteractionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(200);
    let post_id = query.post_id.map(|id| id.to_string());

    let comments = run_blocking(move || {
        let rows = state.db.recent_comments(post_id.as_deref(), limit)?;

        let comments: Vec<AdminCommentEntry> = rows
            .iter()
            .map(|row| AdminCommentEntry {
                id: parse_uuid(&row.id, "comment id"),
                post_id: parse_uuid(&row.post_id, "post id"),
                post_excerpt: row.post_excerpt.clone(),
                user_id: parse_uuid(&row.user_id, "user id"),
                username: row.username.clone(),
                email: row.email.clone(),
                role: row.role.parse().unwrap_or(Role::User),
                display_name: row.display_name.clone(),
                avatar_url: row.avatar_url.clone(),
                content: row.content.clone(),
                created_at: parse_timestamp(&row.created_at),
            })
            .collect();

        Ok(comments)
    })
    .await?;

    Ok(Json(comments))
}

pub async fn recent_likes(
    State(state): State<AppState>,
    Query(query): Query<AdminInteractionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(200);
    let post_id = query.post_id.map(|id| id.to_string());

    let likes = run_blocking(move || {
        let rows = state.db.recent_likes(post_id.as_deref(), limit)?;

        let likes: Vec<AdminLikeEntry> = rows
            .iter()
            .map(|row| AdminLikeEntry {
                id: parse_uuid(&row.id, "like id"),
                post_id: parse_uuid(&row.post_id, "post id"),
                post_excerpt: row.post_excerpt.clone(),
                user_id: parse_uuid(&row.user_id, "user id"),
                username: row.username.clone(),
                email: row.email.clone(),
                role: row.role.parse().unwrap_or(Role::User),
                display_name: row.display_name.clone(),
                avatar_url: row.avatar_url.clone(),
                created_at: parse_timestamp(&row.created_at),
            })
            .collect();

        Ok(likes)
    })
    .await?;

    Ok(Json(likes))
}

/// Most recently registered accounts. No separate login timestamps exist, so
/// registration recency stands in for login activity.
pub async fn login_activity(
    State(state): State<AppState>,
    Query(query): Query<AdminActivityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(200);

    let users = run_blocking(move || {
        let rows = state.db.recent_users(limit)?;

        let users: Vec<AdminUserEntry> = rows
            .iter()
            .map(|row| AdminUserEntry {
                id: parse_uuid(&row.id, "user id"),
                username: row.username.clone(),
                email: row.email.clone(),
                role: row.role.parse().unwrap_or(Role::User),
                display_name: row.display_name.clone(),
                avatar_url: row.avatar_url.clone(),
                created_at: parse_timestamp(&row.created_at),
            })
            .collect();

        Ok(users)
    })
    .await?;

    Ok(Json(users))
}
