use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use hearth_db::Database;
use hearth_db::models::PostRow;
use hearth_types::api::{
    Claims, CommentResponse, CreatePostRequest, FeedQuery, PostDetailResponse, PostResponse,
};
use hearth_types::models::ProfileView;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;
use crate::views::{parse_timestamp, parse_uuid, profile_map, profile_view, user_summary};

fn post_response(
    row: &PostRow,
    profiles: &HashMap<String, ProfileView>,
    like_count: u64,
    comment_count: u64,
    liked_by_me: bool,
) -> PostResponse {
    PostResponse {
        id: parse_uuid(&row.id, "post id"),
        author: user_summary(&row.author_id, &row.author_username, profiles),
        content: row.content.clone(),
        created_at: parse_timestamp(&row.created_at),
        like_count,
        comment_count,
        liked_by_me,
    }
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::InvalidArgument("post content is required".into()));
    }

    let post = run_blocking(move || {
        let post_id = Uuid::new_v4();
        state
            .db
            .insert_post(&post_id.to_string(), &claims.sub.to_string(), &content)?;

        let row = state
            .db
            .get_post(&post_id.to_string())?
            .ok_or_else(|| anyhow::anyhow!("post vanished after insert: {}", post_id))?;

        let profile = state
            .db
            .get_profile(&row.author_id)?
            .map(|p| profile_view(&p));
        let profiles: HashMap<String, ProfileView> = profile
            .map(|p| (row.author_id.clone(), p))
            .into_iter()
            .collect();

        Ok(post_response(&row, &profiles, 0, 0, false))
    })
    .await?;

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(200);
    let before = query.before;

    let posts = run_blocking(move || {
        let rows = state.db.get_posts(limit, before.as_deref())?;

        let post_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let author_ids: Vec<String> = rows.iter().map(|r| r.author_id.clone()).collect();

        let like_counts: HashMap<String, u64> =
            state.db.count_likes_for_posts(&post_ids)?.into_iter().collect();
        let comment_counts: HashMap<String, u64> = state
            .db
            .count_comments_for_posts(&post_ids)?
            .into_iter()
            .collect();
        let liked: HashSet<String> = state
            .db
            .liked_post_ids(&claims.sub.to_string(), &post_ids)?
            .into_iter()
            .collect();
        let profiles = profile_map(&state.db, &author_ids)?;

        let posts: Vec<PostResponse> = rows
            .iter()
            .map(|row| {
                post_response(
                    row,
                    &profiles,
                    like_counts.get(&row.id).copied().unwrap_or(0),
                    comment_counts.get(&row.id).copied().unwrap_or(0),
                    liked.contains(&row.id),
                )
            })
            .collect();

        Ok(posts)
    })
    .await?;

    Ok(Json(posts))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = run_blocking(move || {
        let row = state
            .db
            .get_post(&post_id.to_string())?
            .ok_or(ApiError::NotFound("post"))?;

        let comments = state.db.get_comments_for_post(&row.id)?;

        // One profile fetch covers the post author and every commenter
        let mut ids: Vec<String> = comments.iter().map(|c| c.author_id.clone()).collect();
        ids.push(row.author_id.clone());
        ids.sort();
        ids.dedup();
        let profiles = profile_map(&state.db, &ids)?;

        let post_ids = vec![row.id.clone()];
        let like_count = state.db.like_count(&row.id)?;
        let liked = !state
            .db
            .liked_post_ids(&claims.sub.to_string(), &post_ids)?
            .is_empty();

        let comment_responses: Vec<CommentResponse> = comments
            .iter()
            .map(|c| CommentResponse {
                id: parse_uuid(&c.id, "comment id"),
                post_id,
                author: user_summary(&c.author_id, &c.author_username, &profiles),
                content: c.content.clone(),
                created_at: parse_timestamp(&c.created_at),
            })
            .collect();

        let post = post_response(
            &row,
            &profiles,
            like_count,
            comment_responses.len() as u64,
            liked,
        );

        Ok(PostDetailResponse {
            post,
            comments: comment_responses,
        })
    })
    .await?;

    Ok(Json(detail))
}

pub(crate) fn delete_post_record(db: &Database, actor: Uuid, post_id: Uuid) -> Result<(), ApiError> {
    let row = db
        .get_post(&post_id.to_string())?
        .ok_or(ApiError::NotFound("post"))?;

    if row.author_id != actor.to_string() {
        return Err(ApiError::Forbidden(
            "only the author may delete a post".into(),
        ));
    }

    db.delete_post(&row.id)?;
    Ok(())
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(move || delete_post_record(&state.db, claims.sub, post_id)).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn only_the_author_may_delete_a_post() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&uid(1).to_string(), "ann", "ann@example.com", "hash", "user")
            .unwrap();
        db.create_user(&uid(2).to_string(), "ben", "ben@example.com", "hash", "user")
            .unwrap();
        db.insert_post(&uid(10).to_string(), &uid(1).to_string(), "hello")
            .unwrap();

        let err = delete_post_record(&db, uid(2), uid(10)).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(db.get_post(&uid(10).to_string()).unwrap().is_some());

        delete_post_record(&db, uid(1), uid(10)).unwrap();
        assert!(db.get_post(&uid(10).to_string()).unwrap().is_none());

        let err = delete_post_record(&db, uid(1), uid(10)).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
