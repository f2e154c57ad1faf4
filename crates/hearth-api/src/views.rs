//! Small helpers for shaping DB rows into API responses.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use hearth_db::Database;
use hearth_db::models::ProfileRow;
use hearth_types::models::{ProfileView, UserSummary};

use crate::error::ApiError;

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            chrono::DateTime::default()
        })
}

pub(crate) fn profile_view(row: &ProfileRow) -> ProfileView {
    ProfileView {
        display_name: row.display_name.clone(),
        bio: row.bio.clone(),
        avatar_url: row.avatar_url.clone(),
        cover_url: row.cover_url.clone(),
        birthday: row.birthday.clone(),
    }
}

/// Batch-fetch profiles for a set of user IDs and key them for summary
/// assembly, one query for the whole page.
pub(crate) fn profile_map(
    db: &Database,
    user_ids: &[String],
) -> Result<HashMap<String, ProfileView>, ApiError> {
    let rows = db.get_profiles_for_users(user_ids)?;
    Ok(rows
        .into_iter()
        .map(|row| (row.user_id.clone(), profile_view(&row)))
        .collect())
}

pub(crate) fn user_summary(
    id: &str,
    username: &str,
    profiles: &HashMap<String, ProfileView>,
) -> UserSummary {
    UserSummary {
        id: parse_uuid(id, "user id"),
        username: username.to_string(),
        profile: profiles.get(id).cloned(),
    }
}
