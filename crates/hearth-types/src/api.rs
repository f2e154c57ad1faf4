use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FriendshipStatus, NotificationKind, ProfileView, Role, UserSummary};

// -- JWT Claims --

/// JWT claims shared across hearth-api (REST middleware) and hearth-gateway
/// (WebSocket identify handshake). Canonical definition lives here in
/// hearth-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// The authenticated user's own view: includes email and role, which public
/// summaries never carry.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub profile: Option<ProfileView>,
}

// -- Profiles --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_url: Option<String>,
    pub birthday: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// A search hit, annotated with the friendship status between the searcher
/// and the hit (or null when no relationship row exists).
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub id: Uuid,
    pub username: String,
    pub profile: Option<ProfileView>,
    pub friendship: Option<FriendshipStatus>,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_feed_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass the `created_at` timestamp of the oldest
    /// post from the previous page to fetch older posts.
    pub before: Option<String>,
}

fn default_feed_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author: UserSummary,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub like_count: u64,
    pub comment_count: u64,
    pub liked_by_me: bool,
}

#[derive(Debug, Serialize)]
pub struct PostDetailResponse {
    pub post: PostResponse,
    pub comments: Vec<CommentResponse>,
}

// -- Comments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author: UserSummary,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Likes --

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: u64,
}

// -- Friendships --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendFriendRequest {
    pub target_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendDecision {
    Accept,
    Decline,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RespondFriendRequest {
    pub request_id: Uuid,
    pub decision: FriendDecision,
}

#[derive(Debug, Serialize)]
pub struct FriendshipResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub friend_id: Uuid,
    pub status: FriendshipStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// An accepted friendship, normalized to the other party's summary.
#[derive(Debug, Serialize)]
pub struct FriendEntry {
    pub user: UserSummary,
    pub since: chrono::DateTime<chrono::Utc>,
}

/// An incoming pending request with the requester's summary.
#[derive(Debug, Serialize)]
pub struct PendingRequestEntry {
    pub request_id: Uuid,
    pub from: UserSummary,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_notification_limit")]
    pub limit: u32,
}

fn default_notification_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub body: String,
    pub sender: UserSummary,
    pub metadata: serde_json::Value,
    pub read: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: u64,
}

// -- Admin --

#[derive(Debug, Serialize)]
pub struct RoleCount {
    pub role: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct AdminStats {
    pub total_users: u64,
    pub total_posts: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub users_by_role: Vec<RoleCount>,
}

#[derive(Debug, Deserialize)]
pub struct AdminInteractionQuery {
    pub post_id: Option<Uuid>,
    #[serde(default = "default_admin_limit")]
    pub limit: u32,
}

fn default_admin_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct AdminActivityQuery {
    #[serde(default = "default_activity_limit")]
    pub limit: u32,
}

fn default_activity_limit() -> u32 {
    20
}

#[derive(Debug, Serialize)]
pub struct AdminCommentEntry {
    pub id: Uuid,
    pub post_id: Uuid,
    pub post_excerpt: String,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct AdminLikeEntry {
    pub id: Uuid,
    pub post_id: Uuid,
    pub post_excerpt: String,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct AdminUserEntry {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
