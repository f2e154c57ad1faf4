//! Database row types. These map directly to SQLite rows, kept distinct
//! from the hearth-types API models so the DB layer stays independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

pub struct ProfileRow {
    pub user_id: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_url: Option<String>,
    pub birthday: Option<String>,
}

/// Post joined with its author's username (single query, no N+1).
pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub created_at: String,
}

pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub created_at: String,
}

pub struct FriendshipRow {
    pub id: String,
    pub user_id: String,
    pub friend_id: String,
    pub status: String,
    pub created_at: String,
}

/// An accepted friendship seen from one side: the other party plus when the
/// row was created.
pub struct FriendLinkRow {
    pub user_id: String,
    pub username: String,
    pub created_at: String,
}

pub struct PendingRequestRow {
    pub request_id: String,
    pub requester_id: String,
    pub requester_username: String,
    pub created_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub receiver_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub kind: String,
    pub body: String,
    pub metadata: String,
    pub read: bool,
    pub created_at: String,
}

// -- Admin reporting rows --

pub struct CommentDetailRow {
    pub id: String,
    pub post_id: String,
    pub post_excerpt: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub content: String,
    pub created_at: String,
}

pub struct LikeDetailRow {
    pub id: String,
    pub post_id: String,
    pub post_excerpt: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

pub struct UserDetailRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

pub struct TableCounts {
    pub users: u64,
    pub posts: u64,
    pub likes: u64,
    pub comments: u64,
}
