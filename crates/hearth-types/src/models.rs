use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role, stored as text on the users table and carried in JWT claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

/// Lifecycle of a friend request. Pending rows may move to exactly one of
/// the terminal states; terminal rows never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Declined,
}

impl FriendshipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
            FriendshipStatus::Declined => "declined",
        }
    }
}

impl std::str::FromStr for FriendshipStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FriendshipStatus::Pending),
            "accepted" => Ok(FriendshipStatus::Accepted),
            "declined" => Ok(FriendshipStatus::Declined),
            _ => Err(()),
        }
    }
}

/// What kind of interaction produced a notification. Stored as text so new
/// kinds can be added without a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Comment,
    Like,
    FriendRequest,
    FriendAccept,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Comment => "comment",
            NotificationKind::Like => "like",
            NotificationKind::FriendRequest => "friend_request",
            NotificationKind::FriendAccept => "friend_accept",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comment" => Ok(NotificationKind::Comment),
            "like" => Ok(NotificationKind::Like),
            "friend_request" => Ok(NotificationKind::FriendRequest),
            "friend_accept" => Ok(NotificationKind::FriendAccept),
            _ => Err(()),
        }
    }
}

/// Public identity summary attached to posts, comments, notifications and
/// friend lists so clients never need a second lookup for the actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub profile: Option<ProfileView>,
}

/// Extended per-user attributes. At most one per identity, created lazily on
/// first profile update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileView {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_url: Option<String>,
    pub birthday: Option<String>,
}
