use crate::Database;
use crate::models::{
    CommentDetailRow, CommentRow, FriendLinkRow, FriendshipRow, LikeDetailRow, NotificationRow,
    PendingRequestRow, PostRow, ProfileRow, TableCounts, UserDetailRow, UserRow,
};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension};

/// Result of the atomic friend-request insert. The unique pair index decides
/// the winner; callers never pre-check for an existing row.
pub enum FriendRequestOutcome {
    Created(FriendshipRow),
    DuplicatePair(FriendshipRow),
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, role) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, email, password_hash, role),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                (id, password_hash),
            )?;
            Ok(())
        })
    }

    /// Username/display-name search, excluding the searcher. An empty query
    /// returns the most recent accounts.
    pub fn search_users(&self, current_id: &str, q: &str, limit: u32) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let pattern = format!("%{}%", q);
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username
                 FROM users u
                 LEFT JOIN profiles p ON p.user_id = u.id
                 WHERE u.id != ?1
                   AND (?2 = '' OR u.username LIKE ?3 OR p.display_name LIKE ?3)
                 ORDER BY u.created_at DESC
                 LIMIT ?4",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![current_id, q, pattern, limit], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Profiles --

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, display_name, bio, avatar_url, cover_url, birthday
                 FROM profiles WHERE user_id = ?1",
            )?;

            let row = stmt
                .query_row([user_id], map_profile_row)
                .optional()?;

            Ok(row)
        })
    }

    /// Batch-fetch profiles for a set of user IDs.
    pub fn get_profiles_for_users(&self, user_ids: &[String]) -> Result<Vec<ProfileRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=user_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT user_id, display_name, bio, avatar_url, cover_url, birthday
                 FROM profiles WHERE user_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = user_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), map_profile_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Lazy create-or-update of the 1:1 profile row. Absent fields keep their
    /// stored value; birthday is always overwritten (callers normalize blank
    /// or invalid dates to None first).
    pub fn upsert_profile(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        bio: Option<&str>,
        avatar_url: Option<&str>,
        cover_url: Option<&str>,
        birthday: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, display_name, bio, avatar_url, cover_url, birthday)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = COALESCE(excluded.display_name, display_name),
                     bio          = COALESCE(excluded.bio, bio),
                     avatar_url   = COALESCE(excluded.avatar_url, avatar_url),
                     cover_url    = COALESCE(excluded.cover_url, cover_url),
                     birthday     = excluded.birthday,
                     updated_at   = datetime('now')",
                rusqlite::params![user_id, display_name, bio, avatar_url, cover_url, birthday],
            )?;
            Ok(())
        })
    }

    // -- Posts --

    pub fn insert_post(&self, id: &str, author_id: &str, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, content) VALUES (?1, ?2, ?3)",
                (id, author_id, content),
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.author_id, u.username, p.content, p.created_at
                 FROM posts p
                 LEFT JOIN users u ON p.author_id = u.id
                 WHERE p.id = ?1",
            )?;

            let row = stmt.query_row([id], map_post_row).optional()?;

            Ok(row)
        })
    }

    pub fn get_posts(&self, limit: u32, before: Option<&str>) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            // JOIN users to fetch author_username in a single query
            let mut stmt = conn.prepare(
                "SELECT p.id, p.author_id, u.username, p.content, p.created_at
                 FROM posts p
                 LEFT JOIN users u ON p.author_id = u.id
                 WHERE (?2 IS NULL OR p.created_at < ?2)
                 ORDER BY p.created_at DESC
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![limit, before], map_post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Deleting a post cascades to its comments and likes via the schema.
    pub fn delete_post(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Batch like counts for a set of post IDs. Posts with no likes are absent.
    pub fn count_likes_for_posts(&self, post_ids: &[String]) -> Result<Vec<(String, u64)>> {
        self.count_for_posts("likes", post_ids)
    }

    /// Batch comment counts for a set of post IDs.
    pub fn count_comments_for_posts(&self, post_ids: &[String]) -> Result<Vec<(String, u64)>> {
        self.count_for_posts("comments", post_ids)
    }

    fn count_for_posts(&self, table: &str, post_ids: &[String]) -> Result<Vec<(String, u64)>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=post_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT post_id, COUNT(*) FROM {} WHERE post_id IN ({}) GROUP BY post_id",
                table,
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = post_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Which of the given posts the user has liked.
    pub fn liked_post_ids(&self, user_id: &str, post_ids: &[String]) -> Result<Vec<String>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (2..=post_ids.len() + 1)
                .map(|i| format!("?{}", i))
                .collect();
            let sql = format!(
                "SELECT post_id FROM likes WHERE user_id = ?1 AND post_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            params.extend(post_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let rows = stmt
                .query_map(params.as_slice(), |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Comments --

    pub fn insert_comment(
        &self,
        id: &str,
        post_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, content) VALUES (?1, ?2, ?3, ?4)",
                (id, post_id, author_id, content),
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.post_id, c.author_id, u.username, c.content, c.created_at
                 FROM comments c
                 LEFT JOIN users u ON c.author_id = u.id
                 WHERE c.id = ?1",
            )?;

            let row = stmt.query_row([id], map_comment_row).optional()?;

            Ok(row)
        })
    }

    pub fn get_comments_for_post(&self, post_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.post_id, c.author_id, u.username, c.content, c.created_at
                 FROM comments c
                 LEFT JOIN users u ON c.author_id = u.id
                 WHERE c.post_id = ?1
                 ORDER BY c.created_at ASC",
            )?;

            let rows = stmt
                .query_map([post_id], map_comment_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn delete_comment(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Likes --

    /// Toggle a like: removes if exists, inserts if not.
    /// Returns true when the like was added, false when removed.
    pub fn toggle_like(&self, id: &str, post_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM likes WHERE post_id = ?1 AND user_id = ?2",
                    rusqlite::params![post_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM likes WHERE id = ?1", [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO likes (id, post_id, user_id) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, post_id, user_id],
                )?;
                Ok(true)
            }
        })
    }

    pub fn like_count(&self, post_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Friendships --

    /// Atomic insert-if-absent for a friend request. The canonical pair index
    /// turns a duplicate (in either direction, any status) into a constraint
    /// violation, which comes back as `DuplicatePair` with the existing row.
    pub fn insert_friend_request(
        &self,
        id: &str,
        requester_id: &str,
        target_id: &str,
    ) -> Result<FriendRequestOutcome> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO friendships (id, user_id, friend_id, status) VALUES (?1, ?2, ?3, 'pending')",
                (id, requester_id, target_id),
            );

            match inserted {
                Ok(_) => {
                    let row = query_friendship(conn, id)?
                        .ok_or_else(|| anyhow!("friendship vanished after insert: {}", id))?;
                    Ok(FriendRequestOutcome::Created(row))
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    let row = query_pair(conn, requester_id, target_id)?
                        .ok_or_else(|| anyhow!("pair conflict without a stored row"))?;
                    Ok(FriendRequestOutcome::DuplicatePair(row))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_friendship(&self, id: &str) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| query_friendship(conn, id))
    }

    pub fn find_pair(&self, a: &str, b: &str) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| query_pair(conn, a, b))
    }

    /// Guarded pending → terminal transition. Returns false when the row was
    /// no longer pending, so concurrent responses cannot both win.
    pub fn transition_friendship(&self, id: &str, to_status: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE friendships SET status = ?2 WHERE id = ?1 AND status = 'pending'",
                (id, to_status),
            )?;
            Ok(n == 1)
        })
    }

    /// Re-open a declined pair as a fresh pending request with the new
    /// requester/addressee orientation. Guarded on the declined status.
    pub fn reopen_declined_pair(
        &self,
        id: &str,
        requester_id: &str,
        target_id: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE friendships
                 SET user_id = ?2, friend_id = ?3, status = 'pending', created_at = datetime('now')
                 WHERE id = ?1 AND status = 'declined'",
                (id, requester_id, target_id),
            )?;
            Ok(n == 1)
        })
    }

    /// Accepted friendships for a user, normalized to the other party.
    pub fn list_friends(&self, user_id: &str) -> Result<Vec<FriendLinkRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN f.user_id = ?1 THEN f.friend_id ELSE f.user_id END AS other_id,
                        u.username,
                        f.created_at
                 FROM friendships f
                 JOIN users u ON u.id = CASE WHEN f.user_id = ?1 THEN f.friend_id ELSE f.user_id END
                 WHERE f.status = 'accepted' AND (f.user_id = ?1 OR f.friend_id = ?1)
                 ORDER BY f.created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(FriendLinkRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Incoming pending requests only (rows addressed to this user).
    pub fn list_pending_requests(&self, user_id: &str) -> Result<Vec<PendingRequestRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.id, f.user_id, u.username, f.created_at
                 FROM friendships f
                 JOIN users u ON u.id = f.user_id
                 WHERE f.friend_id = ?1 AND f.status = 'pending'
                 ORDER BY f.created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PendingRequestRow {
                        request_id: row.get(0)?,
                        requester_id: row.get(1)?,
                        requester_username: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Friendship status between one user and each of a set of others,
    /// whichever direction the row points. Pairs with no row are absent.
    pub fn friendship_statuses_with(
        &self,
        user_id: &str,
        other_ids: &[String],
    ) -> Result<Vec<(String, String)>> {
        if other_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (2..=other_ids.len() + 1)
                .map(|i| format!("?{}", i))
                .collect();
            let in_list = placeholders.join(", ");
            let sql = format!(
                "SELECT CASE WHEN user_id = ?1 THEN friend_id ELSE user_id END AS other_id, status
                 FROM friendships
                 WHERE (user_id = ?1 AND friend_id IN ({in_list}))
                    OR (friend_id = ?1 AND user_id IN ({in_list}))",
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            params.extend(other_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let rows = stmt
                .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        id: &str,
        receiver_id: &str,
        sender_id: &str,
        kind: &str,
        body: &str,
        metadata: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, receiver_id, sender_id, kind, body, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, receiver_id, sender_id, kind, body, metadata),
            )?;
            Ok(())
        })
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.receiver_id, n.sender_id, u.username, n.kind, n.body,
                        n.metadata, n.read, n.created_at
                 FROM notifications n
                 LEFT JOIN users u ON n.sender_id = u.id
                 WHERE n.id = ?1",
            )?;

            let row = stmt.query_row([id], map_notification_row).optional()?;

            Ok(row)
        })
    }

    pub fn get_notifications(&self, receiver_id: &str, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.receiver_id, n.sender_id, u.username, n.kind, n.body,
                        n.metadata, n.read, n.created_at
                 FROM notifications n
                 LEFT JOIN users u ON n.sender_id = u.id
                 WHERE n.receiver_id = ?1
                 ORDER BY n.created_at DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![receiver_id, limit], map_notification_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn unread_notification_count(&self, receiver_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE receiver_id = ?1 AND read = 0",
                [receiver_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn mark_notification_read(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE notifications SET read = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn mark_all_notifications_read(&self, receiver_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE notifications SET read = 1 WHERE receiver_id = ?1 AND read = 0",
                [receiver_id],
            )?;
            Ok(())
        })
    }

    // -- Admin reporting --

    pub fn table_counts(&self) -> Result<TableCounts> {
        self.with_conn(|conn| {
            let users = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            let posts = conn.query_row("SELECT COUNT(*) FROM posts", [], |r| r.get(0))?;
            let likes = conn.query_row("SELECT COUNT(*) FROM likes", [], |r| r.get(0))?;
            let comments = conn.query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))?;
            Ok(TableCounts {
                users,
                posts,
                likes,
                comments,
            })
        })
    }

    pub fn users_by_role(&self) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT role, COUNT(*) FROM users GROUP BY role ORDER BY role")?;

            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn recent_comments(
        &self,
        post_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<CommentDetailRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.post_id, substr(po.content, 1, 120), c.author_id,
                        u.username, u.email, u.role, p.display_name, p.avatar_url,
                        c.content, c.created_at
                 FROM comments c
                 JOIN users u ON u.id = c.author_id
                 JOIN posts po ON po.id = c.post_id
                 LEFT JOIN profiles p ON p.user_id = u.id
                 WHERE (?1 IS NULL OR c.post_id = ?1)
                 ORDER BY c.created_at DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![post_id, limit], |row| {
                    Ok(CommentDetailRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        post_excerpt: row.get(2)?,
                        user_id: row.get(3)?,
                        username: row.get(4)?,
                        email: row.get(5)?,
                        role: row.get(6)?,
                        display_name: row.get(7)?,
                        avatar_url: row.get(8)?,
                        content: row.get(9)?,
                        created_at: row.get(10)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn recent_likes(&self, post_id: Option<&str>, limit: u32) -> Result<Vec<LikeDetailRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id, l.post_id, substr(po.content, 1, 120), l.user_id,
                        u.username, u.email, u.role, p.display_name, p.avatar_url,
                        l.created_at
                 FROM likes l
                 JOIN users u ON u.id = l.user_id
                 JOIN posts po ON po.id = l.post_id
                 LEFT JOIN profiles p ON p.user_id = u.id
                 WHERE (?1 IS NULL OR l.post_id = ?1)
                 ORDER BY l.created_at DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![post_id, limit], |row| {
                    Ok(LikeDetailRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        post_excerpt: row.get(2)?,
                        user_id: row.get(3)?,
                        username: row.get(4)?,
                        email: row.get(5)?,
                        role: row.get(6)?,
                        display_name: row.get(7)?,
                        avatar_url: row.get(8)?,
                        created_at: row.get(9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Most recently registered accounts with profile summary. The schema
    /// tracks no separate login timestamps, so registration order stands in.
    pub fn recent_users(&self, limit: u32) -> Result<Vec<UserDetailRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.email, u.role, p.display_name, p.avatar_url,
                        u.created_at
                 FROM users u
                 LEFT JOIN profiles p ON p.user_id = u.id
                 ORDER BY u.created_at DESC
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map([limit], |row| {
                    Ok(UserDetailRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        role: row.get(3)?,
                        display_name: row.get(4)?,
                        avatar_url: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // column is a compile-time constant name, never user input
    let sql = format!(
        "SELECT id, username, email, password, role, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                role: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_friendship(conn: &Connection, id: &str) -> Result<Option<FriendshipRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, friend_id, status, created_at FROM friendships WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], map_friendship_row).optional()?;

    Ok(row)
}

fn query_pair(conn: &Connection, a: &str, b: &str) -> Result<Option<FriendshipRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, friend_id, status, created_at
         FROM friendships
         WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
    )?;

    let row = stmt
        .query_row([a, b], map_friendship_row)
        .optional()?;

    Ok(row)
}

fn map_friendship_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendshipRow> {
    Ok(FriendshipRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        friend_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        user_id: row.get(0)?,
        display_name: row.get(1)?,
        bio: row.get(2)?,
        avatar_url: row.get(3)?,
        cover_url: row.get(4)?,
        birthday: row.get(5)?,
    })
}

fn map_post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_username: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_comment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_username: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        receiver_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        kind: row.get(4)?,
        body: row.get(5)?,
        metadata: row.get(6)?,
        read: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users(names: &[(&str, &str)]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in names {
            db.create_user(id, name, &format!("{}@example.com", name), "hash", "user")
                .unwrap();
        }
        db
    }

    #[test]
    fn friend_request_pair_is_unique_in_both_directions() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben")]);

        let first = db.insert_friend_request("f1", "u1", "u2").unwrap();
        assert!(matches!(first, FriendRequestOutcome::Created(_)));

        // Same direction
        let again = db.insert_friend_request("f2", "u1", "u2").unwrap();
        match again {
            FriendRequestOutcome::DuplicatePair(row) => assert_eq!(row.id, "f1"),
            FriendRequestOutcome::Created(_) => panic!("duplicate pair was inserted"),
        }

        // Reversed direction
        let reversed = db.insert_friend_request("f3", "u2", "u1").unwrap();
        assert!(matches!(reversed, FriendRequestOutcome::DuplicatePair(_)));
    }

    #[test]
    fn declined_pair_still_blocks_new_requests() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben")]);

        db.insert_friend_request("f1", "u1", "u2").unwrap();
        assert!(db.transition_friendship("f1", "declined").unwrap());

        let retry = db.insert_friend_request("f2", "u1", "u2").unwrap();
        assert!(matches!(retry, FriendRequestOutcome::DuplicatePair(_)));
    }

    #[test]
    fn transition_is_guarded_on_pending() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben")]);

        db.insert_friend_request("f1", "u1", "u2").unwrap();
        assert!(db.transition_friendship("f1", "accepted").unwrap());

        // Terminal rows never change again
        assert!(!db.transition_friendship("f1", "declined").unwrap());
        let row = db.get_friendship("f1").unwrap().unwrap();
        assert_eq!(row.status, "accepted");
    }

    #[test]
    fn reopen_declined_pair_flips_orientation() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben")]);

        db.insert_friend_request("f1", "u1", "u2").unwrap();
        db.transition_friendship("f1", "declined").unwrap();

        assert!(db.reopen_declined_pair("f1", "u2", "u1").unwrap());
        let row = db.get_friendship("f1").unwrap().unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.user_id, "u2");
        assert_eq!(row.friend_id, "u1");

        // Only declined rows reopen
        assert!(!db.reopen_declined_pair("f1", "u1", "u2").unwrap());
    }

    #[test]
    fn list_friends_normalizes_to_other_party() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben"), ("u3", "cat")]);

        db.insert_friend_request("f1", "u1", "u2").unwrap();
        db.transition_friendship("f1", "accepted").unwrap();
        db.insert_friend_request("f2", "u3", "u1").unwrap();
        db.transition_friendship("f2", "accepted").unwrap();

        let friends = db.list_friends("u1").unwrap();
        let mut names: Vec<_> = friends.iter().map(|f| f.username.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["ben", "cat"]);

        // Pending rows are not friends
        db.insert_friend_request("f3", "u2", "u3").unwrap();
        assert_eq!(db.list_friends("u3").unwrap().len(), 1);
    }

    #[test]
    fn pending_lists_incoming_only() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben"), ("u3", "cat")]);

        db.insert_friend_request("f1", "u1", "u2").unwrap();
        db.insert_friend_request("f2", "u2", "u3").unwrap();

        let pending = db.list_pending_requests("u2").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester_username, "ann");

        assert!(db.list_pending_requests("u1").unwrap().is_empty());
    }

    #[test]
    fn toggle_like_round_trip() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben")]);
        db.insert_post("p1", "u1", "hello").unwrap();

        assert!(db.toggle_like("l1", "p1", "u2").unwrap());
        assert_eq!(db.like_count("p1").unwrap(), 1);

        assert!(!db.toggle_like("l2", "p1", "u2").unwrap());
        assert_eq!(db.like_count("p1").unwrap(), 0);
    }

    #[test]
    fn deleting_post_cascades_comments_and_likes() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben")]);
        db.insert_post("p1", "u1", "hello").unwrap();
        db.insert_comment("c1", "p1", "u2", "nice").unwrap();
        db.toggle_like("l1", "p1", "u2").unwrap();

        db.delete_post("p1").unwrap();

        assert!(db.get_comment("c1").unwrap().is_none());
        assert_eq!(db.like_count("p1").unwrap(), 0);
    }

    #[test]
    fn notification_read_state() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben")]);

        db.insert_notification("n1", "u1", "u2", "comment", "commented on your post", "{}")
            .unwrap();
        db.insert_notification("n2", "u1", "u2", "like", "liked your post", "{}")
            .unwrap();

        assert_eq!(db.unread_notification_count("u1").unwrap(), 2);

        db.mark_notification_read("n1").unwrap();
        assert_eq!(db.unread_notification_count("u1").unwrap(), 1);
        assert!(db.get_notification("n1").unwrap().unwrap().read);

        db.mark_all_notifications_read("u1").unwrap();
        assert_eq!(db.unread_notification_count("u1").unwrap(), 0);
    }

    #[test]
    fn profile_upsert_keeps_absent_fields() {
        let db = db_with_users(&[("u1", "ann")]);

        db.upsert_profile("u1", Some("Ann"), Some("hi"), None, None, Some("1990-01-01"))
            .unwrap();
        db.upsert_profile("u1", None, None, Some("http://a/pic.png"), None, None)
            .unwrap();

        let p = db.get_profile("u1").unwrap().unwrap();
        assert_eq!(p.display_name.as_deref(), Some("Ann"));
        assert_eq!(p.bio.as_deref(), Some("hi"));
        assert_eq!(p.avatar_url.as_deref(), Some("http://a/pic.png"));
        // Birthday is always overwritten
        assert!(p.birthday.is_none());
    }

    #[test]
    fn search_excludes_self_and_matches_display_name() {
        let db = db_with_users(&[("u1", "ann"), ("u2", "ben"), ("u3", "cat")]);
        db.upsert_profile("u3", Some("Benjamin"), None, None, None, None)
            .unwrap();

        let hits = db.search_users("u1", "ben", 20).unwrap();
        let mut names: Vec<_> = hits.iter().map(|(_, n)| n.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["ben", "cat"]);

        let all = db.search_users("u2", "", 20).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|(id, _)| id != "u2"));
    }
}
