//! Data-access collaborator for accounts, favorites, friendships, requests
//! and tags.
//!
//! The protocol engine only ever talks to the [`Store`] trait. Two backends
//! are provided: a SQLite store for real deployments and an in-memory store
//! used by tests and for throwaway instances.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

/// Store failures, collapsed into the three categories the dispatcher maps
/// to response codes: missing target, business conflict, backend failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("storage failure: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A persisted account row. The logged-in flag is runtime state and lives in
/// the account directory, never here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub username: String,
    pub password: String,
}

/// A favorite place owned by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Favorite {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub category: String,
    pub location: String,
    pub created_at: i64,
}

/// A favorite somebody tagged the listing user on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedFavorite {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub category: String,
    pub location: String,
    pub tagger: String,
    pub created_at: i64,
}

/// Lifecycle of a friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A friend request between two users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequest {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub status: RequestStatus,
    pub created_at: i64,
}

/// One side of an accepted friendship, as seen by the listing user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friendship {
    pub username: String,
    pub since: i64,
}

/// Storage operations consumed by the protocol engine.
///
/// Every mutating operation is atomic with respect to concurrent callers;
/// read-check-mutate races between connections resolve inside the store, not
/// in the dispatcher.
pub trait Store: Send + Sync {
    // Accounts
    fn load_accounts(&self) -> StoreResult<Vec<AccountRecord>>;
    /// Duplicate username is a `Conflict`.
    fn create_account(&self, username: &str, password: &str) -> StoreResult<()>;

    // Favorites
    fn create_favorite(
        &self,
        owner: &str,
        name: &str,
        category: &str,
        location: &str,
    ) -> StoreResult<i64>;
    /// `NotFound` unless the favorite exists and belongs to `owner`.
    fn update_favorite(
        &self,
        owner: &str,
        id: i64,
        name: &str,
        category: &str,
        location: &str,
    ) -> StoreResult<()>;
    /// `NotFound` unless the favorite exists and belongs to `owner`.
    fn delete_favorite(&self, owner: &str, id: i64) -> StoreResult<()>;
    fn get_favorite(&self, id: i64) -> StoreResult<Favorite>;
    /// Newest first.
    fn list_favorites(&self, owner: &str) -> StoreResult<Vec<Favorite>>;
    /// Favorites `username` has been tagged on, newest tag first.
    fn list_tagged_favorites(&self, username: &str) -> StoreResult<Vec<TaggedFavorite>>;

    // Friendships and requests
    /// A still-pending duplicate of the same request is a `Conflict`.
    fn create_friend_request(&self, from: &str, to: &str) -> StoreResult<i64>;
    fn get_friend_request(&self, id: i64) -> StoreResult<FriendRequest>;
    /// `NotFound` if the id does not exist or is not addressed to
    /// `requestee`; `Conflict` if already accepted or rejected.
    fn accept_friend_request(&self, id: i64, requestee: &str) -> StoreResult<()>;
    /// Same contract as [`Store::accept_friend_request`].
    fn reject_friend_request(&self, id: i64, requestee: &str) -> StoreResult<()>;
    /// `NotFound` when no friendship exists between the two users.
    fn remove_friendship(&self, user_a: &str, user_b: &str) -> StoreResult<()>;
    fn are_friends(&self, user_a: &str, user_b: &str) -> StoreResult<bool>;
    /// Pending request in either direction between the two users.
    fn has_pending_request(&self, user_a: &str, user_b: &str) -> StoreResult<bool>;
    /// Accepted friendships of `username`, newest first.
    fn list_friends(&self, username: &str) -> StoreResult<Vec<Friendship>>;
    /// Incoming pending requests for `username`, newest first.
    fn list_friend_requests(&self, username: &str) -> StoreResult<Vec<FriendRequest>>;

    // Tags
    /// Tagging the same (favorite, user) pair twice is a `Conflict`.
    fn tag_favorite(&self, favorite_id: i64, tagger: &str, tagged: &str) -> StoreResult<()>;
}

/// Canonical ordering for a friendship pair, so (a, b) and (b, a) are the
/// same row.
pub(crate) fn ordered_pair<'a>(user_a: &'a str, user_b: &'a str) -> (&'a str, &'a str) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_pair() {
        assert_eq!(ordered_pair("alice", "bob"), ("alice", "bob"));
        assert_eq!(ordered_pair("bob", "alice"), ("alice", "bob"));
        assert_eq!(ordered_pair("alice", "alice"), ("alice", "alice"));
    }
}
