//! In-memory store backend.
//!
//! Same contract as the SQLite backend, held in plain maps and vectors
//! behind a single mutex. State is lost on shutdown; used by tests and for
//! throwaway instances.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{
    ordered_pair, AccountRecord, Favorite, FriendRequest, Friendship, RequestStatus, Store,
    StoreError, StoreResult, TaggedFavorite,
};

#[derive(Debug, Clone)]
struct FriendshipRow {
    user_a: String,
    user_b: String,
    since: i64,
}

#[derive(Debug, Clone)]
struct TagRow {
    favorite_id: i64,
    tagger: String,
    tagged: String,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, String>,
    favorites: Vec<Favorite>,
    requests: Vec<FriendRequest>,
    friendships: Vec<FriendshipRow>,
    tags: Vec<TagRow>,
    next_favorite_id: i64,
    next_request_id: i64,
}

/// Volatile store; one mutex guards all tables so every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl Store for MemoryStore {
    fn load_accounts(&self) -> StoreResult<Vec<AccountRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .accounts
            .iter()
            .map(|(username, password)| AccountRecord {
                username: username.clone(),
                password: password.clone(),
            })
            .collect())
    }

    fn create_account(&self, username: &str, password: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.accounts.contains_key(username) {
            return Err(StoreError::Conflict);
        }
        inner
            .accounts
            .insert(username.to_string(), password.to_string());
        Ok(())
    }

    fn create_favorite(
        &self,
        owner: &str,
        name: &str,
        category: &str,
        location: &str,
    ) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        inner.next_favorite_id += 1;
        let id = inner.next_favorite_id;
        inner.favorites.push(Favorite {
            id,
            owner: owner.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            location: location.to_string(),
            created_at: now(),
        });
        Ok(id)
    }

    fn update_favorite(
        &self,
        owner: &str,
        id: i64,
        name: &str,
        category: &str,
        location: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let favorite = inner
            .favorites
            .iter_mut()
            .find(|f| f.id == id && f.owner == owner)
            .ok_or(StoreError::NotFound)?;
        favorite.name = name.to_string();
        favorite.category = category.to_string();
        favorite.location = location.to_string();
        Ok(())
    }

    fn delete_favorite(&self, owner: &str, id: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let before = inner.favorites.len();
        inner.favorites.retain(|f| !(f.id == id && f.owner == owner));
        if inner.favorites.len() == before {
            return Err(StoreError::NotFound);
        }
        inner.tags.retain(|t| t.favorite_id != id);
        Ok(())
    }

    fn get_favorite(&self, id: i64) -> StoreResult<Favorite> {
        let inner = self.inner.lock();
        inner
            .favorites
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn list_favorites(&self, owner: &str) -> StoreResult<Vec<Favorite>> {
        let inner = self.inner.lock();
        // Ids are monotonic, so reverse id order is newest first.
        let mut favorites: Vec<Favorite> = inner
            .favorites
            .iter()
            .filter(|f| f.owner == owner)
            .cloned()
            .collect();
        favorites.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(favorites)
    }

    fn list_tagged_favorites(&self, username: &str) -> StoreResult<Vec<TaggedFavorite>> {
        let inner = self.inner.lock();
        let mut tagged = Vec::new();
        for tag in inner.tags.iter().rev() {
            if tag.tagged != username {
                continue;
            }
            if let Some(favorite) = inner.favorites.iter().find(|f| f.id == tag.favorite_id) {
                tagged.push(TaggedFavorite {
                    id: favorite.id,
                    owner: favorite.owner.clone(),
                    name: favorite.name.clone(),
                    category: favorite.category.clone(),
                    location: favorite.location.clone(),
                    tagger: tag.tagger.clone(),
                    created_at: favorite.created_at,
                });
            }
        }
        Ok(tagged)
    }

    fn create_friend_request(&self, from: &str, to: &str) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        let duplicate = inner.requests.iter().any(|r| {
            r.status == RequestStatus::Pending && r.from == from && r.to == to
        });
        if duplicate {
            return Err(StoreError::Conflict);
        }
        inner.next_request_id += 1;
        let id = inner.next_request_id;
        inner.requests.push(FriendRequest {
            id,
            from: from.to_string(),
            to: to.to_string(),
            status: RequestStatus::Pending,
            created_at: now(),
        });
        Ok(id)
    }

    fn get_friend_request(&self, id: i64) -> StoreResult<FriendRequest> {
        let inner = self.inner.lock();
        inner
            .requests
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn accept_friend_request(&self, id: i64, requestee: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let request = inner
            .requests
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        if request.to != requestee {
            return Err(StoreError::NotFound);
        }
        if request.status != RequestStatus::Pending {
            return Err(StoreError::Conflict);
        }

        let (user_a, user_b) = ordered_pair(&request.from, &request.to);
        let (user_a, user_b) = (user_a.to_string(), user_b.to_string());
        let already = inner
            .friendships
            .iter()
            .any(|f| f.user_a == user_a && f.user_b == user_b);
        if !already {
            inner.friendships.push(FriendshipRow {
                user_a,
                user_b,
                since: now(),
            });
        }
        if let Some(r) = inner.requests.iter_mut().find(|r| r.id == id) {
            r.status = RequestStatus::Accepted;
        }
        Ok(())
    }

    fn reject_friend_request(&self, id: i64, requestee: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let request = inner
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound)?;
        if request.to != requestee {
            return Err(StoreError::NotFound);
        }
        if request.status != RequestStatus::Pending {
            return Err(StoreError::Conflict);
        }
        request.status = RequestStatus::Rejected;
        Ok(())
    }

    fn remove_friendship(&self, user_a: &str, user_b: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let (first, second) = ordered_pair(user_a, user_b);
        let (first, second) = (first.to_string(), second.to_string());
        let before = inner.friendships.len();
        inner
            .friendships
            .retain(|f| !(f.user_a == first && f.user_b == second));
        if inner.friendships.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn are_friends(&self, user_a: &str, user_b: &str) -> StoreResult<bool> {
        let inner = self.inner.lock();
        let (first, second) = ordered_pair(user_a, user_b);
        Ok(inner
            .friendships
            .iter()
            .any(|f| f.user_a == first && f.user_b == second))
    }

    fn has_pending_request(&self, user_a: &str, user_b: &str) -> StoreResult<bool> {
        let inner = self.inner.lock();
        Ok(inner.requests.iter().any(|r| {
            r.status == RequestStatus::Pending
                && ((r.from == user_a && r.to == user_b) || (r.from == user_b && r.to == user_a))
        }))
    }

    fn list_friends(&self, username: &str) -> StoreResult<Vec<Friendship>> {
        let inner = self.inner.lock();
        let mut friends = Vec::new();
        for row in inner.friendships.iter().rev() {
            let other = if row.user_a == username {
                &row.user_b
            } else if row.user_b == username {
                &row.user_a
            } else {
                continue;
            };
            friends.push(Friendship {
                username: other.clone(),
                since: row.since,
            });
        }
        Ok(friends)
    }

    fn list_friend_requests(&self, username: &str) -> StoreResult<Vec<FriendRequest>> {
        let inner = self.inner.lock();
        let mut requests: Vec<FriendRequest> = inner
            .requests
            .iter()
            .filter(|r| r.to == username && r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(requests)
    }

    fn tag_favorite(&self, favorite_id: i64, tagger: &str, tagged: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.favorites.iter().any(|f| f.id == favorite_id) {
            return Err(StoreError::NotFound);
        }
        let duplicate = inner
            .tags
            .iter()
            .any(|t| t.favorite_id == favorite_id && t.tagged == tagged);
        if duplicate {
            return Err(StoreError::Conflict);
        }
        inner.tags.push(TagRow {
            favorite_id,
            tagger: tagger.to_string(),
            tagged: tagged.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_uniqueness() {
        let store = MemoryStore::new();
        store.create_account("alice", "pw").unwrap();
        assert_eq!(
            store.create_account("alice", "pw2"),
            Err(StoreError::Conflict)
        );
        // First password wins.
        let accounts = store.load_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].password, "pw");
    }

    #[test]
    fn test_favorite_crud() {
        let store = MemoryStore::new();
        store.create_account("alice", "pw").unwrap();
        let id = store
            .create_favorite("alice", "Cafe", "Food", "Hanoi")
            .unwrap();

        store
            .update_favorite("alice", id, "Cafe X", "Food", "Hanoi")
            .unwrap();
        assert_eq!(store.get_favorite(id).unwrap().name, "Cafe X");

        // Wrong owner cannot touch it.
        assert_eq!(
            store.update_favorite("bob", id, "X", "Y", "Z"),
            Err(StoreError::NotFound)
        );
        assert_eq!(store.delete_favorite("bob", id), Err(StoreError::NotFound));

        store.delete_favorite("alice", id).unwrap();
        assert_eq!(store.get_favorite(id), Err(StoreError::NotFound));
    }

    #[test]
    fn test_list_favorites_newest_first() {
        let store = MemoryStore::new();
        let first = store.create_favorite("alice", "A", "c", "l").unwrap();
        let second = store.create_favorite("alice", "B", "c", "l").unwrap();
        store.create_favorite("bob", "C", "c", "l").unwrap();

        let favorites = store.list_favorites("alice").unwrap();
        assert_eq!(
            favorites.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![second, first]
        );
    }

    #[test]
    fn test_friend_request_lifecycle() {
        let store = MemoryStore::new();
        let id = store.create_friend_request("bob", "alice").unwrap();

        // Duplicate while pending.
        assert_eq!(
            store.create_friend_request("bob", "alice"),
            Err(StoreError::Conflict)
        );
        assert!(store.has_pending_request("alice", "bob").unwrap());

        // Wrong addressee cannot accept.
        assert_eq!(
            store.accept_friend_request(id, "bob"),
            Err(StoreError::NotFound)
        );

        store.accept_friend_request(id, "alice").unwrap();
        assert!(store.are_friends("alice", "bob").unwrap());
        assert!(!store.has_pending_request("alice", "bob").unwrap());

        // Second accept is a conflict.
        assert_eq!(
            store.accept_friend_request(id, "alice"),
            Err(StoreError::Conflict)
        );

        // Once accepted, the same request can be re-sent and rejected.
        let id2 = store.create_friend_request("bob", "alice").unwrap();
        store.reject_friend_request(id2, "alice").unwrap();
        assert_eq!(
            store.reject_friend_request(id2, "alice"),
            Err(StoreError::Conflict)
        );
    }

    #[test]
    fn test_remove_friendship() {
        let store = MemoryStore::new();
        let id = store.create_friend_request("bob", "alice").unwrap();
        store.accept_friend_request(id, "alice").unwrap();

        store.remove_friendship("alice", "bob").unwrap();
        assert!(!store.are_friends("alice", "bob").unwrap());
        assert_eq!(
            store.remove_friendship("alice", "bob"),
            Err(StoreError::NotFound)
        );
    }

    #[test]
    fn test_list_friend_requests_incoming_pending_only() {
        let store = MemoryStore::new();
        store.create_friend_request("bob", "alice").unwrap();
        let accepted = store.create_friend_request("carol", "alice").unwrap();
        store.accept_friend_request(accepted, "alice").unwrap();
        store.create_friend_request("alice", "dave").unwrap();

        let requests = store.list_friend_requests("alice").unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].from, "bob");
    }

    #[test]
    fn test_tagging() {
        let store = MemoryStore::new();
        let fav = store.create_favorite("alice", "Cafe", "Food", "Hanoi").unwrap();

        store.tag_favorite(fav, "alice", "carol").unwrap();
        assert_eq!(
            store.tag_favorite(fav, "alice", "carol"),
            Err(StoreError::Conflict)
        );
        assert_eq!(
            store.tag_favorite(999, "alice", "carol"),
            Err(StoreError::NotFound)
        );

        let tagged = store.list_tagged_favorites("carol").unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id, fav);
        assert_eq!(tagged[0].tagger, "alice");
        assert_eq!(tagged[0].owner, "alice");
    }

    #[test]
    fn test_delete_favorite_drops_tags() {
        let store = MemoryStore::new();
        let fav = store.create_favorite("alice", "Cafe", "Food", "Hanoi").unwrap();
        store.tag_favorite(fav, "alice", "carol").unwrap();
        store.delete_favorite("alice", fav).unwrap();
        assert!(store.list_tagged_favorites("carol").unwrap().is_empty());
    }
}
