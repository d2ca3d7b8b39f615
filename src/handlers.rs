//! Command dispatcher: routes parsed commands to their handlers.
//!
//! Each handler checks the session-state precondition, enforces the business
//! rules, performs at most one mutating store operation, and renders exactly
//! one terminated reply. Store failures become 500 responses; nothing in
//! here ever tears down the connection.

use std::sync::Arc;
use tracing::error;

use crate::accounts::{AccountDirectory, LoginOutcome};
use crate::protocol::{self, Command, ParseError, Reply};
use crate::session::Session;
use crate::store::{RequestStatus, Store, StoreError};

/// Routes protocol lines to handlers against the shared store and account
/// directory.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    accounts: Arc<AccountDirectory>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, accounts: Arc<AccountDirectory>) -> Self {
        Dispatcher { store, accounts }
    }

    /// Execute one raw line. `None` means a blank line: nothing to answer.
    pub fn dispatch(&self, session: &mut Session, line: &[u8]) -> Option<Reply> {
        let command = match protocol::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(ParseError::Malformed(verb)) => {
                return Some(Reply::status(400, format!("Invalid {} format", verb)))
            }
            Err(ParseError::UnknownCommand(_)) => {
                return Some(Reply::status(400, "Unknown command"))
            }
            Err(ParseError::Unsupported(_)) => {
                return Some(Reply::status(501, "Not implemented"))
            }
        };

        Some(match command {
            Command::Register { username, password } => {
                self.register(session, &username, &password)
            }
            Command::Login { username, password } => self.login(session, &username, &password),
            Command::Logout => self.logout(session),
            Command::AddFavorite {
                name,
                category,
                location,
            } => self.add_favorite(session, &name, &category, &location),
            Command::EditFavorite {
                id,
                name,
                category,
                location,
            } => self.edit_favorite(session, id, &name, &category, &location),
            Command::DelFavorite { id } => self.del_favorite(session, id),
            Command::ListFavorites => self.list_favorites(session),
            Command::ListTaggedFavorites => self.list_tagged_favorites(session),
            Command::AddFriend { username } => self.add_friend(session, &username),
            Command::AcceptFriend { request_id } => self.accept_friend(session, request_id),
            Command::RejectFriend { request_id } => self.reject_friend(session, request_id),
            Command::RemoveFriend { username } => self.remove_friend(session, &username),
            Command::ListFriends => self.list_friends(session),
            Command::ListRequests => self.list_requests(session),
            Command::TagFriend {
                favorite_id,
                username,
            } => self.tag_friend(session, favorite_id, &username),
        })
    }

    /// Authenticated-only precondition.
    fn acting_user(&self, session: &Session) -> Result<String, Reply> {
        session
            .username()
            .map(str::to_string)
            .ok_or_else(|| Reply::status(405, "Not logged in"))
    }

    fn store_failure(&self, op: &'static str, e: &StoreError) -> Reply {
        error!(op, error = %e, "Store operation failed");
        Reply::internal_error()
    }

    fn register(&self, session: &Session, username: &str, password: &str) -> Reply {
        if session.is_authenticated() {
            return Reply::status(406, "Already logged in");
        }
        match self.accounts.try_create(username, password) {
            Ok(()) => Reply::status(200, "Register successful"),
            Err(StoreError::Conflict) => Reply::status(404, "Username already exists"),
            Err(e) => self.store_failure("register", &e),
        }
    }

    fn login(&self, session: &mut Session, username: &str, password: &str) -> Reply {
        if session.is_authenticated() {
            return Reply::status(406, "Already logged in");
        }
        match self.accounts.login(username, password) {
            LoginOutcome::Ok => {
                session.authenticate(username.to_string());
                Reply::status(200, "Login successful")
            }
            LoginOutcome::BadCredentials => {
                Reply::status(401, "Invalid username or password")
            }
            LoginOutcome::AlreadyLoggedIn => {
                Reply::status(402, "Account already logged in")
            }
        }
    }

    fn logout(&self, session: &mut Session) -> Reply {
        match session.clear() {
            Some(username) => {
                self.accounts.logout(&username);
                Reply::status(200, "Logout successful")
            }
            None => Reply::status(405, "Not logged in"),
        }
    }

    fn add_favorite(
        &self,
        session: &Session,
        name: &str,
        category: &str,
        location: &str,
    ) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        match self.store.create_favorite(&username, name, category, location) {
            Ok(id) => Reply::status(200, format!("Favorite added {}", id)),
            Err(e) => self.store_failure("add_favorite", &e),
        }
    }

    fn edit_favorite(
        &self,
        session: &Session,
        id: i64,
        name: &str,
        category: &str,
        location: &str,
    ) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        match self
            .store
            .update_favorite(&username, id, name, category, location)
        {
            Ok(()) => Reply::status(200, "Favorite updated"),
            Err(StoreError::NotFound) => Reply::status(404, "Favorite not found"),
            Err(e) => self.store_failure("edit_favorite", &e),
        }
    }

    fn del_favorite(&self, session: &Session, id: i64) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        match self.store.delete_favorite(&username, id) {
            Ok(()) => Reply::status(200, "Favorite deleted"),
            Err(StoreError::NotFound) => Reply::status(404, "Favorite not found"),
            Err(e) => self.store_failure("del_favorite", &e),
        }
    }

    fn list_favorites(&self, session: &Session) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        match self.store.list_favorites(&username) {
            Ok(favorites) => {
                let rows: Vec<String> = favorites
                    .iter()
                    .map(|f| {
                        format!(
                            "{}|{}|{}|{}|{}",
                            f.id, f.name, f.category, f.location, f.created_at
                        )
                    })
                    .collect();
                Reply::list(200, format!("Favorites {}", rows.len()), rows)
            }
            Err(e) => self.store_failure("list_favorites", &e),
        }
    }

    fn list_tagged_favorites(&self, session: &Session) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        match self.store.list_tagged_favorites(&username) {
            Ok(tagged) => {
                let rows: Vec<String> = tagged
                    .iter()
                    .map(|t| {
                        format!(
                            "{}|{}|{}|{}|{}|{}|{}",
                            t.id, t.owner, t.name, t.category, t.location, t.tagger, t.created_at
                        )
                    })
                    .collect();
                Reply::list(200, format!("Tagged favorites {}", rows.len()), rows)
            }
            Err(e) => self.store_failure("list_tagged_favorites", &e),
        }
    }

    fn add_friend(&self, session: &Session, target: &str) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        if target == username {
            return Reply::status(400, "Cannot friend yourself");
        }
        if !self.accounts.exists(target) {
            return Reply::status(404, "User not found");
        }
        match self.store.are_friends(&username, target) {
            Ok(true) => return Reply::status(407, "Already friends"),
            Ok(false) => {}
            Err(e) => return self.store_failure("add_friend", &e),
        }
        match self.store.has_pending_request(&username, target) {
            Ok(true) => return Reply::status(410, "Friend request already sent"),
            Ok(false) => {}
            Err(e) => return self.store_failure("add_friend", &e),
        }
        match self.store.create_friend_request(&username, target) {
            Ok(_) => Reply::status(200, "Friend request sent"),
            // Lost a race with an identical request from another connection.
            Err(StoreError::Conflict) => Reply::status(410, "Friend request already sent"),
            Err(e) => self.store_failure("add_friend", &e),
        }
    }

    fn accept_friend(&self, session: &Session, request_id: i64) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        let request = match self.store.get_friend_request(request_id) {
            Ok(request) => request,
            Err(StoreError::NotFound) => {
                return Reply::status(404, "Friend request not found")
            }
            Err(e) => return self.store_failure("accept_friend", &e),
        };
        if request.to != username {
            return Reply::status(403, "Friend request not addressed to you");
        }
        if request.status != RequestStatus::Pending {
            return Reply::status(409, "Friend request already processed");
        }
        match self.store.accept_friend_request(request_id, &username) {
            Ok(()) => Reply::status(200, format!("Friend request accepted {}", request.from)),
            Err(StoreError::NotFound) => Reply::status(404, "Friend request not found"),
            Err(StoreError::Conflict) => Reply::status(409, "Friend request already processed"),
            Err(e) => self.store_failure("accept_friend", &e),
        }
    }

    fn reject_friend(&self, session: &Session, request_id: i64) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        let request = match self.store.get_friend_request(request_id) {
            Ok(request) => request,
            Err(StoreError::NotFound) => {
                return Reply::status(404, "Friend request not found")
            }
            Err(e) => return self.store_failure("reject_friend", &e),
        };
        if request.to != username {
            return Reply::status(403, "Friend request not addressed to you");
        }
        if request.status != RequestStatus::Pending {
            return Reply::status(409, "Friend request already processed");
        }
        match self.store.reject_friend_request(request_id, &username) {
            Ok(()) => Reply::status(200, format!("Friend request rejected {}", request.from)),
            Err(StoreError::NotFound) => Reply::status(404, "Friend request not found"),
            Err(StoreError::Conflict) => Reply::status(409, "Friend request already processed"),
            Err(e) => self.store_failure("reject_friend", &e),
        }
    }

    fn remove_friend(&self, session: &Session, target: &str) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        match self.store.remove_friendship(&username, target) {
            Ok(()) => Reply::status(200, "Friend removed"),
            Err(StoreError::NotFound) => Reply::status(404, "Friendship not found"),
            Err(e) => self.store_failure("remove_friend", &e),
        }
    }

    fn list_friends(&self, session: &Session) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        match self.store.list_friends(&username) {
            Ok(friends) => {
                let rows: Vec<String> = friends
                    .iter()
                    .map(|f| format!("{}|{}", f.username, f.since))
                    .collect();
                Reply::list(200, format!("Friends {}", rows.len()), rows)
            }
            Err(e) => self.store_failure("list_friends", &e),
        }
    }

    fn list_requests(&self, session: &Session) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        match self.store.list_friend_requests(&username) {
            Ok(requests) => {
                let rows: Vec<String> = requests
                    .iter()
                    .map(|r| format!("{}|{}|{}", r.id, r.from, r.created_at))
                    .collect();
                Reply::list(200, format!("Requests {}", rows.len()), rows)
            }
            Err(e) => self.store_failure("list_requests", &e),
        }
    }

    fn tag_friend(&self, session: &Session, favorite_id: i64, target: &str) -> Reply {
        let username = match self.acting_user(session) {
            Ok(u) => u,
            Err(reply) => return reply,
        };
        let favorite = match self.store.get_favorite(favorite_id) {
            Ok(favorite) => favorite,
            Err(StoreError::NotFound) => return Reply::status(404, "Favorite not found"),
            Err(e) => return self.store_failure("tag_friend", &e),
        };
        if favorite.owner != username {
            return Reply::status(403, "Not your favorite");
        }
        if !self.accounts.exists(target) {
            return Reply::status(404, "User not found");
        }
        match self.store.are_friends(&username, target) {
            Ok(true) => {}
            Ok(false) => return Reply::status(403, "Can only tag friends"),
            Err(e) => return self.store_failure("tag_friend", &e),
        }
        match self.store.tag_favorite(favorite_id, &username, target) {
            Ok(()) => Reply::status(200, "Friend tagged"),
            Err(StoreError::Conflict) => Reply::status(411, "Already tagged"),
            Err(StoreError::NotFound) => Reply::status(404, "Favorite not found"),
            Err(e) => self.store_failure("tag_friend", &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Dispatcher, Arc<AccountDirectory>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let accounts = Arc::new(AccountDirectory::load(Arc::clone(&store)).unwrap());
        (Dispatcher::new(store, Arc::clone(&accounts)), accounts)
    }

    fn session() -> Session {
        Session::new("127.0.0.1:4000".parse().unwrap())
    }

    fn run(dispatcher: &Dispatcher, session: &mut Session, line: &str) -> Reply {
        dispatcher
            .dispatch(session, line.as_bytes())
            .expect("non-blank line must produce a reply")
    }

    /// Register an account and leave the session logged in as it.
    fn login_as(dispatcher: &Dispatcher, session: &mut Session, username: &str) {
        let line = format!("REGISTER|{}|pw", username);
        assert_eq!(run(dispatcher, session, &line).code(), 200);
        let line = format!("LOGIN|{}|pw", username);
        assert_eq!(run(dispatcher, session, &line).code(), 200);
    }

    #[test]
    fn test_blank_line_is_noop() {
        let (dispatcher, _) = setup();
        assert_eq!(dispatcher.dispatch(&mut session(), b""), None);
    }

    #[test]
    fn test_unknown_and_malformed_are_distinct_400s() {
        let (dispatcher, _) = setup();
        let mut session = session();
        assert_eq!(
            run(&dispatcher, &mut session, "FROB|x"),
            Reply::status(400, "Unknown command")
        );
        assert_eq!(
            run(&dispatcher, &mut session, "LOGIN|alice"),
            Reply::status(400, "Invalid LOGIN format")
        );
    }

    #[test]
    fn test_unsupported_verb_is_501() {
        let (dispatcher, _) = setup();
        assert_eq!(
            run(&dispatcher, &mut session(), "LIST_NOTIFICATIONS").code(),
            501
        );
    }

    #[test]
    fn test_register_then_duplicate() {
        let (dispatcher, _) = setup();
        let mut session = session();
        assert_eq!(run(&dispatcher, &mut session, "REGISTER|alice|pw").code(), 200);
        assert_eq!(
            run(&dispatcher, &mut session, "REGISTER|alice|pw2"),
            Reply::status(404, "Username already exists")
        );
        // First password survives.
        assert_eq!(run(&dispatcher, &mut session, "LOGIN|alice|pw2").code(), 401);
        assert_eq!(run(&dispatcher, &mut session, "LOGIN|alice|pw").code(), 200);
    }

    #[test]
    fn test_register_while_authenticated() {
        let (dispatcher, _) = setup();
        let mut session = session();
        login_as(&dispatcher, &mut session, "alice");
        assert_eq!(
            run(&dispatcher, &mut session, "REGISTER|bob|pw"),
            Reply::status(406, "Already logged in")
        );
    }

    #[test]
    fn test_bad_login_leaves_flag_clear() {
        let (dispatcher, accounts) = setup();
        let mut session = session();
        assert_eq!(run(&dispatcher, &mut session, "REGISTER|alice|pw").code(), 200);
        assert_eq!(
            run(&dispatcher, &mut session, "LOGIN|alice|wrong"),
            Reply::status(401, "Invalid username or password")
        );
        assert!(!accounts.is_logged_in("alice"));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_second_connection_login_rejected_until_logout() {
        let (dispatcher, _) = setup();
        let mut first = session();
        login_as(&dispatcher, &mut first, "alice");

        let mut second = session();
        assert_eq!(
            run(&dispatcher, &mut second, "LOGIN|alice|pw"),
            Reply::status(402, "Account already logged in")
        );

        assert_eq!(run(&dispatcher, &mut first, "LOGOUT").code(), 200);
        assert_eq!(run(&dispatcher, &mut second, "LOGIN|alice|pw").code(), 200);
    }

    #[test]
    fn test_login_twice_on_same_session() {
        let (dispatcher, _) = setup();
        let mut session = session();
        login_as(&dispatcher, &mut session, "alice");
        assert_eq!(
            run(&dispatcher, &mut session, "LOGIN|alice|pw"),
            Reply::status(406, "Already logged in")
        );
    }

    #[test]
    fn test_logout_when_anonymous() {
        let (dispatcher, _) = setup();
        assert_eq!(
            run(&dispatcher, &mut session(), "LOGOUT"),
            Reply::status(405, "Not logged in")
        );
    }

    #[test]
    fn test_anonymous_add_favorite_has_no_side_effect() {
        let (dispatcher, _) = setup();
        let mut anon = session();
        assert_eq!(
            run(&dispatcher, &mut anon, "ADD_FAVORITE|Cafe|Food|Hanoi"),
            Reply::status(405, "Not logged in")
        );

        let mut alice = session();
        login_as(&dispatcher, &mut alice, "alice");
        assert_eq!(
            run(&dispatcher, &mut alice, "LIST_FAVORITES"),
            Reply::list(200, "Favorites 0", vec![])
        );
    }

    #[test]
    fn test_favorite_crud_round_trip() {
        let (dispatcher, _) = setup();
        let mut alice = session();
        login_as(&dispatcher, &mut alice, "alice");

        assert_eq!(
            run(&dispatcher, &mut alice, "ADD_FAVORITE|Cafe|Food|Hanoi"),
            Reply::status(200, "Favorite added 1")
        );
        assert_eq!(
            run(&dispatcher, &mut alice, "EDIT_FAVORITE|1|Cafe X|Food|Hanoi").code(),
            200
        );
        assert_eq!(
            run(&dispatcher, &mut alice, "EDIT_FAVORITE|99|X|Y|Z").code(),
            404
        );

        let reply = run(&dispatcher, &mut alice, "LIST_FAVORITES");
        let rendered = reply.to_bytes();
        let text = std::str::from_utf8(&rendered).unwrap();
        assert!(text.starts_with("200 Favorites 1\r\n1|Cafe X|Food|Hanoi|"));
        assert!(text.ends_with("END\r\n"));

        assert_eq!(run(&dispatcher, &mut alice, "DEL_FAVORITE|1").code(), 200);
        assert_eq!(run(&dispatcher, &mut alice, "DEL_FAVORITE|1").code(), 404);
    }

    #[test]
    fn test_cannot_touch_another_users_favorite() {
        let (dispatcher, _) = setup();
        let mut alice = session();
        login_as(&dispatcher, &mut alice, "alice");
        run(&dispatcher, &mut alice, "ADD_FAVORITE|Cafe|Food|Hanoi");

        let mut bob = session();
        login_as(&dispatcher, &mut bob, "bob");
        assert_eq!(run(&dispatcher, &mut bob, "DEL_FAVORITE|1").code(), 404);
        assert_eq!(
            run(&dispatcher, &mut bob, "EDIT_FAVORITE|1|X|Y|Z").code(),
            404
        );
    }

    #[test]
    fn test_add_friend_rules() {
        let (dispatcher, _) = setup();
        let mut alice = session();
        login_as(&dispatcher, &mut alice, "alice");

        assert_eq!(
            run(&dispatcher, &mut alice, "ADD_FRIEND|alice"),
            Reply::status(400, "Cannot friend yourself")
        );
        assert_eq!(
            run(&dispatcher, &mut alice, "ADD_FRIEND|ghost"),
            Reply::status(404, "User not found")
        );

        let mut bob = session();
        login_as(&dispatcher, &mut bob, "bob");
        assert_eq!(
            run(&dispatcher, &mut bob, "ADD_FRIEND|alice"),
            Reply::status(200, "Friend request sent")
        );
        assert_eq!(
            run(&dispatcher, &mut bob, "ADD_FRIEND|alice"),
            Reply::status(410, "Friend request already sent")
        );
        // Reverse direction is blocked while the request is pending.
        assert_eq!(
            run(&dispatcher, &mut alice, "ADD_FRIEND|bob"),
            Reply::status(410, "Friend request already sent")
        );
    }

    #[test]
    fn test_accept_flow_and_addressee_check() {
        let (dispatcher, _) = setup();
        let mut alice = session();
        let mut bob = session();
        login_as(&dispatcher, &mut alice, "alice");
        login_as(&dispatcher, &mut bob, "bob");

        run(&dispatcher, &mut bob, "ADD_FRIEND|alice");

        // The sender cannot accept their own request.
        assert_eq!(
            run(&dispatcher, &mut bob, "ACCEPT_FRIEND|1"),
            Reply::status(403, "Friend request not addressed to you")
        );
        assert_eq!(
            run(&dispatcher, &mut alice, "ACCEPT_FRIEND|1"),
            Reply::status(200, "Friend request accepted bob")
        );
        assert_eq!(
            run(&dispatcher, &mut alice, "ACCEPT_FRIEND|1"),
            Reply::status(409, "Friend request already processed")
        );
        assert_eq!(run(&dispatcher, &mut alice, "ACCEPT_FRIEND|42").code(), 404);

        // Now friends in both directions.
        assert_eq!(
            run(&dispatcher, &mut bob, "ADD_FRIEND|alice"),
            Reply::status(407, "Already friends")
        );
        let reply = run(&dispatcher, &mut alice, "LIST_FRIENDS");
        let text = reply.to_bytes();
        let text = std::str::from_utf8(&text).unwrap();
        assert!(text.starts_with("200 Friends 1\r\nbob|"));
    }

    #[test]
    fn test_reject_and_remove() {
        let (dispatcher, _) = setup();
        let mut alice = session();
        let mut bob = session();
        login_as(&dispatcher, &mut alice, "alice");
        login_as(&dispatcher, &mut bob, "bob");

        run(&dispatcher, &mut bob, "ADD_FRIEND|alice");
        assert_eq!(
            run(&dispatcher, &mut alice, "REJECT_FRIEND|1"),
            Reply::status(200, "Friend request rejected bob")
        );
        assert_eq!(run(&dispatcher, &mut alice, "REJECT_FRIEND|1").code(), 409);

        assert_eq!(
            run(&dispatcher, &mut alice, "REMOVE_FRIEND|bob"),
            Reply::status(404, "Friendship not found")
        );

        run(&dispatcher, &mut bob, "ADD_FRIEND|alice");
        run(&dispatcher, &mut alice, "ACCEPT_FRIEND|2");
        assert_eq!(
            run(&dispatcher, &mut alice, "REMOVE_FRIEND|bob"),
            Reply::status(200, "Friend removed")
        );
    }

    #[test]
    fn test_list_requests_shows_incoming_pending() {
        let (dispatcher, _) = setup();
        let mut alice = session();
        let mut bob = session();
        login_as(&dispatcher, &mut alice, "alice");
        login_as(&dispatcher, &mut bob, "bob");

        run(&dispatcher, &mut bob, "ADD_FRIEND|alice");

        let reply = run(&dispatcher, &mut alice, "LIST_REQUESTS");
        let text = reply.to_bytes();
        let text = std::str::from_utf8(&text).unwrap();
        assert!(text.starts_with("200 Requests 1\r\n1|bob|"));

        assert_eq!(
            run(&dispatcher, &mut bob, "LIST_REQUESTS"),
            Reply::list(200, "Requests 0", vec![])
        );
    }

    #[test]
    fn test_tag_friend_preconditions() {
        let (dispatcher, _) = setup();
        let mut alice = session();
        let mut bob = session();
        let mut carol = session();
        login_as(&dispatcher, &mut alice, "alice");
        login_as(&dispatcher, &mut bob, "bob");
        login_as(&dispatcher, &mut carol, "carol");

        run(&dispatcher, &mut alice, "ADD_FAVORITE|Cafe|Food|Hanoi");

        // Not friends yet.
        assert_eq!(
            run(&dispatcher, &mut alice, "TAG_FRIEND|1|carol"),
            Reply::status(403, "Can only tag friends")
        );

        run(&dispatcher, &mut carol, "ADD_FRIEND|alice");
        run(&dispatcher, &mut alice, "ACCEPT_FRIEND|1");

        // Tagging someone else's favorite.
        assert_eq!(
            run(&dispatcher, &mut carol, "TAG_FRIEND|1|alice"),
            Reply::status(403, "Not your favorite")
        );
        // Missing favorite and missing user.
        assert_eq!(run(&dispatcher, &mut alice, "TAG_FRIEND|99|carol").code(), 404);
        assert_eq!(run(&dispatcher, &mut alice, "TAG_FRIEND|1|ghost").code(), 404);

        assert_eq!(
            run(&dispatcher, &mut alice, "TAG_FRIEND|1|carol"),
            Reply::status(200, "Friend tagged")
        );
        assert_eq!(
            run(&dispatcher, &mut alice, "TAG_FRIEND|1|carol"),
            Reply::status(411, "Already tagged")
        );

        let reply = run(&dispatcher, &mut carol, "LIST_TAGGED_FAVORITES");
        let text = reply.to_bytes();
        let text = std::str::from_utf8(&text).unwrap();
        assert!(text.starts_with("200 Tagged favorites 1\r\n1|alice|Cafe|Food|Hanoi|alice|"));
    }

    /// List output re-parsed by the data-line grammar reconstructs the
    /// records the store returned, in order.
    #[test]
    fn test_list_round_trip_matches_store() {
        let (dispatcher, _) = setup();
        let mut alice = session();
        login_as(&dispatcher, &mut alice, "alice");

        run(&dispatcher, &mut alice, "ADD_FAVORITE|Cafe|Food|Hanoi");
        run(&dispatcher, &mut alice, "ADD_FAVORITE|Park|Outdoors|Hue");

        let reply = run(&dispatcher, &mut alice, "LIST_FAVORITES");
        let bytes = reply.to_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();
        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(lines[0], "200 Favorites 2");
        assert_eq!(lines[lines.len() - 2], "END");

        let rows: Vec<Vec<&str>> = lines[1..lines.len() - 2]
            .iter()
            .map(|l| l.split('|').collect())
            .collect();
        // Newest first.
        assert_eq!(rows[0][0..4], ["2", "Park", "Outdoors", "Hue"]);
        assert_eq!(rows[1][0..4], ["1", "Cafe", "Food", "Hanoi"]);
    }
}
