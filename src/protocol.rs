//! Pipe-delimited text protocol: command grammar and response rendering.
//!
//! Requests are single CRLF-terminated lines of the form `VERB` or
//! `VERB|field|field|...`. Responses are a status line `<code> <message>`,
//! optionally followed by pipe-delimited data rows and a terminating `END`
//! sentinel for list-returning commands.

use bytes::BytesMut;
use std::str;
use thiserror::Error;

/// Maximum username length.
pub const MAX_USERNAME_LEN: usize = 63;

/// Maximum password length.
pub const MAX_PASSWORD_LEN: usize = 127;

/// Maximum favorite name length.
pub const MAX_NAME_LEN: usize = 127;

/// Maximum category length.
pub const MAX_CATEGORY_LEN: usize = 63;

/// Maximum location length.
pub const MAX_LOCATION_LEN: usize = 255;

/// A parsed protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Logout,
    AddFavorite {
        name: String,
        category: String,
        location: String,
    },
    EditFavorite {
        id: i64,
        name: String,
        category: String,
        location: String,
    },
    DelFavorite {
        id: i64,
    },
    ListFavorites,
    ListTaggedFavorites,
    AddFriend {
        username: String,
    },
    AcceptFriend {
        request_id: i64,
    },
    RejectFriend {
        request_id: i64,
    },
    RemoveFriend {
        username: String,
    },
    ListFriends,
    ListRequests,
    TagFriend {
        favorite_id: i64,
        username: String,
    },
}

/// Command parsing errors.
///
/// A recognized verb with the wrong shape is `Malformed`; a verb the server
/// has never heard of is `UnknownCommand`. The two get different 400
/// messages so clients can tell a typo from a bad payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid {0} format")]
    Malformed(&'static str),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Verbs from the original protocol surface that this server does not
    /// serve (answered 501 rather than 400).
    #[error("not implemented: {0}")]
    Unsupported(&'static str),
}

/// Parse one delimited line into a command.
///
/// Returns `Ok(None)` for a blank line, which the dispatcher treats as a
/// no-op rather than an error.
pub fn parse(line: &[u8]) -> Result<Option<Command>, ParseError> {
    if line.is_empty() {
        return Ok(None);
    }

    let line = str::from_utf8(line).map_err(|_| ParseError::Malformed("command"))?;

    let mut fields = line.split('|');
    let verb = fields.next().unwrap_or("");
    let fields: Vec<&str> = fields.collect();

    match verb {
        "REGISTER" => {
            let [username, password] = credentials(&fields, "REGISTER")?;
            Ok(Some(Command::Register { username, password }))
        }
        "LOGIN" => {
            let [username, password] = credentials(&fields, "LOGIN")?;
            Ok(Some(Command::Login { username, password }))
        }
        "LOGOUT" => {
            expect_fields(&fields, 0, "LOGOUT")?;
            Ok(Some(Command::Logout))
        }
        "ADD_FAVORITE" => {
            expect_fields(&fields, 3, "ADD_FAVORITE")?;
            Ok(Some(Command::AddFavorite {
                name: bounded(fields[0], MAX_NAME_LEN, "ADD_FAVORITE")?,
                category: bounded(fields[1], MAX_CATEGORY_LEN, "ADD_FAVORITE")?,
                location: bounded(fields[2], MAX_LOCATION_LEN, "ADD_FAVORITE")?,
            }))
        }
        "EDIT_FAVORITE" => {
            expect_fields(&fields, 4, "EDIT_FAVORITE")?;
            Ok(Some(Command::EditFavorite {
                id: positive_id(fields[0], "EDIT_FAVORITE")?,
                name: bounded(fields[1], MAX_NAME_LEN, "EDIT_FAVORITE")?,
                category: bounded(fields[2], MAX_CATEGORY_LEN, "EDIT_FAVORITE")?,
                location: bounded(fields[3], MAX_LOCATION_LEN, "EDIT_FAVORITE")?,
            }))
        }
        "DEL_FAVORITE" => {
            expect_fields(&fields, 1, "DEL_FAVORITE")?;
            Ok(Some(Command::DelFavorite {
                id: positive_id(fields[0], "DEL_FAVORITE")?,
            }))
        }
        "LIST_FAVORITES" => {
            expect_fields(&fields, 0, "LIST_FAVORITES")?;
            Ok(Some(Command::ListFavorites))
        }
        "LIST_TAGGED_FAVORITES" => {
            expect_fields(&fields, 0, "LIST_TAGGED_FAVORITES")?;
            Ok(Some(Command::ListTaggedFavorites))
        }
        "ADD_FRIEND" => {
            expect_fields(&fields, 1, "ADD_FRIEND")?;
            Ok(Some(Command::AddFriend {
                username: bounded(fields[0], MAX_USERNAME_LEN, "ADD_FRIEND")?,
            }))
        }
        "ACCEPT_FRIEND" => {
            expect_fields(&fields, 1, "ACCEPT_FRIEND")?;
            Ok(Some(Command::AcceptFriend {
                request_id: positive_id(fields[0], "ACCEPT_FRIEND")?,
            }))
        }
        "REJECT_FRIEND" => {
            expect_fields(&fields, 1, "REJECT_FRIEND")?;
            Ok(Some(Command::RejectFriend {
                request_id: positive_id(fields[0], "REJECT_FRIEND")?,
            }))
        }
        "REMOVE_FRIEND" => {
            expect_fields(&fields, 1, "REMOVE_FRIEND")?;
            Ok(Some(Command::RemoveFriend {
                username: bounded(fields[0], MAX_USERNAME_LEN, "REMOVE_FRIEND")?,
            }))
        }
        "LIST_FRIENDS" => {
            expect_fields(&fields, 0, "LIST_FRIENDS")?;
            Ok(Some(Command::ListFriends))
        }
        "LIST_REQUESTS" => {
            expect_fields(&fields, 0, "LIST_REQUESTS")?;
            Ok(Some(Command::ListRequests))
        }
        "TAG_FRIEND" => {
            expect_fields(&fields, 2, "TAG_FRIEND")?;
            Ok(Some(Command::TagFriend {
                favorite_id: positive_id(fields[0], "TAG_FRIEND")?,
                username: bounded(fields[1], MAX_USERNAME_LEN, "TAG_FRIEND")?,
            }))
        }
        "SHARE_FAVORITE" => Err(ParseError::Unsupported("SHARE_FAVORITE")),
        "LIST_NOTIFICATIONS" => Err(ParseError::Unsupported("LIST_NOTIFICATIONS")),
        _ => Err(ParseError::UnknownCommand(verb.to_string())),
    }
}

fn expect_fields(fields: &[&str], count: usize, verb: &'static str) -> Result<(), ParseError> {
    // A bare trailing separator on a fieldless verb is tolerated, matching
    // the original dispatch table (`LOGOUT|`).
    if count == 0 && fields.len() == 1 && fields[0].is_empty() {
        return Ok(());
    }
    if fields.len() != count {
        return Err(ParseError::Malformed(verb));
    }
    Ok(())
}

fn credentials(fields: &[&str], verb: &'static str) -> Result<[String; 2], ParseError> {
    expect_fields(fields, 2, verb)?;
    Ok([
        bounded(fields[0], MAX_USERNAME_LEN, verb)?,
        bounded(fields[1], MAX_PASSWORD_LEN, verb)?,
    ])
}

fn bounded(field: &str, max: usize, verb: &'static str) -> Result<String, ParseError> {
    if field.is_empty() || field.len() > max {
        return Err(ParseError::Malformed(verb));
    }
    // The framer only splits on the \r\n pair, so a lone CR or LF can reach
    // us inside a field; it must never be stored and echoed into data lines.
    if field.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(ParseError::Malformed(verb));
    }
    Ok(field.to_string())
}

fn positive_id(field: &str, verb: &'static str) -> Result<i64, ParseError> {
    match field.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ParseError::Malformed(verb)),
    }
}

/// A single terminated protocol response.
///
/// Simple replies are one status line. List replies carry data rows and are
/// closed with an `END` sentinel so clients can stream them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    message: String,
    rows: Option<Vec<String>>,
}

impl Reply {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Reply {
            code,
            message: message.into(),
            rows: None,
        }
    }

    pub fn list(code: u16, message: impl Into<String>, rows: Vec<String>) -> Self {
        Reply {
            code,
            message: message.into(),
            rows: Some(rows),
        }
    }

    pub fn welcome() -> Self {
        Reply::status(100, "Welcome to placemarkd")
    }

    pub fn internal_error() -> Self {
        Reply::status(500, "Internal server error")
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Render the reply as wire bytes, every line CRLF-terminated.
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::new();
        out.extend_from_slice(format!("{} {}\r\n", self.code, self.message).as_bytes());
        if let Some(rows) = &self.rows {
            for row in rows {
                out.extend_from_slice(row.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"END\r\n");
        }
        out
    }
}
