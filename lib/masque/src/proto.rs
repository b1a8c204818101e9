//! Wire vocabulary shared by server and client.
//!
//! Requests are classified by their first five bytes; responses open with a
//! three-digit code, optionally followed by explanatory text inside the same
//! framed message.

/// Length of a command token, including its trailing newline or space.
pub const CMD_LEN: usize = 5;
/// Length of a response code.
pub const RESP_LEN: usize = 3;

pub const CMD_LIST: &str = "LSTF\n";
pub const CMD_LIST_RECURSIVE: &str = "LSTR\n";
pub const CMD_ENCRYPT: &str = "ENCR ";
pub const CMD_DECRYPT: &str = "DECR ";

pub const RESP_ACCEPTED: &str = "100";
pub const RESP_SUCCESS: &str = "200";
pub const RESP_MORE_BEGIN: &str = "300";
pub const RESP_MORE_END: &str = "301";
pub const RESP_INVALID: &str = "400";
pub const RESP_FAILURE: &str = "500";
pub const RESP_BUSY: &str = "503";
pub const RESP_NOT_IMPLEMENTED: &str = "542";

/// A classified client request. Encrypt/decrypt carry their raw argument
/// tail, validated later by the session.
#[derive(Debug, Eq, PartialEq)]
pub enum Request<'a> {
    List,
    ListRecursive,
    Encrypt(&'a str),
    Decrypt(&'a str),
    Unknown,
}

impl Request<'_> {
    /// Classifies a request by its five-byte command token.
    pub fn parse(msg: &str) -> Request<'_> {
        match msg.get(..CMD_LEN) {
            Some(token) if token == CMD_LIST => Request::List,
            Some(token) if token == CMD_LIST_RECURSIVE => Request::ListRecursive,
            Some(token) if token == CMD_ENCRYPT => Request::Encrypt(&msg[CMD_LEN..]),
            Some(token) if token == CMD_DECRYPT => Request::Decrypt(&msg[CMD_LEN..]),
            _ => Request::Unknown,
        }
    }
}

/// Splits a response into its three-digit code and the trailing text.
#[inline]
pub fn split_response(msg: &str) -> (&str, &str) {
    if msg.len() >= RESP_LEN && msg.is_char_boundary(RESP_LEN) {
        msg.split_at(RESP_LEN)
    } else {
        (msg, "")
    }
}
