//! Protocol-level data types exchanged between the wire client and the
//! sync layers.

use std::fmt;

mod capabilities;
mod fetch;
mod flag;
mod name;
mod selection;

pub use self::capabilities::Capabilities;
pub use self::fetch::FetchRecord;
pub use self::flag::Flag;
pub use self::name::{Name, NameAttribute};
pub use self::selection::Selection;

/// From section [2.3.1.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.1).
///
/// A 32-bit identifier assigned to each message, strictly ascending within
/// its mailbox, and stable only for as long as the mailbox's `UIDVALIDITY`
/// does not change.
pub type Uid = u32;

/// A UID set argument for `UID FETCH`, `UID STORE` and `UID COPY`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UidSet {
    /// A single UID.
    Single(Uid),
    /// A closed range, both ends included.
    Range(Uid, Uid),
    /// The half-open range `lo:*`.
    From(Uid),
    /// An explicit list.
    List(Vec<Uid>),
}

impl fmt::Display for UidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UidSet::Single(uid) => write!(f, "{}", uid),
            UidSet::Range(lo, hi) => write!(f, "{}:{}", lo, hi),
            UidSet::From(lo) => write!(f, "{}:*", lo),
            UidSet::List(uids) => {
                let mut first = true;
                for uid in uids {
                    if !first {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", uid)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// The result of a `STATUS` command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusInfo {
    pub messages: Option<u32>,
    pub recent: Option<u32>,
    pub uid_next: Option<Uid>,
    pub uid_validity: Option<u32>,
    pub unseen: Option<u32>,
}

/// Responses the server sends that are not related to the current command.
/// [RFC 3501 section 7](https://tools.ietf.org/html/rfc3501#section-7)
/// requires clients to accept any response at any time; these are routed to
/// a side channel and drained when the session is returned to its pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsolicitedResponse {
    /// Number of messages in the selected mailbox changed.
    Exists(u32),
    /// Number of messages with `\Recent` set.
    Recent(u32),
    /// The given sequence number was permanently removed.
    Expunge(u32),
    /// A `STATUS` response attributed to another mailbox.
    Status {
        mailbox: String,
        status: StatusInfo,
    },
    /// A flag update for a message we did not ask about.
    Fetch { seq: u32, flags: Vec<Flag<'static>> },
    /// The server is closing the connection.
    Bye(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_set_wire_forms() {
        assert_eq!(UidSet::Single(7).to_string(), "7");
        assert_eq!(UidSet::Range(1, 1024).to_string(), "1:1024");
        assert_eq!(UidSet::From(4097).to_string(), "4097:*");
        assert_eq!(UidSet::List(vec![3, 9, 27]).to_string(), "3,9,27");
    }
}
