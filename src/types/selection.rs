use super::{Flag, Uid};

/// Meta-information about a mailbox as returned by
/// [`SELECT`](https://tools.ietf.org/html/rfc3501#section-6.3.1) and
/// `EXAMINE`: the untagged `FLAGS`, `PERMANENTFLAGS`, `EXISTS`, `RECENT`,
/// `UIDVALIDITY` and `UIDNEXT` data fresh from opening it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Selection {
    /// Flags defined in the mailbox.
    pub flags: Vec<Flag<'static>>,

    /// Flags the client can change permanently. Empty means the server did
    /// not say, in which case all flags are assumed permanent.
    pub permanent_flags: Vec<Flag<'static>>,

    /// Number of messages in the mailbox.
    pub exists: u32,

    /// Number of messages with `\Recent` set.
    pub recent: u32,

    /// Sequence number of the first unseen message, when reported.
    pub unseen: Option<u32>,

    /// The next UID the server expects to assign.
    pub uid_next: Option<Uid>,

    /// The UID validity value; a change invalidates every cached UID.
    pub uid_validity: Option<u32>,

    /// The mailbox was opened read-only (`EXAMINE`, or `SELECT` demoted by
    /// the server).
    pub is_read_only: bool,
}

impl Selection {
    /// Whether the mailbox will accept the given flag on APPEND or STORE.
    ///
    /// Accepts when the flag appears in `FLAGS` or `PERMANENTFLAGS`, or
    /// when `PERMANENTFLAGS` carries `\*` (new keywords may be created), or
    /// when the server reported no flag data at all.
    pub fn accepts_flag(&self, flag: &Flag<'_>) -> bool {
        if self.flags.is_empty() && self.permanent_flags.is_empty() {
            return true;
        }
        if self.permanent_flags.contains(&Flag::MayCreate) {
            return true;
        }
        let owned = flag.clone().into_owned();
        self.flags.contains(&owned) || self.permanent_flags.contains(&owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_everything_without_flag_data() {
        let sel = Selection::default();
        assert!(sel.accepts_flag(&Flag::Seen));
        assert!(sel.accepts_flag(&Flag::Custom("$Weird".into())));
    }

    #[test]
    fn restricts_to_advertised_flags() {
        let sel = Selection {
            flags: vec![Flag::Seen, Flag::Deleted],
            permanent_flags: vec![Flag::Seen, Flag::Deleted],
            ..Selection::default()
        };
        assert!(sel.accepts_flag(&Flag::Seen));
        assert!(!sel.accepts_flag(&Flag::Custom("$Forwarded".into())));
    }

    #[test]
    fn may_create_opens_the_door() {
        let sel = Selection {
            flags: vec![Flag::Seen],
            permanent_flags: vec![Flag::Seen, Flag::MayCreate],
            ..Selection::default()
        };
        assert!(sel.accepts_flag(&Flag::Custom("$Forwarded".into())));
    }
}
