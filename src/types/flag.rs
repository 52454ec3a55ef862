use std::borrow::Cow;

/// With the exception of [`Flag::Custom`], these are the system flags
/// pre-defined in [RFC 3501 section
/// 2.3.2](https://tools.ietf.org/html/rfc3501#section-2.3.2). All system
/// flags begin with `\` in the IMAP protocol; custom keywords do not, and
/// by convention most servers name theirs with a leading `$`
/// (e.g. `$Forwarded`).
///
/// > Note: The `\Recent` system flag is a special case of a session flag.
/// > `\Recent` can not be used as an argument in a `STORE` or `APPEND`
/// > command, and thus can not be changed at all.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Flag<'a> {
    /// Message has been read
    Seen,
    /// Message has been answered
    Answered,
    /// Message is "flagged" for urgent/special attention
    Flagged,
    /// Message is "deleted" for removal by later EXPUNGE
    Deleted,
    /// Message has not completed composition (marked as a draft).
    Draft,
    /// Message recently arrived in this mailbox; cannot be stored or
    /// appended by a client.
    Recent,
    /// The special `\*` marker in PERMANENTFLAGS: new keywords may be
    /// created by storing them.
    MayCreate,
    /// A non-standard user- or server-defined keyword.
    Custom(Cow<'a, str>),
}

impl Flag<'static> {
    fn system(s: &str) -> Option<Self> {
        match s {
            "\\Seen" => Some(Flag::Seen),
            "\\Answered" => Some(Flag::Answered),
            "\\Flagged" => Some(Flag::Flagged),
            "\\Deleted" => Some(Flag::Deleted),
            "\\Draft" => Some(Flag::Draft),
            "\\Recent" => Some(Flag::Recent),
            "\\*" => Some(Flag::MayCreate),
            _ => None,
        }
    }

    /// Decode one token of the catalog's comma-joined flag string.
    ///
    /// System flags are stored as bare names (`Seen`); anything else is a
    /// custom keyword stored verbatim.
    pub fn from_catalog_token(token: &str) -> Flag<'static> {
        match token {
            "Seen" => Flag::Seen,
            "Answered" => Flag::Answered,
            "Flagged" => Flag::Flagged,
            "Deleted" => Flag::Deleted,
            "Draft" => Flag::Draft,
            "Recent" => Flag::Recent,
            _ => Flag::Custom(Cow::Owned(token.to_string())),
        }
    }

    /// Decode a comma-joined catalog flag string.
    pub fn set_from_catalog(joined: &str) -> Vec<Flag<'static>> {
        joined
            .split(',')
            .filter(|t| !t.is_empty())
            .map(Flag::from_catalog_token)
            .collect()
    }
}

impl<'a> Flag<'a> {
    /// The token this flag is stored under in the catalog. `None` for
    /// markers that have no business being persisted (`\*`).
    pub fn catalog_token(&self) -> Option<&str> {
        match self {
            Flag::Seen => Some("Seen"),
            Flag::Answered => Some("Answered"),
            Flag::Flagged => Some("Flagged"),
            Flag::Deleted => Some("Deleted"),
            Flag::Draft => Some("Draft"),
            Flag::Recent => Some("Recent"),
            Flag::MayCreate => None,
            Flag::Custom(s) => Some(s),
        }
    }

    /// Encode a flag set as the catalog's comma-joined string, in input
    /// order.
    pub fn set_to_catalog(flags: &[Flag<'_>]) -> String {
        let mut out = String::new();
        for flag in flags {
            if let Some(token) = flag.catalog_token() {
                if !out.is_empty() {
                    out.push(',');
                }
                out.push_str(token);
            }
        }
        out
    }

    /// True for flags a client may pass to `APPEND` or `STORE`.
    pub fn storable(&self) -> bool {
        !matches!(self, Flag::Recent | Flag::MayCreate)
    }

    /// Render a flag set as a parenthesized wire list, e.g.
    /// `(\Seen $Forwarded)`.
    pub fn set_to_wire(flags: &[Flag<'_>]) -> String {
        let mut out = String::from("(");
        for (i, flag) in flags.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&flag.to_string());
        }
        out.push(')');
        out
    }

    /// Get an owned version of the [`Flag`].
    pub fn into_owned(self) -> Flag<'static> {
        match self {
            Flag::Custom(cow) => Flag::Custom(Cow::Owned(cow.into_owned())),
            Flag::Seen => Flag::Seen,
            Flag::Answered => Flag::Answered,
            Flag::Flagged => Flag::Flagged,
            Flag::Deleted => Flag::Deleted,
            Flag::Draft => Flag::Draft,
            Flag::Recent => Flag::Recent,
            Flag::MayCreate => Flag::MayCreate,
        }
    }
}

impl<'a> std::fmt::Display for Flag<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Recent => write!(f, "\\Recent"),
            Flag::MayCreate => write!(f, "\\*"),
            Flag::Custom(ref s) => write!(f, "{}", s),
        }
    }
}

impl<'a> From<String> for Flag<'a> {
    fn from(s: String) -> Self {
        if let Some(f) = Flag::system(&s) {
            f
        } else {
            Flag::Custom(Cow::Owned(s))
        }
    }
}

impl<'a> From<&'a str> for Flag<'a> {
    fn from(s: &'a str) -> Self {
        if let Some(f) = Flag::system(s) {
            f
        } else {
            Flag::Custom(Cow::Borrowed(s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tokens_map_to_system_flags() {
        assert_eq!(Flag::from("\\Seen"), Flag::Seen);
        assert_eq!(Flag::from("\\Recent"), Flag::Recent);
        assert_eq!(Flag::from("$Forwarded"), Flag::Custom("$Forwarded".into()));
        assert_eq!(Flag::from("NonJunk"), Flag::Custom("NonJunk".into()));
    }

    #[test]
    fn catalog_form_round_trips() {
        let flags = vec![
            Flag::Seen,
            Flag::Answered,
            Flag::Custom("$Forwarded".into()),
            Flag::Custom("NonJunk".into()),
        ];
        let joined = Flag::set_to_catalog(&flags);
        assert_eq!(joined, "Seen,Answered,$Forwarded,NonJunk");
        assert_eq!(Flag::set_from_catalog(&joined), flags);
        assert_eq!(Flag::set_from_catalog(""), Vec::<Flag>::new());
    }

    #[test]
    fn may_create_is_not_persisted() {
        let joined = Flag::set_to_catalog(&[Flag::MayCreate, Flag::Seen]);
        assert_eq!(joined, "Seen");
    }

    #[test]
    fn wire_list_form() {
        let flags = vec![Flag::Seen, Flag::Custom("$Label1".into())];
        assert_eq!(Flag::set_to_wire(&flags), "(\\Seen $Label1)");
        assert_eq!(Flag::set_to_wire(&[]), "()");
    }

    #[test]
    fn recent_is_not_storable() {
        assert!(!Flag::Recent.storable());
        assert!(!Flag::MayCreate.storable());
        assert!(Flag::Deleted.storable());
        assert!(Flag::Custom("$MDNSent".into()).storable());
    }
}
