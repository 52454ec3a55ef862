use crate::utf7;

/// One entry of a `LIST` or `LSUB` response, decoded and owned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Name {
    raw_name: String,
    name: String,
    delimiter: Option<String>,
    attributes: Vec<NameAttribute>,
}

/// A name attribute such as `\Noselect`, as returned with a [`Name`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NameAttribute {
    /// It is not possible for any child levels of hierarchy to exist under
    /// this name.
    NoInferiors,
    /// The name cannot be selected; it exists only as a hierarchy node.
    NoSelect,
    Marked,
    Unmarked,
    /// Any other attribute, kept in its wire form (e.g. `\HasNoChildren`).
    Extension(String),
}

impl NameAttribute {
    pub(crate) fn from_wire(token: &str) -> NameAttribute {
        if token.eq_ignore_ascii_case("\\Noinferiors") {
            NameAttribute::NoInferiors
        } else if token.eq_ignore_ascii_case("\\Noselect") {
            NameAttribute::NoSelect
        } else if token.eq_ignore_ascii_case("\\Marked") {
            NameAttribute::Marked
        } else if token.eq_ignore_ascii_case("\\Unmarked") {
            NameAttribute::Unmarked
        } else {
            NameAttribute::Extension(token.to_string())
        }
    }

    /// The wire token, without its leading backslash. This is the form the
    /// catalog stores.
    pub fn token(&self) -> &str {
        match self {
            NameAttribute::NoInferiors => "Noinferiors",
            NameAttribute::NoSelect => "Noselect",
            NameAttribute::Marked => "Marked",
            NameAttribute::Unmarked => "Unmarked",
            NameAttribute::Extension(s) => s.trim_start_matches('\\'),
        }
    }
}

impl Name {
    /// Build a [`Name`] from wire data. `raw_name` is the name exactly as
    /// the server sent it (modified UTF-7); the decoded form is derived.
    pub(crate) fn from_wire(
        raw_name: String,
        delimiter: Option<String>,
        attributes: Vec<NameAttribute>,
    ) -> Name {
        let mut name = utf7::decode_lossy(&raw_name);
        // RFC 3501: the name INBOX is case-insensitive.
        if name.eq_ignore_ascii_case("INBOX") {
            name = "INBOX".to_string();
        }
        Name {
            raw_name,
            name,
            delimiter,
            attributes,
        }
    }

    /// The name as received, in modified UTF-7.
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// The decoded UTF-8 name, with `inbox` canonicalized to `INBOX`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The hierarchy delimiter, or `None` for a flat name.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    pub fn attributes(&self) -> &[NameAttribute] {
        &self.attributes
    }

    pub fn no_select(&self) -> bool {
        self.attributes.contains(&NameAttribute::NoSelect)
    }

    pub fn no_inferiors(&self) -> bool {
        self.attributes.contains(&NameAttribute::NoInferiors)
    }

    pub fn has_no_children(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| a.token().eq_ignore_ascii_case("Hasnochildren"))
    }

    /// True when recursing below this name can yield anything.
    pub fn traversable(&self) -> bool {
        !self.no_inferiors() && !self.has_no_children()
    }
}
