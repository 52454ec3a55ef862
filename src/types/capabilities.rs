use std::collections::hash_set::Iter;
use std::collections::HashSet;

const AUTH_CAPABILITY_PREFIX: &str = "AUTH=";

/// From [section 7.2.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-7.2.1).
///
/// The set of capability strings a server advertises, either in its
/// greeting's `[CAPABILITY ...]` response code or in reply to a
/// `CAPABILITY` command. Capability names are case-insensitive; they are
/// stored uppercased.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Capabilities(HashSet<String>);

impl Capabilities {
    pub fn new<I, S>(caps: I) -> Capabilities
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Capabilities(
            caps.into_iter()
                .map(|c| c.as_ref().to_ascii_uppercase())
                .collect(),
        )
    }

    /// Check whether the server advertises the given capability.
    pub fn has(&self, cap: &str) -> bool {
        self.0.contains(&cap.to_ascii_uppercase())
    }

    /// The advertised `AUTH=` mechanisms, uppercased, e.g. `["PLAIN",
    /// "CRAM-MD5"]`.
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.0
            .iter()
            .filter_map(|c| c.strip_prefix(AUTH_CAPABILITY_PREFIX))
            .map(String::from)
            .collect()
    }

    /// The `LOGINDISABLED` capability forbids plaintext LOGIN; see the
    /// [Security Considerations of RFC
    /// 3501](https://tools.ietf.org/html/rfc3501#section-11).
    pub fn login_disabled(&self) -> bool {
        self.has("LOGINDISABLED")
    }

    pub fn iter(&self) -> Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_case_insensitive() {
        let caps = Capabilities::new(["IMAP4rev1", "Starttls", "AUTH=plain", "UNSELECT"]);
        assert!(caps.has("imap4rev1"));
        assert!(caps.has("STARTTLS"));
        assert!(caps.has("unselect"));
        assert!(!caps.has("IDLE"));
    }

    #[test]
    fn auth_mechanisms_are_extracted() {
        let caps = Capabilities::new(["IMAP4rev1", "AUTH=PLAIN", "AUTH=CRAM-MD5", "LOGINDISABLED"]);
        let mut mechs = caps.auth_mechanisms();
        mechs.sort();
        assert_eq!(mechs, vec!["CRAM-MD5".to_string(), "PLAIN".to_string()]);
        assert!(caps.login_disabled());
    }
}
