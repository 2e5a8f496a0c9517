//! Search primitives: entry representation, scope, and filter escaping.

use std::collections::HashMap;

use ldap3::{ResultEntry, SearchEntry};
use serde::{Deserialize, Serialize};

/// A directory entry returned from a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,

    /// Text attributes.
    pub attributes: HashMap<String, Vec<String>>,

    /// Binary attributes (e.g. certificates, photos).
    pub binary_attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    /// Converts a raw protocol entry.
    #[must_use]
    pub fn from_result_entry(entry: ResultEntry) -> Self {
        let entry = SearchEntry::construct(entry);
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
            binary_attributes: entry.bin_attrs,
        }
    }

    /// Returns the first value of a text attribute.
    #[must_use]
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns all values of a text attribute.
    #[must_use]
    pub fn get_attrs(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// Returns the first value of a binary attribute.
    #[must_use]
    pub fn get_binary_attr(&self, name: &str) -> Option<&[u8]> {
        self.binary_attributes
            .get(name)
            .and_then(|values| values.first())
            .map(Vec::as_slice)
    }

    /// Checks whether the entry carries the attribute, text or binary.
    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name) || self.binary_attributes.contains_key(name)
    }
}

/// Scope of a directory search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchScope {
    /// The base entry only.
    Base,

    /// Direct children of the base entry.
    OneLevel,

    /// The base entry and its whole subtree.
    #[default]
    Subtree,
}

impl SearchScope {
    pub(crate) fn to_ldap3(self) -> ldap3::Scope {
        match self {
            Self::Base => ldap3::Scope::Base,
            Self::OneLevel => ldap3::Scope::OneLevel,
            Self::Subtree => ldap3::Scope::Subtree,
        }
    }
}

/// Escapes a value for interpolation into a search filter (RFC 4515).
///
/// Always run user-supplied values through this before building a filter;
/// unescaped parentheses or wildcards change the filter's meaning.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\5c"),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_filter_metacharacters() {
        assert_eq!(escape_filter_value("a*b"), "a\\2ab");
        assert_eq!(escape_filter_value("(admin)"), "\\28admin\\29");
        assert_eq!(escape_filter_value("back\\slash"), "back\\5cslash");
        assert_eq!(escape_filter_value("plain"), "plain");
    }

    #[test]
    fn escaped_value_neutralizes_injection() {
        let hostile = "*)(objectClass=*";
        let filter = format!("(cn={})", escape_filter_value(hostile));
        assert_eq!(filter, "(cn=\\2a\\29\\28objectClass=\\2a)");
    }

    #[test]
    fn entry_attribute_access() {
        let mut attributes = HashMap::new();
        attributes.insert(
            "mail".to_string(),
            vec!["a@example.com".to_string(), "b@example.com".to_string()],
        );
        let mut binary_attributes = HashMap::new();
        binary_attributes.insert("userCertificate".to_string(), vec![vec![0x30, 0x82]]);

        let entry = DirectoryEntry {
            dn: "uid=a,dc=example,dc=com".to_string(),
            attributes,
            binary_attributes,
        };

        assert_eq!(entry.get_attr("mail"), Some("a@example.com"));
        assert_eq!(entry.get_attrs("mail").map(<[String]>::len), Some(2));
        assert_eq!(entry.get_binary_attr("userCertificate"), Some(&[0x30, 0x82][..]));
        assert!(entry.has_attr("userCertificate"));
        assert!(!entry.has_attr("uid"));
        assert_eq!(entry.get_attr("uid"), None);
    }

    #[test]
    fn scope_serializes_screaming_snake() {
        let json = serde_json::to_string(&SearchScope::OneLevel).unwrap();
        assert_eq!(json, "\"ONE_LEVEL\"");
        assert_eq!(SearchScope::default(), SearchScope::Subtree);
    }
}
