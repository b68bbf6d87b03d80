//! Entries are the unit of replication. An entry here is the in memory form of
//! a directory object as received from a partner: a distinguished name and a
//! set of attributes, each holding an ordered, duplicate free set of values.
//!
//! Attribute types are case insensitive. Every accessor normalises the type
//! it is given, so callers may use the names as they arrive from the wire.

use std::collections::{BTreeMap, BTreeSet};

use crate::prelude::*;

/// A single attribute value as raw bytes.
pub type AttrValue = Vec<u8>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    dn: String,
    attrs: BTreeMap<AttrString, Vec<AttrValue>>,
}

impl Entry {
    pub fn new(dn: &str) -> Self {
        Entry {
            dn: dn.to_string(),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder helper, mostly for assembling entries from decoded wire data.
    pub fn with_ava(mut self, attr: &str, value: &[u8]) -> Self {
        self.add_ava(attr, value.to_vec());
        self
    }

    pub fn get_dn(&self) -> &str {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: &str) {
        self.dn = dn.to_string();
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn attribute_pres(&self, attr: &str) -> bool {
        self.attrs.contains_key(&normalise_attr(attr))
    }

    pub fn get_ava(&self, attr: &str) -> Option<&[AttrValue]> {
        self.attrs.get(&normalise_attr(attr)).map(|v| v.as_slice())
    }

    /// The first value of an attribute, if it is valid utf8.
    pub fn get_ava_single_str(&self, attr: &str) -> Option<&str> {
        self.get_ava(attr)
            .and_then(|vs| vs.first())
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn attribute_equality(&self, attr: &str, value: &[u8]) -> bool {
        self.get_ava(attr)
            .map(|vs| vs.iter().any(|v| v.as_slice() == value))
            .unwrap_or(false)
    }

    /// Equality for values with case insensitive string syntax, such as class
    /// names and boolean flags.
    pub fn attribute_equality_ci(&self, attr: &str, value: &str) -> bool {
        self.get_ava(attr)
            .map(|vs| {
                vs.iter().any(|v| {
                    std::str::from_utf8(v)
                        .map(|s| attr_eq(s, value))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    /// Replace the values of an attribute. Duplicates in `values` are dropped,
    /// keeping the first occurrence.
    pub fn set_ava(&mut self, attr: &str, values: Vec<AttrValue>) {
        let mut seen = BTreeSet::new();
        let values: Vec<_> = values
            .into_iter()
            .filter(|v| seen.insert(v.clone()))
            .collect();
        self.attrs.insert(normalise_attr(attr), values);
    }

    /// Add a value, returning false if it was already present.
    pub fn add_ava(&mut self, attr: &str, value: AttrValue) -> bool {
        let vs = self.attrs.entry(normalise_attr(attr)).or_default();
        if vs.contains(&value) {
            false
        } else {
            vs.push(value);
            true
        }
    }

    /// Remove a value, returning false if it was not present. An attribute
    /// left without values is removed from the entry.
    pub fn remove_ava(&mut self, attr: &str, value: &[u8]) -> bool {
        let attr = normalise_attr(attr);
        let Some(vs) = self.attrs.get_mut(&attr) else {
            return false;
        };
        let before = vs.len();
        vs.retain(|v| v.as_slice() != value);
        let removed = vs.len() != before;
        if vs.is_empty() {
            self.attrs.remove(&attr);
        }
        removed
    }

    /// Move an attribute and all of its values out of this entry.
    pub fn take_ava(&mut self, attr: &str) -> Option<Vec<AttrValue>> {
        self.attrs.remove(&normalise_attr(attr))
    }

    /// The object classes of this entry, normalised the same way as attribute
    /// types so that they can be compared directly.
    pub fn object_classes(&self, naming: &ReservedAttributes) -> BTreeSet<AttrString> {
        self.get_ava(&naming.object_class)
            .map(|vs| {
                vs.iter()
                    .filter_map(|v| std::str::from_utf8(v).ok())
                    .map(normalise_attr)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_deleted_flag(&self, naming: &ReservedAttributes) -> bool {
        self.attribute_equality_ci(&naming.deleted_flag, IS_DELETED_TRUE)
    }

    pub fn has_deleted_class(&self, naming: &ReservedAttributes) -> bool {
        self.attribute_equality_ci(&naming.object_class, &naming.deleted_object_class)
    }

    /// A complete tombstone carries both the deleted flag and the deleted
    /// object class.
    pub fn is_tombstone(&self, naming: &ReservedAttributes) -> bool {
        self.has_deleted_flag(naming) && self.has_deleted_class(naming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_values_are_a_set() {
        let mut e = Entry::new("cn=a,dc=example,dc=com");
        assert!(e.add_ava("member", b"cn=x".to_vec()));
        assert!(!e.add_ava("Member", b"cn=x".to_vec()));
        assert!(e.add_ava("member", b"cn=y".to_vec()));
        assert_eq!(e.get_ava("MEMBER").map(|v| v.len()), Some(2));

        e.set_ava("cn", vec![b"a".to_vec(), b"b".to_vec(), b"a".to_vec()]);
        assert_eq!(e.get_ava("cn"), Some([b"a".to_vec(), b"b".to_vec()].as_slice()));
    }

    #[test]
    fn test_entry_remove_last_value_purges() {
        let mut e = Entry::new("cn=a").with_ava("member", b"cn=x");
        assert!(!e.remove_ava("member", b"cn=y"));
        assert!(e.remove_ava("member", b"cn=x"));
        assert!(!e.attribute_pres("member"));
        assert!(!e.remove_ava("member", b"cn=x"));
    }

    #[test]
    fn test_entry_take_ava() {
        let mut e = Entry::new("cn=a").with_ava("cn", b"a").with_ava("sn", b"b");
        assert_eq!(e.take_ava("CN"), Some(vec![b"a".to_vec()]));
        assert!(!e.attribute_pres("cn"));
        assert!(e.take_ava("cn").is_none());
        assert_eq!(e.get_ava_single_str("sn"), Some("b"));
    }

    #[test]
    fn test_entry_tombstone_markers() {
        let naming = ReservedAttributes::default();
        let e = Entry::new("cn=a#guid,cn=Deleted Objects")
            .with_ava("isDeleted", b"TRUE")
            .with_ava("objectClass", b"top")
            .with_ava("objectClass", b"deletedObject");
        assert!(e.has_deleted_flag(&naming));
        assert!(e.has_deleted_class(&naming));
        assert!(e.is_tombstone(&naming));
        assert!(e.object_classes(&naming).contains("deletedobject"));

        let e = Entry::new("cn=a").with_ava("isDeleted", b"FALSE");
        assert!(!e.has_deleted_flag(&naming));
        assert!(!e.is_tombstone(&naming));
    }
}
