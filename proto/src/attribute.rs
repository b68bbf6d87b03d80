pub use smartstring::alias::String as AttrString;

/// Attribute types in a directory are case insensitive. Every map keyed by an
/// attribute type in dirsync is keyed by this normalised form.
pub fn normalise_attr(attr: &str) -> AttrString {
    if attr.bytes().any(|b| b.is_ascii_uppercase()) {
        attr.to_ascii_lowercase().into()
    } else {
        attr.into()
    }
}

/// Case insensitive comparison of two attribute types (or two class names).
pub fn attr_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_attr() {
        assert_eq!(normalise_attr("uSNChanged").as_str(), "usnchanged");
        assert_eq!(normalise_attr("cn").as_str(), "cn");
        assert!(attr_eq("objectGUID", "objectguid"));
        assert!(!attr_eq("cn", "sn"));
    }
}
