//! The replication engine needs exactly one thing from [`Schema`]: which
//! attributes an entry of a given set of classes must carry. The earliest
//! update of an expanded entry is the one that creates it, so it has to hold
//! every one of those attributes or the consumer will refuse it.
//!
//! Validation of values, syntaxes and may attributes belongs to the storage
//! engine and is not modelled here.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::prelude::*;

/// The predicate the must attribute populator consults. This is a trait so
/// that a deployment can hand in its live schema rather than [`Schema`].
pub trait MustAttributeSchema {
    /// The full set of attributes required by `classes`, including those
    /// inherited through superclasses. Attribute types are normalised.
    fn must_attributes(&self, classes: &BTreeSet<AttrString>) -> BTreeSet<AttrString>;

    fn is_must(&self, classes: &BTreeSet<AttrString>, attr: &str) -> bool {
        self.must_attributes(classes)
            .contains(&normalise_attr(attr))
    }
}

/// A class definition. `systemmust` is what the core schema provides and can
/// not be removed by configuration, `must` is what a deployment adds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaClass {
    #[serde(skip)]
    pub systemmust: Vec<AttrString>,
    #[serde(default)]
    pub must: Vec<AttrString>,
    /// Superclasses. Their must attributes are required as well.
    #[serde(default)]
    pub sup: Vec<AttrString>,
}

impl SchemaClass {
    fn system(systemmust: &[&str], sup: &[&str]) -> Self {
        SchemaClass {
            systemmust: systemmust.iter().map(|a| normalise_attr(a)).collect(),
            must: Vec::new(),
            sup: sup.iter().map(|a| normalise_attr(a)).collect(),
        }
    }

    pub fn must_iter(&self) -> impl Iterator<Item = &AttrString> {
        self.systemmust.iter().chain(self.must.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    classes: BTreeMap<AttrString, SchemaClass>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::core()
    }
}

impl Schema {
    /// The classes every directory carries.
    pub fn core() -> Self {
        let mut classes = BTreeMap::new();
        classes.insert(
            normalise_attr("top"),
            SchemaClass::system(&[ATTR_OBJECT_CLASS], &[]),
        );
        classes.insert(
            normalise_attr("person"),
            SchemaClass::system(&["cn", "sn"], &["top"]),
        );
        classes.insert(
            normalise_attr("organizationalPerson"),
            SchemaClass::system(&[], &["person"]),
        );
        classes.insert(
            normalise_attr("user"),
            SchemaClass::system(&[], &["organizationalPerson"]),
        );
        classes.insert(
            normalise_attr("group"),
            SchemaClass::system(&["cn"], &["top"]),
        );
        classes.insert(
            normalise_attr(OC_DELETED_OBJECT),
            SchemaClass::system(&[], &["top"]),
        );
        Schema { classes }
    }

    /// Merge deployment defined classes over the core schema. A class that
    /// already exists keeps its system attributes and gains the configured
    /// ones.
    pub fn with_classes(mut self, extra: BTreeMap<AttrString, SchemaClass>) -> Self {
        for (name, class) in extra {
            let must: Vec<AttrString> = class.must.iter().map(|a| normalise_attr(a)).collect();
            let sup: Vec<AttrString> = class.sup.iter().map(|a| normalise_attr(a)).collect();
            let entry = self.classes.entry(normalise_attr(&name)).or_default();
            entry.must.extend(must);
            entry.sup.extend(sup);
        }

        for (name, class) in self.classes.iter() {
            for sup in class.sup.iter().filter(|s| !self.classes.contains_key(*s)) {
                admin_warn!(class = %name, %sup, "superclass is not defined in the schema");
            }
        }
        self
    }
}

impl MustAttributeSchema for Schema {
    fn must_attributes(&self, classes: &BTreeSet<AttrString>) -> BTreeSet<AttrString> {
        let mut must = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut work: Vec<AttrString> = classes.iter().map(|c| normalise_attr(c)).collect();

        while let Some(name) = work.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            match self.classes.get(&name) {
                Some(class) => {
                    must.extend(class.must_iter().map(|a| normalise_attr(a)));
                    work.extend(class.sup.iter().cloned());
                }
                None => {
                    trace!(class = %name, "class not in schema, no must attributes");
                }
            }
        }
        must
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(names: &[&str]) -> BTreeSet<AttrString> {
        names.iter().map(|n| normalise_attr(n)).collect()
    }

    #[test]
    fn test_schema_must_walks_superclasses() {
        let schema = Schema::core();
        let must = schema.must_attributes(&classes(&["user"]));
        assert!(must.contains("cn"));
        assert!(must.contains("sn"));
        assert!(must.contains("objectclass"));
        assert!(schema.is_must(&classes(&["User"]), "SN"));
        assert!(!schema.is_must(&classes(&["group"]), "sn"));
    }

    #[test]
    fn test_schema_unknown_class_is_ignored() {
        let schema = Schema::core();
        assert!(schema.must_attributes(&classes(&["nosuchclass"])).is_empty());
    }

    #[test]
    fn test_schema_superclass_cycle_terminates() {
        let mut extra = BTreeMap::new();
        extra.insert(
            normalise_attr("a"),
            SchemaClass {
                systemmust: Vec::new(),
                must: vec!["x".into()],
                sup: vec!["b".into()],
            },
        );
        extra.insert(
            normalise_attr("b"),
            SchemaClass {
                systemmust: Vec::new(),
                must: vec!["y".into()],
                sup: vec!["a".into()],
            },
        );
        let schema = Schema::core().with_classes(extra);
        let must = schema.must_attributes(&classes(&["a"]));
        assert_eq!(must, classes(&["x", "y"]));
    }

    #[test]
    fn test_schema_configured_class_extends_core() {
        let mut extra = BTreeMap::new();
        extra.insert(
            normalise_attr("Person"),
            SchemaClass {
                systemmust: Vec::new(),
                must: vec!["employeeNumber".into()],
                sup: Vec::new(),
            },
        );
        let schema = Schema::core().with_classes(extra);
        let must = schema.must_attributes(&classes(&["person"]));
        assert!(must.contains("employeenumber"));
        assert!(must.contains("sn"));
    }
}
