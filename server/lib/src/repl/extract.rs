//! Splitting one usn worth of changes out of a combined update.
//!
//! Extraction always runs from the highest usn downwards. After each call the
//! combined update describes the entry as it was just before the extracted
//! usn, which is what the next, older, call relies on.

use crate::prelude::*;

impl ReplicationUpdate {
    /// Move every attribute changed at `usn` out of this combined update into
    /// a new individual update. The change sequence and global identifier
    /// attributes stay behind, they are derived for each individual update
    /// separately.
    #[instrument(level = "trace", skip(self, naming))]
    pub fn extract_attribute_changes(
        &mut self,
        usn: Usn,
        naming: &ReservedAttributes,
    ) -> ReplicationUpdate {
        let mut individual =
            ReplicationUpdate::new(Entry::new(self.entry.get_dn()), SyncState::Modify, usn);

        let matched: Vec<AttrString> = self
            .attribute_metadata
            .iter()
            .filter(|(attr, meta)| meta.local_usn == usn && !naming.is_bookkeeping(attr))
            .map(|(attr, _)| attr.clone())
            .collect();

        for attr in matched {
            let Some(meta) = self.attribute_metadata.remove(&attr) else {
                continue;
            };
            // Metadata without a value is a change that removed the attribute.
            match self.entry.take_ava(&attr) {
                Some(values) => {
                    trace!(%attr, count = values.len(), "moving attribute");
                    individual.entry.set_ava(&attr, values);
                }
                None => {
                    trace!(%attr, "moving attribute removal");
                }
            }
            individual.attribute_metadata.insert(attr, meta);
        }

        individual
    }

    /// Move every value change made at `usn` into `individual`. The combined
    /// entry has the change undone, the individual entry has it applied.
    ///
    /// A value change to an attribute that has already been moved to a newer
    /// update is not undone here. The newer update carries the complete value
    /// set of the attribute, so there is nothing left to roll back.
    #[instrument(level = "trace", skip(self, individual))]
    pub fn extract_value_changes(&mut self, usn: Usn, individual: &mut ReplicationUpdate) {
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.value_metadata)
            .into_iter()
            .partition(|vm| vm.local_usn == usn);
        self.value_metadata = kept;

        for vm in moved {
            let tracked = self.attribute_metadata.contains_key(&vm.attr)
                || self.entry.attribute_pres(&vm.attr);

            match vm.op {
                ValueOp::Add => {
                    if tracked {
                        self.entry.remove_ava(&vm.attr, &vm.value);
                    }
                    individual.entry.add_ava(&vm.attr, vm.value.clone());
                }
                ValueOp::Delete => {
                    if tracked {
                        self.entry.add_ava(&vm.attr, vm.value.clone());
                    }
                    individual.entry.remove_ava(&vm.attr, &vm.value);
                }
            }

            if !tracked {
                trace!(attr = %vm.attr, "attribute already moved, value change not undone");
            }

            individual.value_metadata.push(vm);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::repl::metadata::origin_for_test;

    fn member_combined() -> ReplicationUpdate {
        // Base {A, B, D}, C added at 102, D deleted at 103.
        let entry = Entry::new("cn=g,dc=example,dc=com")
            .with_ava("cn", b"g")
            .with_ava("member", b"A")
            .with_ava("member", b"B")
            .with_ava("member", b"C")
            .with_ava("usnChanged", b"103");
        let mut combined = ReplicationUpdate::new(entry, SyncState::Add, 103);
        combined.add_attribute_metadata("cn", AttributeMetadata::new(100, 1, origin_for_test(100)));
        combined
            .add_attribute_metadata("member", AttributeMetadata::new(100, 1, origin_for_test(100)));
        combined.add_attribute_metadata(
            "usnChanged",
            AttributeMetadata::new(103, 3, origin_for_test(103)),
        );
        combined.add_value_metadata(ValueMetadata::new(
            "member",
            102,
            1,
            origin_for_test(102),
            ValueOp::Add,
            b"C",
        ));
        combined.add_value_metadata(ValueMetadata::new(
            "member",
            103,
            1,
            origin_for_test(103),
            ValueOp::Delete,
            b"D",
        ));
        combined
    }

    #[test]
    fn test_extract_attribute_changes() {
        let naming = ReservedAttributes::default();
        let mut combined = member_combined();

        let individual = combined.extract_attribute_changes(100, &naming);
        assert_eq!(individual.sync_state, SyncState::Modify);
        assert_eq!(individual.partner_usn, 100);
        assert_eq!(individual.entry.get_dn(), "cn=g,dc=example,dc=com");
        assert!(individual.get_attribute_metadata("cn").is_some());
        assert!(individual.get_attribute_metadata("member").is_some());
        assert_eq!(individual.entry.get_ava("member").map(|v| v.len()), Some(3));

        assert!(!combined.entry.attribute_pres("cn"));
        assert!(!combined.entry.attribute_pres("member"));
        assert!(combined.get_attribute_metadata("cn").is_none());
        // Bookkeeping stays behind.
        assert!(combined.get_attribute_metadata("usnchanged").is_some());
        assert!(combined.entry.attribute_pres("usnchanged"));
    }

    #[test]
    fn test_extract_attribute_changes_no_match() {
        let naming = ReservedAttributes::default();
        let mut combined = member_combined();
        let before = combined.clone();
        let individual = combined.extract_attribute_changes(101, &naming);
        assert!(individual.attribute_metadata.is_empty());
        assert!(individual.entry.is_empty());
        assert_eq!(combined, before);

        // Bookkeeping only usn.
        let individual = combined.extract_attribute_changes(103, &naming);
        assert!(individual.attribute_metadata.is_empty());
        assert_eq!(combined, before);
    }

    #[test]
    fn test_extract_value_changes_descending() {
        let naming = ReservedAttributes::default();
        let mut combined = member_combined();

        let mut at_103 = combined.extract_attribute_changes(103, &naming);
        combined.extract_value_changes(103, &mut at_103);
        assert_eq!(at_103.value_metadata.len(), 1);
        assert!(at_103.value_metadata[0].is_delete());
        assert!(!at_103.entry.attribute_equality("member", b"D"));
        assert!(combined.entry.attribute_equality("member", b"D"));

        let mut at_102 = combined.extract_attribute_changes(102, &naming);
        combined.extract_value_changes(102, &mut at_102);
        assert_eq!(at_102.entry.get_ava("member"), Some([b"C".to_vec()].as_slice()));
        assert!(!combined.entry.attribute_equality("member", b"C"));

        assert!(combined.value_metadata.is_empty());
        let mut members: Vec<_> = combined
            .entry
            .get_ava("member")
            .map(|v| v.to_vec())
            .unwrap_or_default();
        members.sort();
        assert_eq!(members, vec![b"A".to_vec(), b"B".to_vec(), b"D".to_vec()]);
    }

    #[test]
    fn test_extract_value_changes_after_attribute_moved() {
        let naming = ReservedAttributes::default();
        let entry = Entry::new("cn=g").with_ava("member", b"A").with_ava("member", b"B");
        let mut combined = ReplicationUpdate::new(entry, SyncState::Modify, 105);
        combined
            .add_attribute_metadata("member", AttributeMetadata::new(105, 2, origin_for_test(105)));
        combined.add_value_metadata(ValueMetadata::new(
            "member",
            104,
            1,
            origin_for_test(104),
            ValueOp::Add,
            b"B",
        ));

        let mut at_105 = combined.extract_attribute_changes(105, &naming);
        combined.extract_value_changes(105, &mut at_105);
        assert_eq!(at_105.entry.get_ava("member").map(|v| v.len()), Some(2));

        let mut at_104 = combined.extract_attribute_changes(104, &naming);
        combined.extract_value_changes(104, &mut at_104);
        // Nothing to undo, the attribute went with the update at 105.
        assert!(!combined.entry.attribute_pres("member"));
        assert_eq!(at_104.entry.get_ava("member"), Some([b"B".to_vec()].as_slice()));
    }
}
