use std::collections::BTreeMap;

use crate::prelude::*;
use crate::repl::cookie::SyncDoneCookie;
use crate::repl::expand::{ExpandContext, UpdateListExpander};
use crate::repl::usn::{LocalUsnQueue, UsnAllocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Add,
    Modify,
    Delete,
}

/// One entry and the change history attached to it. As received from a
/// partner this is the combined update of an entry; after expansion each one
/// is a single replayable operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationUpdate {
    pub entry: Entry,
    pub attribute_metadata: BTreeMap<AttrString, AttributeMetadata>,
    pub value_metadata: Vec<ValueMetadata>,
    pub sync_state: SyncState,
    pub partner_usn: Usn,
    /// The partner usn this update was expanded for, set once it has been
    /// given a local usn.
    pub original_usn: Option<Usn>,
}

impl ReplicationUpdate {
    pub fn new(entry: Entry, sync_state: SyncState, partner_usn: Usn) -> Self {
        ReplicationUpdate {
            entry,
            attribute_metadata: BTreeMap::new(),
            value_metadata: Vec::new(),
            sync_state,
            partner_usn,
            original_usn: None,
        }
    }

    /// Record the latest change of an attribute, replacing any earlier record
    /// for the same type.
    pub fn add_attribute_metadata(&mut self, attr: &str, meta: AttributeMetadata) {
        self.attribute_metadata.insert(normalise_attr(attr), meta);
    }

    pub fn add_value_metadata(&mut self, meta: ValueMetadata) {
        self.value_metadata.push(meta);
    }

    pub fn get_attribute_metadata(&self, attr: &str) -> Option<&AttributeMetadata> {
        self.attribute_metadata.get(&normalise_attr(attr))
    }

    pub fn has_metadata(&self) -> bool {
        !self.attribute_metadata.is_empty() || !self.value_metadata.is_empty()
    }

    /// The origin to give metadata that the engine synthesizes for this
    /// update. This is the origin of the creation record when there is one,
    /// otherwise of any change recorded at this update's usn.
    pub(crate) fn seed_origin(&self, naming: &ReservedAttributes) -> Option<Origin> {
        self.attribute_metadata
            .get(&naming.creation_sequence)
            .or_else(|| {
                self.attribute_metadata
                    .values()
                    .find(|m| m.local_usn == self.partner_usn)
            })
            .or_else(|| self.attribute_metadata.values().next())
            .map(|m| m.origin.clone())
            .or_else(|| self.value_metadata.first().map(|vm| vm.origin.clone()))
    }

    /// Give this update the next local usn from `queue`. Metadata recorded at
    /// the partner usn of the update and the visible change sequence value
    /// move to the local usn with it.
    #[instrument(level = "trace", skip_all, fields(partner_usn = self.partner_usn))]
    pub fn remap_local_usn(
        &mut self,
        queue: &mut LocalUsnQueue,
        naming: &ReservedAttributes,
    ) -> Result<(), OperationError> {
        let local = queue.pop().ok_or_else(|| {
            admin_error!(
                dn = %self.entry.get_dn(),
                "local usn queue exhausted before every update was remapped"
            );
            OperationError::InconsistentMetadata(MetadataInconsistency::UsnQueueExhausted)
        })?;

        let original = self.partner_usn;

        self.attribute_metadata
            .values_mut()
            .filter(|m| m.local_usn == original)
            .for_each(|m| m.local_usn = local);

        self.value_metadata
            .iter_mut()
            .filter(|vm| vm.local_usn == original)
            .for_each(|vm| vm.local_usn = local);

        if self.entry.attribute_pres(&naming.change_sequence) {
            self.entry
                .set_ava(&naming.change_sequence, vec![local.to_string().into_bytes()]);
        }

        self.partner_usn = local;
        self.original_usn.get_or_insert(original);

        trace!(original, local, "remapped");
        Ok(())
    }
}

/// An entry that could not be expanded this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub dn: String,
    pub error: OperationError,
}

/// Everything one synchronization cycle produced, in the order the storage
/// engine must apply it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationUpdateList {
    pub updates: Vec<ReplicationUpdate>,
    pub new_high_water_mark: Usn,
    pub new_up_to_date_vector: String,
    pub skipped: Vec<SkippedEntry>,
}

impl ReplicationUpdateList {
    pub fn new(cookie: &SyncDoneCookie) -> Self {
        repl_info!(
            hwm = cookie.high_water_mark,
            utd = %cookie.up_to_date_vector,
            "starting update list"
        );
        ReplicationUpdateList {
            updates: Vec::new(),
            new_high_water_mark: cookie.high_water_mark,
            new_up_to_date_vector: cookie.up_to_date_vector.clone(),
            skipped: Vec::new(),
        }
    }

    /// Expand one combined update and append the result. An entry that lacks
    /// a required attribute is recorded in `skipped` and the cycle goes on,
    /// any other error ends the cycle and must be returned to the session.
    #[instrument(level = "debug", skip_all, fields(dn = %combined.entry.get_dn()))]
    pub fn expand_entry(
        &mut self,
        combined: ReplicationUpdate,
        ctx: ExpandContext<'_>,
        allocator: &mut dyn UsnAllocator,
    ) -> Result<(), OperationError> {
        let dn = combined.entry.get_dn().to_string();

        match UpdateListExpander::new(combined, ctx).run(allocator) {
            Ok(mut updates) => {
                repl_trace!(count = updates.len(), "entry expanded");
                self.updates.append(&mut updates);
                Ok(())
            }
            Err(err) => match err.disposition() {
                ErrorDisposition::SkipEntry => {
                    repl_warn!(?err, %dn, "entry flagged inconsistent, skipping");
                    self.skipped.push(SkippedEntry { dn, error: err });
                    Ok(())
                }
                ErrorDisposition::AbortCycle => {
                    repl_error!(?err, %dn, "failed to expand entry, cycle must be discarded");
                    Err(err)
                }
            },
        }
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicationUpdate> {
        self.updates.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repl::metadata::origin_for_test;

    #[test]
    fn test_remap_rewrites_matching_usns() {
        let naming = ReservedAttributes::default();
        let mut update = ReplicationUpdate::new(
            Entry::new("cn=a").with_ava("usnChanged", b"12"),
            SyncState::Modify,
            12,
        );
        update.add_attribute_metadata("cn", AttributeMetadata::new(12, 2, origin_for_test(12)));
        update.add_attribute_metadata(
            "objectGUID",
            AttributeMetadata::new(9, 1, origin_for_test(9)),
        );
        update.add_value_metadata(ValueMetadata::new(
            "member",
            12,
            1,
            origin_for_test(12),
            ValueOp::Add,
            b"cn=x",
        ));

        // Queue is consumed oldest first.
        let mut queue = LocalUsnQueue::new([10, 12]);
        update.remap_local_usn(&mut queue, &naming).expect("remap");

        assert_eq!(update.partner_usn, 10);
        assert_eq!(update.original_usn, Some(12));
        assert_eq!(update.get_attribute_metadata("cn").map(|m| m.local_usn), Some(10));
        assert_eq!(
            update.get_attribute_metadata("objectguid").map(|m| m.local_usn),
            Some(9)
        );
        assert_eq!(update.value_metadata[0].local_usn, 10);
        assert_eq!(update.entry.get_ava_single_str("usnchanged"), Some("10"));
        assert_eq!(queue.pop(), Some(12));
    }

    #[test]
    fn test_remap_exhausted_queue() {
        let naming = ReservedAttributes::default();
        let mut update = ReplicationUpdate::new(Entry::new("cn=a"), SyncState::Add, 5);
        let mut queue = LocalUsnQueue::default();
        assert_eq!(
            update.remap_local_usn(&mut queue, &naming),
            Err(OperationError::InconsistentMetadata(
                MetadataInconsistency::UsnQueueExhausted
            ))
        );
        assert_eq!(update.partner_usn, 5);
        assert_eq!(update.original_usn, None);
    }

    #[test]
    fn test_attribute_metadata_keyed_by_type() {
        let mut update = ReplicationUpdate::new(Entry::new("cn=a"), SyncState::Add, 5);
        update.add_attribute_metadata("CN", AttributeMetadata::new(3, 1, origin_for_test(3)));
        update.add_attribute_metadata("cn", AttributeMetadata::new(5, 2, origin_for_test(5)));
        assert_eq!(update.attribute_metadata.len(), 1);
        assert_eq!(update.get_attribute_metadata("Cn").map(|m| m.version), Some(2));
        assert!(update.has_metadata());
    }
}
