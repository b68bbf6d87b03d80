//! The update list expander turns the combined update of one entry into the
//! ordered list of operations that produced it.
//!
//! ```text
//!  Seeded ──▶ Splitting ──▶ Seeding ──▶ Finalizing ──▶ Done
//!    │                                      ▲
//!    └──────── (no metadata) ───────────────┘
//! ```
//!
//! Splitting peels one individual update per usn off the combined update,
//! newest first. Seeding turns the oldest of them into the creation of the
//! entry. Finalizing hands every update its bookkeeping attributes and its
//! local usn.

use std::collections::VecDeque;

use crate::prelude::*;
use crate::repl::populate::OperationAttributeOutcome;
use crate::repl::usn::{UsnAllocator, UsnSet};

/// What an expansion needs to know about the deployment.
#[derive(Clone, Copy)]
pub struct ExpandContext<'a> {
    pub schema: &'a dyn MustAttributeSchema,
    pub naming: &'a ReservedAttributes,
}

impl<'a> ExpandContext<'a> {
    pub fn new(schema: &'a dyn MustAttributeSchema, naming: &'a ReservedAttributes) -> Self {
        ExpandContext { schema, naming }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExpandState {
    Seeded,
    /// The usns still to split, highest first.
    Splitting(VecDeque<Usn>),
    Seeding,
    Finalizing { populate: bool },
    Done,
}

pub struct UpdateListExpander<'a> {
    combined: ReplicationUpdate,
    ctx: ExpandContext<'a>,
    state: ExpandState,
    /// Newest first while splitting, oldest first from seeding on.
    updates: Vec<ReplicationUpdate>,
}

impl<'a> UpdateListExpander<'a> {
    pub fn new(combined: ReplicationUpdate, ctx: ExpandContext<'a>) -> Self {
        UpdateListExpander {
            combined,
            ctx,
            state: ExpandState::Seeded,
            updates: Vec::new(),
        }
    }

    /// Drive the expansion to completion, returning the updates oldest first.
    #[instrument(
        level = "debug",
        name = "expand",
        skip_all,
        fields(dn = %self.combined.entry.get_dn())
    )]
    pub fn run(
        self,
        allocator: &mut dyn UsnAllocator,
    ) -> Result<Vec<ReplicationUpdate>, OperationError> {
        let mut expander = self;
        while expander.state != ExpandState::Done {
            expander.step(allocator)?;
        }
        Ok(expander.updates)
    }

    /// The combined update in its current state. After a complete expansion
    /// this is the artifact left behind by splitting.
    pub fn combined(&self) -> &ReplicationUpdate {
        &self.combined
    }

    fn step(&mut self, allocator: &mut dyn UsnAllocator) -> Result<(), OperationError> {
        let state = std::mem::replace(&mut self.state, ExpandState::Done);
        self.state = match state {
            ExpandState::Seeded => self.seeded()?,
            ExpandState::Splitting(pending) => self.splitting(pending)?,
            ExpandState::Seeding => self.seeding()?,
            ExpandState::Finalizing { populate } => self.finalizing(populate, allocator)?,
            ExpandState::Done => ExpandState::Done,
        };
        Ok(())
    }

    fn seeded(&mut self) -> Result<ExpandState, OperationError> {
        if !self.combined.has_metadata() {
            // Nothing to split along, the entry is created as is.
            debug!("no metadata, expanding to a single add");
            let mut add = self.combined.clone();
            add.sync_state = SyncState::Add;
            self.updates.push(add);
            return Ok(ExpandState::Finalizing { populate: false });
        }

        let usns = UsnSet::from_update(&self.combined)?;
        trace!(head = ?usns.head(), tail = ?usns.tail(), count = usns.len(), "usn set");
        Ok(ExpandState::Splitting(usns.iter_desc().collect()))
    }

    fn splitting(&mut self, mut pending: VecDeque<Usn>) -> Result<ExpandState, OperationError> {
        if let Some(usn) = pending.pop_front() {
            let mut individual = self
                .combined
                .extract_attribute_changes(usn, self.ctx.naming);
            self.combined.extract_value_changes(usn, &mut individual);
            self.updates.push(individual);
            return Ok(ExpandState::Splitting(pending));
        }

        let naming = self.ctx.naming;
        let leftover = self
            .combined
            .attribute_metadata
            .iter()
            .find(|(attr, _)| !naming.is_bookkeeping(attr))
            .map(|(_, meta)| meta.local_usn)
            .or_else(|| self.combined.value_metadata.first().map(|vm| vm.local_usn));

        if let Some(usn) = leftover {
            admin_error!(usn, "metadata left in combined update after splitting");
            return Err(OperationError::InconsistentMetadata(
                MetadataInconsistency::UsnOutsideSet(usn),
            ));
        }

        Ok(ExpandState::Seeding)
    }

    fn seeding(&mut self) -> Result<ExpandState, OperationError> {
        self.updates.reverse();

        if self.combined.sync_state == SyncState::Add {
            if let Some((earliest, later)) = self.updates.split_first_mut() {
                earliest.sync_state = SyncState::Add;
                self.combined.partner_usn = earliest.partner_usn;
                self.combined.populate_must_attributes(
                    earliest,
                    later,
                    self.ctx.schema,
                    self.ctx.naming,
                )?;
            }
        }

        Ok(ExpandState::Finalizing { populate: true })
    }

    fn finalizing(
        &mut self,
        populate: bool,
        allocator: &mut dyn UsnAllocator,
    ) -> Result<ExpandState, OperationError> {
        let naming = self.ctx.naming;

        if populate {
            let creates = self.combined.sync_state == SyncState::Add;
            let mut tombstone = None;
            for (idx, update) in self.updates.iter_mut().enumerate() {
                if let OperationAttributeOutcome::Tombstone { last_known_dn } =
                    self.combined.populate_operation_attributes(update, naming)?
                {
                    if tombstone.is_none() {
                        tombstone = Some((idx, last_known_dn));
                    }
                }
            }

            // The entry is deleted by its newest update. Everything before
            // that happened under the live name.
            if let Some((idx, last_known_dn)) = tombstone {
                if let Some((last, earlier)) = self.updates.split_last_mut() {
                    if let Some(deletion) = earlier.get(idx) {
                        debug!(
                            deleted_at = deletion.partner_usn,
                            usn = last.partner_usn,
                            "changes follow the deletion, moving it to the newest update"
                        );
                        last.take_over_deletion(deletion, naming);
                    }
                    for (pos, update) in earlier.iter_mut().enumerate() {
                        if update.sync_state == SyncState::Delete {
                            update.sync_state = if pos == 0 && creates {
                                SyncState::Add
                            } else {
                                SyncState::Modify
                            };
                        }
                        update.entry.set_dn(&last_known_dn);
                    }
                }
            }
        }

        let mut queue = allocator.allocate(self.updates.len())?;
        for update in self.updates.iter_mut() {
            update.remap_local_usn(&mut queue, naming)?;
        }

        if !queue.is_empty() {
            admin_error!(remaining = queue.len(), "local usns allocated but not used");
            return Err(OperationError::InconsistentMetadata(
                MetadataInconsistency::UsnQueueNotDrained(queue.len()),
            ));
        }

        debug!(count = self.updates.len(), "expansion complete");
        Ok(ExpandState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repl::metadata::origin_for_test;
    use crate::repl::usn::{LocalUsnQueue, SequentialUsnAllocator};

    /// Hands out more usns than asked for.
    struct GreedyAllocator;

    impl UsnAllocator for GreedyAllocator {
        fn allocate(&mut self, count: usize) -> Result<LocalUsnQueue, OperationError> {
            Ok(LocalUsnQueue::new(1000..1000 + count as u64 + 1))
        }
    }

    /// Hands out fewer usns than asked for.
    struct StingyAllocator;

    impl UsnAllocator for StingyAllocator {
        fn allocate(&mut self, count: usize) -> Result<LocalUsnQueue, OperationError> {
            Ok(LocalUsnQueue::new(1000..1000 + count.saturating_sub(1) as u64))
        }
    }

    fn simple_combined() -> ReplicationUpdate {
        let entry = Entry::new("cn=g,dc=example,dc=com")
            .with_ava("objectClass", b"top")
            .with_ava("cn", b"g")
            .with_ava("description", b"d")
            .with_ava("usnChanged", b"101");
        let mut combined = ReplicationUpdate::new(entry, SyncState::Add, 101);
        combined.add_attribute_metadata(
            "objectclass",
            AttributeMetadata::new(100, 1, origin_for_test(100)),
        );
        combined.add_attribute_metadata("cn", AttributeMetadata::new(100, 1, origin_for_test(100)));
        combined.add_attribute_metadata(
            "description",
            AttributeMetadata::new(101, 2, origin_for_test(101)),
        );
        combined.add_attribute_metadata(
            "usnchanged",
            AttributeMetadata::new(101, 2, origin_for_test(101)),
        );
        combined
    }

    #[test]
    fn test_expand_state_sequence() {
        sketching::test_init();
        let schema = Schema::core();
        let naming = ReservedAttributes::default();
        let mut allocator = SequentialUsnAllocator::new(500);
        let mut expander =
            UpdateListExpander::new(simple_combined(), ExpandContext::new(&schema, &naming));

        expander.step(&mut allocator).expect("seeded");
        assert_eq!(expander.state, ExpandState::Splitting(VecDeque::from([101, 100])));
        expander.step(&mut allocator).expect("split 101");
        expander.step(&mut allocator).expect("split 100");
        expander.step(&mut allocator).expect("split done");
        assert_eq!(expander.state, ExpandState::Seeding);
        assert_eq!(expander.updates.len(), 2);
        expander.step(&mut allocator).expect("seeding");
        assert_eq!(expander.state, ExpandState::Finalizing { populate: true });
        assert_eq!(expander.updates[0].sync_state, SyncState::Add);
        assert_eq!(expander.combined().partner_usn, 100);
        expander.step(&mut allocator).expect("finalizing");
        assert_eq!(expander.state, ExpandState::Done);

        let usns: Vec<_> = expander.updates.iter().map(|u| u.partner_usn).collect();
        assert_eq!(usns, vec![500, 501]);
        assert_eq!(allocator.peek(), 502);
    }

    #[test]
    fn test_expand_no_metadata_short_circuits() {
        let schema = Schema::core();
        let naming = ReservedAttributes::default();
        let mut allocator = SequentialUsnAllocator::new(7);
        let entry = Entry::new("cn=n").with_ava("cn", b"n").with_ava("usnChanged", b"3");
        let combined = ReplicationUpdate::new(entry, SyncState::Modify, 3);

        let updates = UpdateListExpander::new(combined, ExpandContext::new(&schema, &naming))
            .run(&mut allocator)
            .expect("expand");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].sync_state, SyncState::Add);
        assert_eq!(updates[0].partner_usn, 7);
        assert_eq!(updates[0].original_usn, Some(3));
        assert_eq!(updates[0].entry.get_ava_single_str("cn"), Some("n"));
        assert_eq!(updates[0].entry.get_ava_single_str("usnchanged"), Some("7"));
    }

    #[test]
    fn test_expand_leftover_metadata() {
        let schema = Schema::core();
        let naming = ReservedAttributes::default();
        let mut allocator = SequentialUsnAllocator::new(500);
        let mut expander =
            UpdateListExpander::new(simple_combined(), ExpandContext::new(&schema, &naming));
        expander.step(&mut allocator).expect("seeded");
        // A record appearing mid expansion is outside of the usn set.
        expander
            .combined
            .add_attribute_metadata("sn", AttributeMetadata::new(42, 1, origin_for_test(42)));
        let err = loop {
            if let Err(e) = expander.step(&mut allocator) {
                break e;
            }
        };
        assert_eq!(
            err,
            OperationError::InconsistentMetadata(MetadataInconsistency::UsnOutsideSet(42))
        );
    }

    #[test]
    fn test_expand_queue_not_drained() {
        let schema = Schema::core();
        let naming = ReservedAttributes::default();
        let err = UpdateListExpander::new(simple_combined(), ExpandContext::new(&schema, &naming))
            .run(&mut GreedyAllocator)
            .expect_err("queue not drained");
        assert_eq!(
            err,
            OperationError::InconsistentMetadata(MetadataInconsistency::UsnQueueNotDrained(1))
        );
    }

    #[test]
    fn test_expand_queue_exhausted() {
        let schema = Schema::core();
        let naming = ReservedAttributes::default();
        let err = UpdateListExpander::new(simple_combined(), ExpandContext::new(&schema, &naming))
            .run(&mut StingyAllocator)
            .expect_err("queue exhausted");
        assert_eq!(
            err,
            OperationError::InconsistentMetadata(MetadataInconsistency::UsnQueueExhausted)
        );
    }

    #[test]
    fn test_expand_combined_modify_has_no_add() {
        let schema = Schema::core();
        let naming = ReservedAttributes::default();
        let mut combined = simple_combined();
        combined.sync_state = SyncState::Modify;
        let updates = UpdateListExpander::new(combined, ExpandContext::new(&schema, &naming))
            .run(&mut SequentialUsnAllocator::new(1))
            .expect("expand");
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.sync_state == SyncState::Modify));
    }
}
