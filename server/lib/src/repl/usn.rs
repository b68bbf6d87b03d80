//! The two usn sequences an expansion works with. [UsnSet] is the set of
//! partner usns at which an entry changed, taken from its metadata, and is
//! what the update list is split along. [LocalUsnQueue] holds the usns this
//! replica assigns to the resulting updates.

use std::collections::{BTreeSet, VecDeque};

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsnSet {
    inner: BTreeSet<Usn>,
}

impl UsnSet {
    /// Collect every distinct local usn of the attribute and value metadata
    /// of `update`. An update with no metadata at all has no history to split
    /// and is an error here.
    pub fn from_update(update: &ReplicationUpdate) -> Result<Self, OperationError> {
        let inner: BTreeSet<Usn> = update
            .attribute_metadata
            .values()
            .map(|m| m.local_usn)
            .chain(update.value_metadata.iter().map(|vm| vm.local_usn))
            .collect();

        if inner.is_empty() {
            repl_error!(dn = %update.entry.get_dn(), "No metadata to build a usn set from");
            return Err(OperationError::InconsistentMetadata(
                MetadataInconsistency::NoMetadata,
            ));
        }

        Ok(UsnSet { inner })
    }

    /// The highest usn.
    pub fn head(&self) -> Option<Usn> {
        self.inner.last().copied()
    }

    /// The lowest usn.
    pub fn tail(&self) -> Option<Usn> {
        self.inner.first().copied()
    }

    pub fn iter_desc(&self) -> impl Iterator<Item = Usn> + '_ {
        self.inner.iter().rev().copied()
    }

    pub fn iter_asc(&self) -> impl Iterator<Item = Usn> + '_ {
        self.inner.iter().copied()
    }

    pub fn contains(&self, usn: Usn) -> bool {
        self.inner.contains(&usn)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Freshly allocated local usns, consumed oldest first. A queue belongs to a
/// single expansion.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LocalUsnQueue {
    inner: VecDeque<Usn>,
}

impl LocalUsnQueue {
    pub fn new(usns: impl IntoIterator<Item = Usn>) -> Self {
        LocalUsnQueue {
            inner: usns.into_iter().collect(),
        }
    }

    pub fn pop(&mut self) -> Option<Usn> {
        self.inner.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// The source of this replica's own usns. In a server this is the storage
/// engine's write sequence.
pub trait UsnAllocator {
    fn allocate(&mut self, count: usize) -> Result<LocalUsnQueue, OperationError>;
}

/// Hands out consecutive usns starting from a given value.
#[derive(Debug, Clone)]
pub struct SequentialUsnAllocator {
    next: Usn,
}

impl SequentialUsnAllocator {
    pub fn new(next: Usn) -> Self {
        SequentialUsnAllocator { next }
    }

    /// The usn the next allocation starts at.
    pub fn peek(&self) -> Usn {
        self.next
    }
}

impl UsnAllocator for SequentialUsnAllocator {
    fn allocate(&mut self, count: usize) -> Result<LocalUsnQueue, OperationError> {
        let end = Usn::try_from(count)
            .ok()
            .and_then(|c| self.next.checked_add(c))
            .ok_or_else(|| {
                admin_error!(next = self.next, count, "local usn space exhausted");
                OperationError::InconsistentMetadata(MetadataInconsistency::UsnQueueExhausted)
            })?;
        let queue = LocalUsnQueue::new(self.next..end);
        self.next = end;
        Ok(queue)
    }
}
