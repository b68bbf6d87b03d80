//! Filling in what splitting alone can not reconstruct. The earliest update
//! of a new entry has to carry every attribute its classes require, and each
//! individual update needs its own copy of the bookkeeping attributes.

use crate::prelude::*;

/// What the operation attribute populator found in an individual update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationAttributeOutcome {
    Live,
    /// The update turns the entry into a tombstone. `last_known_dn` is the
    /// name the entry had before deletion.
    Tombstone { last_known_dn: String },
}

enum MustCopy {
    /// Present in the earliest update, missing from the combined update.
    IntoCombined(AttrString, Vec<AttrValue>),
    /// Missing from the earliest update, found in a later update.
    IntoEarliest(AttrString, Vec<AttrValue>),
    /// Missing from the earliest update, left in the combined entry with no
    /// change recorded for it.
    Untracked(AttrString, Vec<AttrValue>),
}

/// The values of `attr` suitable for the creation of an entry. The class that
/// marks a tombstone never belongs to a new entry.
fn creation_values(
    entry: &Entry,
    attr: &AttrString,
    naming: &ReservedAttributes,
) -> Option<Vec<AttrValue>> {
    let values = entry.get_ava(attr)?;
    let values: Vec<AttrValue> = if *attr == naming.object_class {
        values
            .iter()
            .filter(|v| {
                std::str::from_utf8(v)
                    .map(|s| !attr_eq(s, &naming.deleted_object_class))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    } else {
        values.to_vec()
    };
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

impl ReplicationUpdate {
    /// Make sure `earliest`, the update that creates the entry, carries every
    /// attribute required by the classes the entry has at any point of its
    /// history. Missing values are taken from the combined update first and
    /// then from the `later` updates, oldest first.
    ///
    /// A value that only the combined entry holds has no change of its own.
    /// The value goes into `earliest`, its metadata is recorded at the head
    /// usn, in the newest of the `later` updates.
    ///
    /// Either every required attribute is found and copied, or nothing is
    /// changed and the first missing attribute is returned as an error.
    #[instrument(level = "debug", skip_all, fields(dn = %earliest.entry.get_dn()))]
    pub fn populate_must_attributes(
        &mut self,
        earliest: &mut ReplicationUpdate,
        later: &mut [ReplicationUpdate],
        schema: &dyn MustAttributeSchema,
        naming: &ReservedAttributes,
    ) -> Result<(), OperationError> {
        let mut classes = earliest.entry.object_classes(naming);
        classes.extend(self.entry.object_classes(naming));
        for update in later.iter() {
            classes.extend(update.entry.object_classes(naming));
        }
        classes.remove(&naming.deleted_object_class);

        let must = schema.must_attributes(&classes);
        trace!(?classes, ?must);

        let mut copies = Vec::new();
        for attr in must.iter().filter(|a| !naming.is_bookkeeping(a)) {
            if let Some(values) = earliest.entry.get_ava(attr) {
                if !self.entry.attribute_pres(attr) {
                    copies.push(MustCopy::IntoCombined(attr.clone(), values.to_vec()));
                }
                continue;
            }

            if !self.attribute_metadata.contains_key(attr) {
                if let Some(values) = creation_values(&self.entry, attr, naming) {
                    copies.push(MustCopy::Untracked(attr.clone(), values));
                    continue;
                }
            }

            let found = creation_values(&self.entry, attr, naming).or_else(|| {
                later
                    .iter()
                    .find_map(|update| creation_values(&update.entry, attr, naming))
            });

            match found {
                Some(values) => copies.push(MustCopy::IntoEarliest(attr.clone(), values)),
                None => {
                    repl_warn!(%attr, "required attribute not present in any update of the entry");
                    return Err(OperationError::MustAttributeUnavailable(attr.clone()));
                }
            }
        }

        if copies.is_empty() {
            return Ok(());
        }

        let origin = earliest.seed_origin(naming).ok_or_else(|| {
            admin_error!("earliest update carries no metadata to derive an origin from");
            OperationError::InconsistentMetadata(MetadataInconsistency::NoMetadata)
        })?;
        let meta = AttributeMetadata::synthesize(earliest.partner_usn, &origin);

        for copy in copies {
            match copy {
                MustCopy::IntoCombined(attr, values) => {
                    debug!(%attr, "copying required attribute into combined update");
                    self.entry.set_ava(&attr, values);
                    self.attribute_metadata
                        .entry(attr)
                        .or_insert_with(|| meta.clone());
                }
                MustCopy::IntoEarliest(attr, values) => {
                    debug!(%attr, "copying required attribute into earliest update");
                    earliest.entry.set_ava(&attr, values.clone());
                    earliest
                        .attribute_metadata
                        .insert(attr.clone(), meta.clone());
                    if !self.entry.attribute_pres(&attr) {
                        self.entry.set_ava(&attr, values);
                    }
                    self.attribute_metadata
                        .entry(attr)
                        .or_insert_with(|| meta.clone());
                }
                MustCopy::Untracked(attr, values) => {
                    let head = later.last_mut().unwrap_or(&mut *earliest);
                    let head_meta = AttributeMetadata::synthesize(head.partner_usn, &origin);
                    debug!(%attr, usn = head.partner_usn, "recording untracked required value");
                    head.attribute_metadata.insert(attr.clone(), head_meta.clone());
                    earliest.entry.set_ava(&attr, values);
                    self.attribute_metadata.entry(attr).or_insert(head_meta);
                }
            }
        }

        Ok(())
    }

    /// Give `individual` its own copy of the bookkeeping attributes of this
    /// combined update, and detect whether it is the deletion of the entry.
    #[instrument(level = "trace", skip_all, fields(usn = individual.partner_usn))]
    pub fn populate_operation_attributes(
        &mut self,
        individual: &mut ReplicationUpdate,
        naming: &ReservedAttributes,
    ) -> Result<OperationAttributeOutcome, OperationError> {
        let outcome = if individual.entry.has_deleted_flag(naming)
            || individual.entry.has_deleted_class(naming)
        {
            individual.sync_state = SyncState::Delete;
            self.handle_tombstone(individual, naming)?
        } else {
            OperationAttributeOutcome::Live
        };

        let guid = &naming.global_identifier;
        if let Some(values) = self.entry.get_ava(guid) {
            individual.entry.set_ava(guid, values.to_vec());
        }
        if let Some(meta) = self.attribute_metadata.get(guid) {
            individual
                .attribute_metadata
                .insert(guid.clone(), meta.clone());
        }

        let change_sequence = &naming.change_sequence;
        if self.entry.attribute_pres(change_sequence) {
            individual.entry.set_ava(
                change_sequence,
                vec![individual.partner_usn.to_string().into_bytes()],
            );
        }
        if let Some(meta) = self.attribute_metadata.get(change_sequence) {
            let mut meta = meta.clone();
            meta.local_usn = individual.partner_usn;
            individual
                .attribute_metadata
                .insert(change_sequence.clone(), meta);
        }

        Ok(outcome)
    }

    /// A tombstone is named after the object's global identifier. The
    /// combined update stands for the entry as it was created, so it is given
    /// back the name and classes the entry had before deletion.
    fn handle_tombstone(
        &mut self,
        individual: &ReplicationUpdate,
        naming: &ReservedAttributes,
    ) -> Result<OperationAttributeOutcome, OperationError> {
        let last_known_dn = individual
            .entry
            .get_ava_single_str(&naming.last_known_dn)
            .or_else(|| self.entry.get_ava_single_str(&naming.last_known_dn))
            .map(str::to_string)
            .ok_or_else(|| {
                repl_warn!(
                    dn = %individual.entry.get_dn(),
                    "tombstone without {}", naming.last_known_dn
                );
                OperationError::MustAttributeUnavailable(naming.last_known_dn.clone())
            })?;

        debug!(%last_known_dn, usn = individual.partner_usn, "tombstone detected");

        if self.sync_state != SyncState::Add {
            return Ok(OperationAttributeOutcome::Tombstone { last_known_dn });
        }

        let origin = self
            .seed_origin(naming)
            .or_else(|| individual.seed_origin(naming))
            .ok_or_else(|| {
                admin_error!("no metadata to derive an origin for the tombstone from");
                OperationError::InconsistentMetadata(MetadataInconsistency::NoMetadata)
            })?;
        let meta = AttributeMetadata::synthesize(self.partner_usn, &origin);

        self.entry.set_dn(&last_known_dn);
        self.entry.set_ava(
            &naming.entry_dn,
            vec![last_known_dn.clone().into_bytes()],
        );
        self.attribute_metadata
            .insert(naming.entry_dn.clone(), meta.clone());

        if let Some(classes) = creation_values(&individual.entry, &naming.object_class, naming) {
            self.entry.set_ava(&naming.object_class, classes);
            self.attribute_metadata
                .insert(naming.object_class.clone(), meta);
        }

        Ok(OperationAttributeOutcome::Tombstone { last_known_dn })
    }

    /// Make this update the deletion of the entry in place of `deletion`, an
    /// older update that carried the tombstone markers. The tombstone name
    /// and any marker this update does not set itself are taken over.
    pub(crate) fn take_over_deletion(
        &mut self,
        deletion: &ReplicationUpdate,
        naming: &ReservedAttributes,
    ) {
        self.sync_state = SyncState::Delete;
        self.entry.set_dn(deletion.entry.get_dn());
        for attr in [
            &naming.deleted_flag,
            &naming.last_known_dn,
            &naming.object_class,
        ] {
            if self.entry.attribute_pres(attr) {
                continue;
            }
            if let Some(values) = deletion.entry.get_ava(attr) {
                self.entry.set_ava(attr, values.to_vec());
            }
        }
    }
}
