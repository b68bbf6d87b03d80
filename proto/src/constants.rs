//! Default names of the attributes the replication engine treats specially.
//! The schema and naming component of a deployment may override all of these,
//! see `ReservedAttributes` in the server library.

/// Per entry sequence number of the last change.
pub const ATTR_USN_CHANGED: &str = "usnchanged";
/// Per entry sequence number of the creation.
pub const ATTR_USN_CREATED: &str = "usncreated";
/// Global identifier of an entry, stable across renames and deletion.
pub const ATTR_OBJECT_GUID: &str = "objectguid";
/// Set on tombstones.
pub const ATTR_IS_DELETED: &str = "isdeleted";
/// Name of the entry before it was turned into a tombstone.
pub const ATTR_LAST_KNOWN_DN: &str = "lastknowndn";
pub const ATTR_ENTRY_DN: &str = "entrydn";
pub const ATTR_OBJECT_CLASS: &str = "objectclass";

/// The class value that marks a tombstone.
pub const OC_DELETED_OBJECT: &str = "deletedobject";

pub const IS_DELETED_TRUE: &str = "TRUE";

/// The separator between the high-water mark and the up-to-date vector in a
/// sync-done cookie.
pub const SYNC_DONE_COOKIE_SEPARATOR: char = ',';
