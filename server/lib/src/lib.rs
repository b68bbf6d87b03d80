//! The dirsync replication library. This implements the expansion of the combined
//! per-entry updates received from a replication partner into the ordered list of
//! individual operations that the storage engine applies and forwards.

#![deny(warnings)]
#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod entry;
pub mod repl;
pub mod schema;

/// A prelude of imports that should be imported by all other dirsync modules to
/// help make imports cleaner.
pub mod prelude {
    pub use dirsync_proto::attribute::{attr_eq, normalise_attr, AttrString};
    pub use dirsync_proto::constants::*;
    pub use dirsync_proto::internal::{ErrorDisposition, MetadataInconsistency, OperationError};
    pub use sketching::{
        admin_debug, admin_error, admin_info, admin_warn, repl_error, repl_info, repl_trace,
        repl_warn, tagged_event, EventTag,
    };

    pub use crate::config::{ReplConfig, ReservedAttributes};
    pub use crate::entry::{AttrValue, Entry};
    pub use crate::repl::metadata::{AttributeMetadata, Origin, Usn, ValueMetadata, ValueOp};
    pub use crate::repl::update::{ReplicationUpdate, ReplicationUpdateList, SyncState};
    pub use crate::schema::{MustAttributeSchema, Schema};
}
