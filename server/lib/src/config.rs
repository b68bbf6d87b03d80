//! The replication configuration as read from `repl.toml`. This controls the
//! log level of the synchronization session, the names of the attributes the
//! engine treats specially, and any schema classes a deployment adds on top of
//! the core schema.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use sketching::LogLevel;

use crate::prelude::*;
use crate::schema::SchemaClass;

/// The attribute types (and the one class value) that carry replication
/// bookkeeping rather than directory data. These are named by the schema of
/// the deployment, the defaults are the usual directory names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReservedAttributes {
    /// Holds the usn of the last change to the entry.
    pub change_sequence: AttrString,
    /// Holds the usn the entry was created at.
    pub creation_sequence: AttrString,
    pub global_identifier: AttrString,
    /// Set to `TRUE` on tombstones.
    pub deleted_flag: AttrString,
    /// The class value added to tombstones.
    pub deleted_object_class: AttrString,
    pub last_known_dn: AttrString,
    pub entry_dn: AttrString,
    pub object_class: AttrString,
}

impl Default for ReservedAttributes {
    fn default() -> Self {
        ReservedAttributes {
            change_sequence: ATTR_USN_CHANGED.into(),
            creation_sequence: ATTR_USN_CREATED.into(),
            global_identifier: ATTR_OBJECT_GUID.into(),
            deleted_flag: ATTR_IS_DELETED.into(),
            deleted_object_class: OC_DELETED_OBJECT.into(),
            last_known_dn: ATTR_LAST_KNOWN_DN.into(),
            entry_dn: ATTR_ENTRY_DN.into(),
            object_class: ATTR_OBJECT_CLASS.into(),
        }
    }
}

impl ReservedAttributes {
    /// The attribute types that stay behind in the combined update during
    /// extraction and are derived again for every individual update.
    pub fn bookkeeping(&self) -> [&AttrString; 2] {
        [&self.change_sequence, &self.global_identifier]
    }

    pub fn is_bookkeeping(&self, attr: &str) -> bool {
        self.bookkeeping().iter().any(|b| attr_eq(b, attr))
    }

    /// Names as read from configuration may be in any case.
    fn normalise(mut self) -> Self {
        for name in [
            &mut self.change_sequence,
            &mut self.creation_sequence,
            &mut self.global_identifier,
            &mut self.deleted_flag,
            &mut self.deleted_object_class,
            &mut self.last_known_dn,
            &mut self.entry_dn,
            &mut self.object_class,
        ] {
            *name = normalise_attr(name);
        }
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(default)]
    pub classes: BTreeMap<AttrString, SchemaClass>,
}

/// This is the replication configuration as read from `repl.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplConfig {
    /// The log level, one of info, debug, trace. Defaults to "info" if not set.
    pub log_level: Option<LogLevel>,
    /// Overrides for the reserved attribute names, see [ReservedAttributes].
    #[serde(default)]
    pub naming: ReservedAttributes,
    /// Classes added to the core schema.
    #[serde(default)]
    pub schema: SchemaConfig,
}

impl ReplConfig {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, OperationError> {
        let mut f = File::open(config_path.as_ref()).map_err(|e| {
            admin_error!(
                "Unable to open config file {:?} - {:?}",
                config_path.as_ref(),
                e
            );
            OperationError::FsError
        })?;

        let mut contents = String::new();
        f.read_to_string(&mut contents).map_err(|e| {
            admin_error!("unable to read contents {:?}", e);
            OperationError::FsError
        })?;

        let config = Self::from_str(contents.as_str())?;
        admin_info!("loaded replication config from {:?}", config_path.as_ref());
        Ok(config)
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level.unwrap_or_default()
    }

    /// The core schema with the configured classes merged in.
    pub fn schema(&self) -> Schema {
        Schema::core().with_classes(self.schema.classes.clone())
    }
}

impl FromStr for ReplConfig {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: ReplConfig = toml::from_str(s).map_err(|e| {
            admin_error!("unable to parse config {:?}", e);
            OperationError::InvalidConfiguration(e.to_string())
        })?;

        let naming = config.naming.normalise();
        admin_debug!(?naming, "reserved attribute names");

        Ok(ReplConfig { naming, ..config })
    }
}
