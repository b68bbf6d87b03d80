use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// An update sequence number. Every replica numbers the writes it applies.
pub type Usn = u64;

/// Where a change was first made. This is carried unchanged as the change
/// travels between replicas.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Origin {
    pub replica_id: String,
    pub usn: Usn,
    pub timestamp: String,
}

/// The last known change to one attribute of an entry. A combined update
/// holds at most one of these per attribute type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AttributeMetadata {
    /// The usn the holder of this record applied the change at.
    pub local_usn: Usn,
    pub version: u64,
    pub origin: Origin,
}

impl AttributeMetadata {
    pub fn new(local_usn: Usn, version: u64, origin: Origin) -> Self {
        AttributeMetadata {
            local_usn,
            version,
            origin,
        }
    }

    /// Metadata for an attribute the engine places into an update itself,
    /// rather than one that was received with a recorded change.
    pub fn synthesize(local_usn: Usn, origin: &Origin) -> Self {
        AttributeMetadata {
            local_usn,
            version: 1,
            origin: origin.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueOp {
    Add,
    Delete,
}

/// The change of one value of a multi valued attribute. Unlike
/// [AttributeMetadata] many of these may exist for the same attribute.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ValueMetadata {
    pub attr: AttrString,
    pub local_usn: Usn,
    pub version: u64,
    pub origin: Origin,
    pub op: ValueOp,
    pub value: AttrValue,
}

impl ValueMetadata {
    pub fn new(
        attr: &str,
        local_usn: Usn,
        version: u64,
        origin: Origin,
        op: ValueOp,
        value: &[u8],
    ) -> Self {
        ValueMetadata {
            attr: normalise_attr(attr),
            local_usn,
            version,
            origin,
            op,
            value: value.to_vec(),
        }
    }

    pub fn is_delete(&self) -> bool {
        self.op == ValueOp::Delete
    }
}

#[cfg(test)]
pub(crate) fn origin_for_test(usn: Usn) -> Origin {
    Origin {
        replica_id: "7ef77c0f-cff1-4239-b293-39a2b302d5bd".to_string(),
        usn,
        timestamp: format!("20260101000000.{:03}", usn % 1000),
    }
}
