use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::attribute::AttrString;

/* ===== errors ===== */

/// The ways the metadata of a combined update can fail to describe a
/// consistent history. These always indicate a defect in the synchronization
/// input or in the engine, never a recoverable condition of one entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetadataInconsistency {
    NoMetadata,
    // A metadata record was left behind after every usn of the set was split out.
    UsnOutsideSet(u64),
    UsnQueueExhausted,
    // Local usns were allocated but never consumed.
    UsnQueueNotDrained(usize),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    MalformedCookie(String),
    MalformedUpToDateVector(String),
    InconsistentMetadata(MetadataInconsistency),
    MustAttributeUnavailable(AttrString),
    InvalidConfiguration(String),
    FsError,
}

/// What the synchronization session must do with a cycle after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Flag the entry as inconsistent, continue with the rest of the cycle.
    SkipEntry,
    /// Discard the cycle. The next cycle resumes from the prior high-water mark.
    AbortCycle,
}

impl Display for OperationError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let mut output = format!("{:?}", self);

        if let Some(msg) = self.message() {
            output += &format!(" - {}", msg);
        };
        f.write_str(&output)
    }
}

impl std::error::Error for OperationError {}

impl OperationError {
    /// Return the message associated with the error if there is one.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::MalformedCookie(_) => Some(
                "The sync done cookie must be of the form <high water mark>,<up to date vector>."
                    .into(),
            ),
            Self::MalformedUpToDateVector(_) => {
                Some("Up to date vector entries must be of the form <replica id>:<usn>.".into())
            }
            Self::InconsistentMetadata(_) => None,
            Self::MustAttributeUnavailable(_) => Some(
                "A required attribute is not present in any update of the entry, the entry is skipped."
                    .into(),
            ),
            Self::InvalidConfiguration(_) => None,
            Self::FsError => None,
        }
    }

    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            Self::MustAttributeUnavailable(_) => ErrorDisposition::SkipEntry,
            Self::MalformedCookie(_)
            | Self::MalformedUpToDateVector(_)
            | Self::InconsistentMetadata(_)
            | Self::InvalidConfiguration(_)
            | Self::FsError => ErrorDisposition::AbortCycle,
        }
    }
}

#[test]
fn test_operationerror_as_nice_string() {
    assert_eq!(OperationError::FsError.to_string(), "FsError".to_string());
    assert_eq!(
        OperationError::InconsistentMetadata(MetadataInconsistency::UsnOutsideSet(12345))
            .to_string(),
        "InconsistentMetadata(UsnOutsideSet(12345))".to_string()
    );
    assert_eq!(
        OperationError::MustAttributeUnavailable("sn".into()).to_string(),
        "MustAttributeUnavailable(\"sn\") - A required attribute is not present in any update of the entry, the entry is skipped.".to_string()
    );
}

#[test]
fn test_operationerror_disposition() {
    assert_eq!(
        OperationError::MustAttributeUnavailable("cn".into()).disposition(),
        ErrorDisposition::SkipEntry
    );
    assert_eq!(
        OperationError::InconsistentMetadata(MetadataInconsistency::UsnQueueExhausted)
            .disposition(),
        ErrorDisposition::AbortCycle
    );
    assert_eq!(
        OperationError::MalformedCookie("abc".into()).disposition(),
        ErrorDisposition::AbortCycle
    );
}

#[test]
fn test_operationerror_serde() {
    let err = OperationError::InconsistentMetadata(MetadataInconsistency::UsnQueueNotDrained(2));
    let s = serde_json::to_string(&err).expect("serialise");
    let back: OperationError = serde_json::from_str(&s).expect("deserialise");
    assert_eq!(err, back);
}
