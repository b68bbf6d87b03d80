//! The sync done cookie is how a replication partner tells us where the
//! cycle we just pulled ended, so that the next cycle can resume from there.
//! It has the form `<high water mark>,<up to date vector>` and the vector is a
//! list of `<replica id>:<usn>` pairs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDoneCookie {
    pub high_water_mark: Usn,
    /// Kept as received. Use [SyncDoneCookie::parse_up_to_date_vector] to
    /// inspect it.
    pub up_to_date_vector: String,
}

impl SyncDoneCookie {
    pub fn parse_up_to_date_vector(&self) -> Result<UpToDateVector, OperationError> {
        UpToDateVector::from_str(&self.up_to_date_vector)
    }

    /// A partner answers a cycle with nothing new by echoing the high water
    /// mark it was asked for. Such a cookie must not replace the stored one.
    pub fn advances(&self, requested_hwm: Usn) -> bool {
        self.high_water_mark != requested_hwm
    }
}

impl FromStr for SyncDoneCookie {
    type Err = OperationError;

    #[instrument(level = "debug", name = "parse_sync_done_cookie")]
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let Some((hwm, utd)) = raw.split_once(SYNC_DONE_COOKIE_SEPARATOR) else {
            repl_error!(%raw, "sync done cookie has no separator");
            return Err(OperationError::MalformedCookie(raw.to_string()));
        };

        // u64::from_str accepts a leading '+', a cookie must not.
        if hwm.is_empty() || !hwm.bytes().all(|b| b.is_ascii_digit()) {
            repl_error!(%raw, "sync done cookie high water mark is not a number");
            return Err(OperationError::MalformedCookie(raw.to_string()));
        }

        let high_water_mark = hwm.parse::<Usn>().map_err(|e| {
            repl_error!(%raw, ?e, "sync done cookie high water mark out of range");
            OperationError::MalformedCookie(raw.to_string())
        })?;

        Ok(SyncDoneCookie {
            high_water_mark,
            up_to_date_vector: utd.to_string(),
        })
    }
}

impl fmt::Display for SyncDoneCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.high_water_mark, SYNC_DONE_COOKIE_SEPARATOR, self.up_to_date_vector
        )
    }
}

/// The highest origin usn processed from each replica.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpToDateVector {
    inner: BTreeMap<String, Usn>,
}

impl UpToDateVector {
    pub fn get(&self, replica_id: &str) -> Option<Usn> {
        self.inner.get(replica_id).copied()
    }

    /// Record that `usn` of `replica_id` has been processed. The vector never
    /// moves backwards.
    pub fn update(&mut self, replica_id: &str, usn: Usn) {
        self.inner
            .entry(replica_id.to_string())
            .and_modify(|cur| *cur = (*cur).max(usn))
            .or_insert(usn);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Usn)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl FromStr for UpToDateVector {
    type Err = OperationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut utd = UpToDateVector::default();

        for pair in raw.split([',', ';']).filter(|p| !p.is_empty()) {
            let parsed = pair
                .split_once(':')
                .filter(|(id, _)| !id.is_empty())
                .and_then(|(id, usn)| usn.parse::<Usn>().ok().map(|usn| (id, usn)));

            match parsed {
                Some((id, usn)) => utd.update(id, usn),
                None => {
                    repl_error!(%raw, %pair, "malformed up to date vector entry");
                    return Err(OperationError::MalformedUpToDateVector(pair.to_string()));
                }
            }
        }

        Ok(utd)
    }
}

impl fmt::Display for UpToDateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, usn) in self.inner.iter() {
            write!(f, "{}:{},", id, usn)?;
        }
        Ok(())
    }
}
