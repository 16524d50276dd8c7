use std::fmt;
use std::str::FromStr;

use crate::error::RecordError;
use crate::nsid;

/// A parsed `at://authority/collection/rkey` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub authority: String,
    pub collection: Option<String>,
    pub rkey: Option<String>,
}

impl AtUri {
    pub fn new(authority: &str, collection: &str, rkey: &str) -> Self {
        Self {
            authority: authority.to_string(),
            collection: Some(collection.to_string()),
            rkey: Some(rkey.to_string()),
        }
    }

    pub fn post(did: &str, rkey: &str) -> Self {
        Self::new(did, nsid::FEED_POST, rkey)
    }

    pub fn feed_generator(did: &str, name: &str) -> Self {
        Self::new(did, nsid::FEED_GENERATOR, name)
    }

    /// The record key, required for references to a record.
    pub fn require_rkey(&self) -> Result<&str, RecordError> {
        self.rkey
            .as_deref()
            .ok_or_else(|| RecordError::InvalidAtUri(self.to_string()))
    }
}

impl FromStr for AtUri {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("at://")
            .ok_or_else(|| RecordError::InvalidAtUri(s.to_string()))?;

        let mut parts = rest.split('/');
        let authority = parts
            .next()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| RecordError::InvalidAtUri(s.to_string()))?;
        let collection = parts.next().filter(|c| !c.is_empty());
        let rkey = parts.next().filter(|r| !r.is_empty());

        if parts.next().is_some() || (rkey.is_some() && collection.is_none()) {
            return Err(RecordError::InvalidAtUri(s.to_string()));
        }

        Ok(Self {
            authority: authority.to_string(),
            collection: collection.map(str::to_string),
            rkey: rkey.map(str::to_string),
        })
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}", self.authority)?;
        if let Some(collection) = &self.collection {
            write!(f, "/{}", collection)?;
            if let Some(rkey) = &self.rkey {
                write!(f, "/{}", rkey)?;
            }
        }
        Ok(())
    }
}
