//! Persisted location of an uploaded video.
//!
//! Stored records keep the location as a single `<bucket>,<key>` string. Inside
//! the service it is always a [`Locator`]; the string form only exists at the
//! persistence boundary.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const DELIMITER: char = ',';

/// Bucket and key of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub bucket: String,
    pub key: String,
}

impl Locator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Legacy single-string form
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.bucket, DELIMITER, self.key)
    }

    /// Parse the legacy form. Splits on the first delimiter, so keys may
    /// contain commas but buckets may not.
    pub fn decode(raw: &str) -> Result<Self> {
        let (bucket, key) = raw.split_once(DELIMITER).ok_or_else(|| {
            Error::Validation(format!("malformed locator {raw:?}: missing '{DELIMITER}'"))
        })?;

        if bucket.is_empty() || key.is_empty() {
            return Err(Error::Validation(format!(
                "malformed locator {raw:?}: empty bucket or key"
            )));
        }

        Ok(Self::new(bucket, key))
    }

    /// An absent stored value means nothing has been uploaded yet
    pub fn decode_optional(raw: Option<&str>) -> Result<Option<Self>> {
        raw.map(Self::decode).transpose()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.bucket, DELIMITER, self.key)
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl Serialize for Locator {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::decode(&raw).map_err(serde::de::Error::custom)
    }
}
