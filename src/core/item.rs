use super::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute name to formatted string value, as held by the remote store.
pub type Attributes = BTreeMap<String, String>;

/// Identity of one stored item: the domain (collection) plus the item name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub domain: String,
    pub item_name: String,
}

impl ItemKey {
    pub fn new(domain: impl Into<String>, item_name: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            item_name: item_name.into(),
        }
    }

    /// Builds a key, rejecting an empty domain or item name.
    pub fn checked(domain: impl Into<String>, item_name: impl Into<String>) -> Result<Self> {
        let key = Self::new(domain, item_name);
        if key.domain.trim().is_empty() {
            return Err(DbError::InvalidArgument("domain must not be empty".to_string()));
        }
        if key.item_name.trim().is_empty() {
            return Err(DbError::InvalidArgument(
                "item name must not be empty".to_string(),
            ));
        }
        Ok(key)
    }

    /// Cache key in `domain+itemName` form.
    pub fn cache_key(&self) -> String {
        format!("{}+{}", self.domain, self.item_name)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.item_name)
    }
}
