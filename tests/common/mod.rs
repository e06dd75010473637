#![allow(dead_code)]

use reliabledb::core::ManualClock;
use reliabledb::mapper::{parse_required, required};
use reliabledb::store::MemoryStore;
use reliabledb::{
    Attributes, DbError, Record, ReliableClient, ReliableConfig, Result, StaticHostIdentity,
    VersionAttribute, VersionValue,
};
use std::sync::Arc;

pub const HOST_A: &str = "host-a";
pub const HOST_B: &str = "host-b";

/// Manual clock, in-memory store and a client for `HOST_A`.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub client: ReliableClient,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReliableConfig::default())
    }

    pub fn with_config(config: ReliableConfig) -> Self {
        let clock = Arc::new(ManualClock::at_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let client = client_for(&store, &clock, config, HOST_A);
        Self {
            clock,
            store,
            client,
        }
    }

    /// Number of intent log rows still stored.
    pub fn log_rows(&self) -> usize {
        self.store
            .domain_len(&self.client.config().system_domain)
            .unwrap()
    }
}

pub fn client_for(
    store: &Arc<MemoryStore>,
    clock: &Arc<ManualClock>,
    config: ReliableConfig,
    machine_id: &str,
) -> ReliableClient {
    let identity = StaticHostIdentity::new(machine_id, format!("{}.local", machine_id));
    ReliableClient::with_clock(store.clone(), config, &identity, clock.clone()).unwrap()
}

/// Versioned with an integer counter.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub owner: String,
    pub balance: i64,
    pub version: Option<VersionValue>,
}

impl Account {
    pub fn new(id: &str, owner: &str, balance: i64) -> Self {
        Self {
            id: id.to_string(),
            owner: owner.to_string(),
            balance,
            version: None,
        }
    }
}

impl Record for Account {
    fn domain() -> &'static str {
        "Account"
    }

    fn item_name(&self) -> String {
        self.id.clone()
    }

    fn to_attributes(&self) -> Attributes {
        Attributes::from([
            ("owner".to_string(), self.owner.clone()),
            ("balance".to_string(), self.balance.to_string()),
        ])
    }

    fn from_attributes(item_name: &str, attributes: &Attributes) -> Result<Self> {
        Ok(Self {
            id: item_name.to_string(),
            owner: required(attributes, "owner")?.to_string(),
            balance: parse_required(attributes, "balance")?,
            version: None,
        })
    }

    fn version_attribute() -> Option<VersionAttribute> {
        Some(VersionAttribute::counter("Version"))
    }

    fn version(&self) -> Option<VersionValue> {
        self.version
    }

    fn set_version(&mut self, version: VersionValue) {
        self.version = Some(version);
    }
}

/// Versioned with a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: String,
    pub text: String,
    pub modified: Option<VersionValue>,
}

impl Record for Note {
    fn domain() -> &'static str {
        "Note"
    }

    fn item_name(&self) -> String {
        self.id.clone()
    }

    fn to_attributes(&self) -> Attributes {
        Attributes::from([("text".to_string(), self.text.clone())])
    }

    fn from_attributes(item_name: &str, attributes: &Attributes) -> Result<Self> {
        Ok(Self {
            id: item_name.to_string(),
            text: required(attributes, "text")?.to_string(),
            modified: None,
        })
    }

    fn version_attribute() -> Option<VersionAttribute> {
        Some(VersionAttribute::timestamp("Modified"))
    }

    fn version(&self) -> Option<VersionValue> {
        self.modified
    }

    fn set_version(&mut self, version: VersionValue) {
        self.modified = Some(version);
    }
}

/// Not versioned.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: String,
    pub name: String,
}

impl Person {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

impl Record for Person {
    fn domain() -> &'static str {
        "Person"
    }

    fn item_name(&self) -> String {
        self.id.clone()
    }

    fn to_attributes(&self) -> Attributes {
        Attributes::from([("name".to_string(), self.name.clone())])
    }

    fn from_attributes(item_name: &str, attributes: &Attributes) -> Result<Self> {
        if item_name.is_empty() {
            return Err(DbError::CodecError("person without id".to_string()));
        }
        Ok(Self {
            id: item_name.to_string(),
            name: required(attributes, "name")?.to_string(),
        })
    }
}
