//! Common imports for application code.
//!
//! `use reliabledb::prelude::*;` brings in the client, the call context and
//! the record trait. Store-level request types stay under `store`.

pub use crate::client::{RecordPage, ReliableClient, ReliableConfig};
pub use crate::consistency::CallContext;
pub use crate::core::{
    Attributes, DbError, EnvHostIdentity, HostIdentityProvider, Result, StaticHostIdentity,
};
pub use crate::mapper::{Record, parse_required, required};
pub use crate::store::{Predicate, SelectQuery, SortOrder};
pub use crate::version::{VersionAttribute, VersionValue};
