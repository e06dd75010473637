use super::{DbError, Result};

pub const MACHINE_ID_ENV: &str = "RELIABLEDB_MACHINE_ID";
pub const HOST_NAME_ENV: &str = "RELIABLEDB_HOST_NAME";

/// Identity stamped on every logged write step.
///
/// The reconciliation daemon only replays steps whose machine id matches its
/// own, so the id must be stable across restarts of the same host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub machine_id: String,
    pub host_name: String,
}

/// Supplies the host identity at startup.
pub trait HostIdentityProvider: Send + Sync {
    fn identity(&self) -> Result<HostIdentity>;
}

/// Fixed identity supplied by the application.
#[derive(Debug, Clone)]
pub struct StaticHostIdentity {
    identity: HostIdentity,
}

impl StaticHostIdentity {
    pub fn new(machine_id: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            identity: HostIdentity {
                machine_id: machine_id.into(),
                host_name: host_name.into(),
            },
        }
    }
}

impl HostIdentityProvider for StaticHostIdentity {
    fn identity(&self) -> Result<HostIdentity> {
        validate_identity(&self.identity)?;
        Ok(self.identity.clone())
    }
}

/// Reads `RELIABLEDB_MACHINE_ID` and `RELIABLEDB_HOST_NAME`.
///
/// The host name falls back to the machine id when unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvHostIdentity;

impl EnvHostIdentity {
    /// Builds the identity from any variable source.
    fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<HostIdentity> {
        let machine_id = lookup(MACHINE_ID_ENV).ok_or_else(|| {
            DbError::ConfigurationError(format!("{} is not set", MACHINE_ID_ENV))
        })?;
        let host_name = lookup(HOST_NAME_ENV).unwrap_or_else(|| machine_id.clone());
        let identity = HostIdentity {
            machine_id,
            host_name,
        };
        validate_identity(&identity)?;
        Ok(identity)
    }
}

impl HostIdentityProvider for EnvHostIdentity {
    fn identity(&self) -> Result<HostIdentity> {
        Self::resolve(|name| std::env::var(name).ok())
    }
}

fn validate_identity(identity: &HostIdentity) -> Result<()> {
    if identity.machine_id.trim().is_empty() {
        return Err(DbError::ConfigurationError(
            "machine id must not be empty".to_string(),
        ));
    }
    if identity.host_name.trim().is_empty() {
        return Err(DbError::ConfigurationError(
            "host name must not be empty".to_string(),
        ));
    }
    Ok(())
}
