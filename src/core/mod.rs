pub mod clock;
pub mod error;
pub mod host;
pub mod item;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DbError, Result, StepFailure, StepFailureKind};
pub use host::{EnvHostIdentity, HostIdentity, HostIdentityProvider, StaticHostIdentity};
pub use item::{Attributes, ItemKey};
