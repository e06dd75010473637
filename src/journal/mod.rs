// ============================================================================
// Durable Intent Log
// ============================================================================
//
// Write steps of a reliable write are persisted as rows of a reserved system
// domain before any of them is applied. A row exists exactly as long as its
// step has not been confirmed applied; whichever propagation attempt succeeds
// first deletes it.
//
// Row layout:
//   item name        step id
//   type             'WriteStep'
//   ReliableWriteId  id shared by every step of one batch
//   OpaquePayload    versioned, type-tagged request (chunked when long)
//   MachineId        originating host id, used to partition replay
//   HostName         originating host name, informational
//   Version          sortable UTC timestamp, the replay ordering key
//
// ============================================================================

pub mod codec;
pub mod intent_log;
pub mod step;

pub use codec::{PAYLOAD_FORMAT_VERSION, decode_payload, decode_step, encode_payload, encode_step};
pub use intent_log::{DurableIntentLog, ScanPage, StepScan};
pub use step::{PendingStep, WriteBatch, WriteStep};

pub const STEP_TYPE: &str = "WriteStep";

pub const TYPE_ATTR: &str = "type";
pub const RELIABLE_WRITE_ID_ATTR: &str = "ReliableWriteId";
pub const PAYLOAD_ATTR: &str = "OpaquePayload";
pub const MACHINE_ID_ATTR: &str = "MachineId";
pub const HOST_NAME_ATTR: &str = "HostName";
pub const VERSION_ATTR: &str = "Version";
