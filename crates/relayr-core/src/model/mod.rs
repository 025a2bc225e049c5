// ── Domain model ──
//
// Plain data: identities, the passive device record, readings, transmitters
// and provisioning process vocabulary. No behaviour lives here.

pub mod device;
pub mod entity_id;
pub mod process;
pub mod reading;
pub mod transmitter;

pub use device::{DeviceRecord, Firmware};
pub use entity_id::EntityId;
pub use process::{ProcessKind, ProcessOptions, ProcessState};
pub use reading::Reading;
pub use transmitter::Transmitter;
