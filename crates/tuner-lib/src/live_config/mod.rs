//! Live reconfiguration through a shared-memory region
//!
//! The tuner writes tunables into a fixed 1024-byte file mapping that the
//! running benchmark polls. A single ready byte guards each publication.

mod channel;
pub mod layout;
mod reader;


pub use channel::{LiveConfigChannel, LiveUpdate};
pub use layout::{FieldValues, FIELDS, FIELD_COUNT, LAYOUT_VERSION, REGION_SIZE};
pub use reader::LiveConfigReader;

/// Default location of the shared region
pub const DEFAULT_CHANNEL_PATH: &str = "/tmp/mmap_file.mmap";
