// Quill Kernel
//
// State-reconstruction and schema-identity core of a transactional
// table format.

pub mod actions;
pub mod guards;
pub mod log;
pub mod mapping;
pub mod replay;
pub mod schema;
pub mod snapshot;
