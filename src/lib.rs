//! QR-scan attendance marking: offline-capable scanning devices in front of a
//! spreadsheet-backed roster.

pub mod client;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod dispatcher;
pub mod marking;
pub mod model;
pub mod queue;
pub mod roster;
pub mod scanner;
pub mod server;
pub mod sheets;
pub mod sync;
