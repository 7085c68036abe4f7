pub mod cache;
pub mod config;
pub mod history;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod rank;
pub mod registry;
pub mod sources;
pub mod transport;
pub mod verify;
