/// Provider adapters.
///
/// - `swpc`: NOAA SWPC feeds fetched whole over HTTPS.
/// - `backend`: dashboard backend pages read line by line.

pub mod backend;
pub mod swpc;
