// Library root for the Secret Santa draw engine: the draw generator plus the
// records, configuration, and storage the draw service builds on.

pub mod config;
pub mod db;
pub mod draw;
pub mod model;
