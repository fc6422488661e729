// Library root for the Secret Santa HTTP service. The binary in main.rs and
// the integration tests both build on these modules.

pub mod routes;
pub mod service;
