// Gift-giving draws: the constrained random assignment of givers to receivers.

pub mod generator;

pub use generator::{Assignment, Blacklist, DrawError, DrawGenerator};
