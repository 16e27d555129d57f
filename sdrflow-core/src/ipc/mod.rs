//! Types handed to downstream collaborators.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so they can be
//! forwarded unchanged to rendering or classification processes.

pub mod events;
