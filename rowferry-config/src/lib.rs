//! Configuration types for rowferry runs.
//!
//! All types deserialize with serde and carry per-field defaults so a minimal
//! configuration file only needs the two connection blocks. Durations are
//! expressed as millisecond integers for serialization compatibility and
//! exposed as [`std::time::Duration`] accessors.

pub mod shared;
