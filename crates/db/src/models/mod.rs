//! Domain model structs and DTOs.
//!
//! Row structs derive `FromRow` + `Serialize`; create DTOs derive
//! `Deserialize`.

pub mod job;
pub mod media;
