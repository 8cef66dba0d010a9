//! Domain types shared by every trackq crate.
//!
//! Nothing in here touches the database, the container runtime, or the
//! network. Status derivation and output-location naming are pure
//! functions so they can be exercised in isolation.

pub mod error;
pub mod job_type;
pub mod output;
pub mod status;
pub mod types;
