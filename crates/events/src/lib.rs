//! Job status notifications.
//!
//! - [`EventBus`], in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`. Publishing never blocks and never fails, so
//!   the monitor can notify owners without risking its cycle.
//! - [`JobEvent`], a job status change addressed to the job owner.
//! - [`NotificationRouter`], background task that logs every event and
//!   forwards it by email when SMTP is configured.
//! - [`delivery`], external delivery channels (email).

pub mod bus;
pub mod delivery;
pub mod router;

pub use bus::{EventBus, JobEvent};
pub use delivery::email::{EmailConfig, EmailDelivery};
pub use router::NotificationRouter;
