//! Notification edge for KinetoFlow.
//!
//! Renders the invitation and welcome emails and delivers them off the request
//! path. Delivery is best-effort: a failed send is logged and dropped, never
//! reported back to the caller that queued it.

pub mod dispatch;
pub mod templates;

#[cfg(feature = "smtp")]
pub mod smtp;

pub use dispatch::*;
pub use templates::*;
