//! Downstream Chain Relay
//!
//! Three single-step consumers forming a linear chain:
//! summary trigger → daily summary prompt → dashboard analysis → push notification.
//!
//! Relays do no local retry. Each upstream call is one attempt; any failure
//! is returned as `Err`, so the transport redelivers the message and
//! dead-letters it after the configured receive count.

mod analysis;
mod notification;
mod summary;

pub use analysis::AnalysisRelay;
pub use notification::{NotificationRelay, PushDelivery};
pub use summary::SummaryRelay;
