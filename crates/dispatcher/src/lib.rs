//! Notification Dispatcher
//!
//! Delivers messages through named channels with:
//! - an immediate first attempt
//! - a bounded retry queue drained by a background task
//! - exponential backoff with jitter
//! - escalation after repeated exhausted deliveries

mod backoff;
mod channel;
mod dispatcher;
mod error;
mod queue;
mod record;

pub use backoff::BackoffPolicy;
pub use channel::{LogChannel, NotificationChannel, TelegramChannel, TelegramConfig};
pub use dispatcher::{DeliverySink, Dispatcher, DispatcherConfig, DispatcherHealth};
pub use error::{ChannelError, DispatchError};
pub use queue::{PendingDelivery, RetryQueue};
pub use record::{DeliveryRecord, DeliveryStatus};
