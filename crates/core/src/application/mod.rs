// Application Layer - Cross-cutting use cases shared by collaborators

pub mod notification;

// Re-exports
pub use notification::{NotificationHub, Subscription, Topic};
