// FOSDEM Core - Schedule domain, notifications & ports
// NO infrastructure dependencies (hexagonal split: storage lives in infra-sqlite)

pub mod application;
pub mod config;
pub mod domain;
pub mod port;

pub use application::{NotificationHub, Subscription, Topic};
pub use config::StoreConfig;
pub use domain::DomainError;
