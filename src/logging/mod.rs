//! Analytics and event logging

pub mod analytics;

pub use analytics::{AnalyticsEvent, AnalyticsLogger, EventType};
