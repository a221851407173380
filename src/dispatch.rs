//! Best-effort alert notification delivery.
//!
//! Channels are registered by name; a rule names the channels it wants.
//! Delivery is at-most-once per channel with no retry: a failing channel is
//! logged and the remaining channels are still attempted. Nothing here can
//! affect alert creation or persistence.

use crate::alert::Alert;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Trait for notification channels (email, chat webhook, pager, ...).
pub trait NotificationChannel: Send + Sync {
    /// Channel name, matched against `MonitoringRule::channels`.
    fn name(&self) -> &str;

    /// Deliver one alert.
    ///
    /// # Errors
    /// Returns `Err` if delivery fails; the dispatcher logs and moves on.
    fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Channel that writes alerts to the process log.
///
/// The default channel: always available, never fails.
#[derive(Clone, Default)]
pub struct LogChannel;

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        warn!(
            "[alert:{}] {} ({}): {}",
            alert.severity.as_str(),
            alert.alert_type,
            alert.id,
            alert.message
        );
        Ok(())
    }
}

/// Fans an alert out to its channels, isolating failures per channel.
pub struct AlertDispatcher {
    channels: HashMap<String, Box<dyn NotificationChannel>>,
}

impl AlertDispatcher {
    /// Empty dispatcher; alerts go nowhere until channels are registered.
    pub fn new() -> Self {
        AlertDispatcher {
            channels: HashMap::new(),
        }
    }

    /// Dispatcher with the log channel pre-registered.
    pub fn with_log_channel() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Box::new(LogChannel));
        dispatcher
    }

    /// Register a channel under its own name, replacing any previous one.
    pub fn register(&mut self, channel: Box<dyn NotificationChannel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    /// Registered channel names.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Attempt delivery on each named channel independently.
    ///
    /// Returns the per-channel failures, already logged; callers may ignore
    /// the return value; alert creation never depends on it.
    pub fn dispatch(&self, alert: &Alert, channel_names: &[String]) -> Vec<Error> {
        let mut failures = Vec::new();

        for name in channel_names {
            let channel = match self.channels.get(name) {
                Some(channel) => channel,
                None => {
                    warn!("Unknown notification channel: {}", name);
                    failures.push(Error::Dispatch {
                        channel: name.clone(),
                        message: "unknown channel".to_string(),
                    });
                    continue;
                }
            };

            match channel.deliver(alert) {
                Ok(()) => debug!("Alert {} delivered via {}", alert.id, name),
                Err(e) => {
                    warn!("Delivery of alert {} failed on {}: {}", alert.id, name, e);
                    failures.push(Error::Dispatch {
                        channel: name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        failures
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
