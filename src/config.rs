use crate::mailer::{self, OverflowPolicy};

/// Runtime configuration, read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bound of the outbound notification queue.
    pub mail_queue_capacity: usize,
    /// What producers do when the queue is full.
    pub mail_overflow: OverflowPolicy,
    /// Prometheus exporter port; None disables the exporter.
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mail_queue_capacity: mailer::DEFAULT_QUEUE_CAPACITY,
            mail_overflow: OverflowPolicy::Reject,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mail_queue_capacity = std::env::var("SLOTBOOK_MAIL_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(mailer::DEFAULT_QUEUE_CAPACITY);
        let mail_overflow = std::env::var("SLOTBOOK_MAIL_OVERFLOW")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(OverflowPolicy::Reject);
        let metrics_port = std::env::var("SLOTBOOK_METRICS_PORT")
            .ok()
            .and_then(|s| s.parse().ok());
        Self {
            mail_queue_capacity,
            mail_overflow,
            metrics_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.mail_queue_capacity, 100);
        assert_eq!(cfg.mail_overflow, OverflowPolicy::Reject);
        assert_eq!(cfg.metrics_port, None);
    }
}
