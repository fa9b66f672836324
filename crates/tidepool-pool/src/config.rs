//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Sizing and eviction settings for a [`Pool`](crate::Pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of simultaneously open connections (at least 1).
    pub capacity: u32,

    /// Maximum number of queued acquisitions. `0` fails fast instead of
    /// queueing.
    pub queue_capacity: u32,

    /// How long an unused connection may stay idle. `Duration::ZERO`
    /// disables eviction.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            queue_capacity: 128,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of open connections.
    #[must_use]
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the maximum number of queued acquisitions.
    #[must_use]
    pub fn queue_capacity(mut self, queue_capacity: u32) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Whether idle eviction is enabled.
    #[must_use]
    pub fn evicts_idle(&self) -> bool {
        !self.idle_timeout.is_zero()
    }

    /// Check the configuration for values the pool cannot run with.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity == 0 {
            return Err(PoolError::Config("capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Deadlines applied to a single acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on the handshake of a new connection.
    pub connect: Duration,

    /// Bound on the time spent queued for a free slot.
    pub queue: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            queue: Duration::from_secs(10),
        }
    }
}

impl Timeouts {
    /// Create timeouts from explicit values.
    #[must_use]
    pub fn new(connect: Duration, queue: Duration) -> Self {
        Self { connect, queue }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = timeout;
        self
    }

    /// Set the queue timeout.
    #[must_use]
    pub fn queue(mut self, timeout: Duration) -> Self {
        self.queue = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity, 10);
        assert!(config.evicts_idle());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = PoolConfig::new().capacity(0).validate().unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn test_zero_queue_and_idle_allowed() {
        let config = PoolConfig::new()
            .capacity(1)
            .queue_capacity(0)
            .idle_timeout(Duration::ZERO);
        assert!(config.validate().is_ok());
        assert!(!config.evicts_idle());
    }

    #[test]
    fn test_timeouts_fluent() {
        let timeouts = Timeouts::default()
            .connect(Duration::from_secs(1))
            .queue(Duration::from_millis(250));
        assert_eq!(
            timeouts,
            Timeouts::new(Duration::from_secs(1), Duration::from_millis(250))
        );
    }
}
