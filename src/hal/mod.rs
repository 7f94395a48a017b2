//! Hardware charging-control service handle.
//!
//! The vendor service is reached through an explicitly owned, injectable
//! handle rather than an ambient singleton. Transient call failures are
//! retried with bounded exponential backoff; once retries are exhausted the
//! error is returned to the call site, which logs it and carries on with
//! cached state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, RetryStrategy};

/// Capability bits reported by the hardware charging-control service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeCtrlModes(u32);

impl ChargeCtrlModes {
    /// Binary allow/forbid charging
    pub const TOGGLE: Self = Self(1 << 0);
    /// Power the board from the charger without topping up the battery
    pub const BYPASS: Self = Self(1 << 1);
    /// Hardware accepts a completion deadline and paces itself
    pub const DEADLINE: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// The raw hardware charging-control protocol.
///
/// Implementations wrap whatever IPC the platform provides. Calls are
/// expected to be fast, bounded-latency local calls.
#[async_trait]
pub trait ChargingControlHal: Send + Sync {
    /// Capability probe; fixed for the lifetime of the service
    async fn supported_modes(&self) -> Result<ChargeCtrlModes>;

    async fn charging_enabled(&self) -> Result<bool>;

    async fn set_charging_enabled(&self, enabled: bool) -> Result<()>;

    /// Seconds until the battery must be full; -1 clears the deadline
    async fn set_charging_deadline(&self, seconds: i64) -> Result<()>;

    /// Estimated time until the battery is full at the current rate,
    /// `None` when no estimate is available
    async fn charge_time_remaining(&self) -> Result<Option<Duration>>;
}

/// Owned handle wrapping a HAL connection with a retry policy
#[derive(Clone)]
pub struct HalHandle {
    hal: Arc<dyn ChargingControlHal>,
    retry: RetryStrategy,
}

impl HalHandle {
    pub fn new(hal: Arc<dyn ChargingControlHal>) -> Self {
        Self {
            hal,
            retry: RetryStrategy::ExponentialBackoff {
                max_retries: 2,
                base_delay_ms: 100,
            },
        }
    }

    pub fn with_retry(hal: Arc<dyn ChargingControlHal>, retry: RetryStrategy) -> Self {
        Self { hal, retry }
    }

    pub async fn supported_modes(&self) -> Result<ChargeCtrlModes> {
        self.retrying("supported_modes", || self.hal.supported_modes())
            .await
    }

    pub async fn charging_enabled(&self) -> Result<bool> {
        self.retrying("charging_enabled", || self.hal.charging_enabled())
            .await
    }

    pub async fn set_charging_enabled(&self, enabled: bool) -> Result<()> {
        self.retrying("set_charging_enabled", || {
            self.hal.set_charging_enabled(enabled)
        })
        .await
    }

    pub async fn set_charging_deadline(&self, seconds: i64) -> Result<()> {
        self.retrying("set_charging_deadline", || {
            self.hal.set_charging_deadline(seconds)
        })
        .await
    }

    pub async fn charge_time_remaining(&self) -> Result<Option<Duration>> {
        self.retrying("charge_time_remaining", || {
            self.hal.charge_time_remaining()
        })
        .await
    }

    /// Whether the service reports every bit in `modes`
    pub async fn is_mode_supported(&self, modes: ChargeCtrlModes) -> bool {
        match self.supported_modes().await {
            Ok(supported) => supported.contains(modes),
            Err(e) => {
                log::error!("Unable to get supported modes from HAL: {}", e);
                false
            }
        }
    }

    async fn retrying<T, F, Fut>(&self, what: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts() {
                        return Err(e);
                    }
                    let delay = self.retry.delay_before(attempt).unwrap_or_default();
                    log::warn!(
                        "HAL call {} failed (attempt {}): {}, retrying in {:?}",
                        what,
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Scriptable in-memory HAL for tests and host-side development
pub struct MockHal {
    modes: ChargeCtrlModes,
    charging_enabled: parking_lot::Mutex<bool>,
    deadline_seconds: parking_lot::Mutex<Option<i64>>,
    time_remaining: parking_lot::Mutex<Option<Duration>>,
    /// Number of upcoming calls that should fail
    inject_failures: parking_lot::Mutex<u32>,
    set_enabled_calls: parking_lot::Mutex<u32>,
    set_deadline_calls: parking_lot::Mutex<u32>,
}

impl MockHal {
    pub fn new(modes: ChargeCtrlModes) -> Self {
        Self {
            modes,
            charging_enabled: parking_lot::Mutex::new(true),
            deadline_seconds: parking_lot::Mutex::new(None),
            time_remaining: parking_lot::Mutex::new(None),
            inject_failures: parking_lot::Mutex::new(0),
            set_enabled_calls: parking_lot::Mutex::new(0),
            set_deadline_calls: parking_lot::Mutex::new(0),
        }
    }

    pub fn set_time_remaining(&self, remaining: Option<Duration>) {
        *self.time_remaining.lock() = remaining;
    }

    /// Make the next `count` calls fail with a HAL error
    pub fn fail_next(&self, count: u32) {
        *self.inject_failures.lock() = count;
    }

    pub fn is_charging_enabled(&self) -> bool {
        *self.charging_enabled.lock()
    }

    pub fn deadline_seconds(&self) -> Option<i64> {
        *self.deadline_seconds.lock()
    }

    pub fn set_enabled_call_count(&self) -> u32 {
        *self.set_enabled_calls.lock()
    }

    pub fn set_deadline_call_count(&self) -> u32 {
        *self.set_deadline_calls.lock()
    }

    fn check_failure(&self) -> Result<()> {
        let mut failures = self.inject_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(crate::error::Error::Hal(
                "injected mock failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ChargingControlHal for MockHal {
    async fn supported_modes(&self) -> Result<ChargeCtrlModes> {
        self.check_failure()?;
        Ok(self.modes)
    }

    async fn charging_enabled(&self) -> Result<bool> {
        self.check_failure()?;
        Ok(*self.charging_enabled.lock())
    }

    async fn set_charging_enabled(&self, enabled: bool) -> Result<()> {
        self.check_failure()?;
        *self.set_enabled_calls.lock() += 1;
        *self.charging_enabled.lock() = enabled;
        Ok(())
    }

    async fn set_charging_deadline(&self, seconds: i64) -> Result<()> {
        self.check_failure()?;
        *self.set_deadline_calls.lock() += 1;
        *self.deadline_seconds.lock() = if seconds < 0 { None } else { Some(seconds) };
        Ok(())
    }

    async fn charge_time_remaining(&self) -> Result<Option<Duration>> {
        self.check_failure()?;
        Ok(*self.time_remaining.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bits() {
        let modes = ChargeCtrlModes::TOGGLE.union(ChargeCtrlModes::BYPASS);
        assert!(modes.contains(ChargeCtrlModes::TOGGLE));
        assert!(modes.contains(ChargeCtrlModes::BYPASS));
        assert!(!modes.contains(ChargeCtrlModes::DEADLINE));
        assert!(!ChargeCtrlModes::empty().contains(ChargeCtrlModes::TOGGLE));
    }

    #[tokio::test]
    async fn test_handle_retries_transient_failures() {
        let hal = Arc::new(MockHal::new(ChargeCtrlModes::TOGGLE));
        hal.fail_next(2);

        let handle = HalHandle::with_retry(
            hal.clone(),
            RetryStrategy::ExponentialBackoff {
                max_retries: 2,
                base_delay_ms: 1,
            },
        );

        // Two failures, third attempt succeeds
        assert!(handle.set_charging_enabled(false).await.is_ok());
        assert!(!hal.is_charging_enabled());
    }

    #[tokio::test]
    async fn test_handle_gives_up_after_retries() {
        let hal = Arc::new(MockHal::new(ChargeCtrlModes::TOGGLE));
        hal.fail_next(5);

        let handle = HalHandle::with_retry(hal, RetryStrategy::NoRetry);
        assert!(handle.set_charging_enabled(false).await.is_err());
    }

    #[tokio::test]
    async fn test_is_mode_supported_fails_closed() {
        let hal = Arc::new(MockHal::new(ChargeCtrlModes::TOGGLE));
        hal.fail_next(10);

        let handle = HalHandle::with_retry(hal, RetryStrategy::NoRetry);
        assert!(!handle.is_mode_supported(ChargeCtrlModes::TOGGLE).await);
    }
}
