//! Hardware pacing strategies.
//!
//! Exactly one strategy is active per device, chosen once at startup by
//! probing the HAL's capability bits in fixed priority: toggle first, then
//! deadline. If neither probe succeeds the whole feature is inert.

mod deadline;
mod toggle;

pub use deadline::Deadline;
pub use toggle::Toggle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ChargingMode;
use crate::error::Result;
use crate::hal::HalHandle;

/// Tuning for the toggle strategy's pacing decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Hysteresis below the limit before charging restarts, in percent.
    /// Ignored (forced to 1) when the HAL supports bypass.
    pub recharge_margin_pct: u32,
    /// Slack added to the hardware's time-to-full estimate, in minutes
    pub time_margin_mins: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            recharge_margin_pct: 10,
            time_margin_mins: 30,
        }
    }
}

/// A charging pacing strategy bound to a probed HAL capability.
///
/// `enable`/`disable` are idempotent; `disable` is always safe to call even
/// if the provider was never enabled. The `update_*` calls return whether a
/// status notification should be shown to the user.
#[async_trait]
pub trait ChargingControlProvider: Send {
    fn name(&self) -> &'static str;

    /// Whether the controller must receive battery samples at all times,
    /// not just while power is connected
    fn requires_battery_monitoring(&self) -> bool;

    fn is_enabled(&self) -> bool;

    async fn enable(&mut self);

    async fn disable(&mut self);

    /// Clear strategy-internal state and release any hardware effect
    async fn reset(&mut self);

    /// Push the current percentage cap (limit mode)
    async fn update_limit(&mut self, battery_pct: f32, limit: u32) -> Result<bool>;

    /// Push the current charge window (auto/manual modes)
    async fn update_time(
        &mut self,
        battery_pct: f32,
        start_time: i64,
        target_time: i64,
        mode: ChargingMode,
    ) -> Result<bool>;

    /// Diagnostic text for dumpsys-style output
    fn dump(&self) -> String;
}

/// Probe the HAL and keep the first supported strategy.
///
/// Returns `None` when the hardware supports neither protocol; the caller
/// then runs with charging control permanently inert.
pub async fn select_provider(
    hal: HalHandle,
    config: &ProviderConfig,
) -> Option<Box<dyn ChargingControlProvider>> {
    if let Some(toggle) = Toggle::probe(hal.clone(), config).await {
        log::info!("Selected toggle charging control provider");
        return Some(Box::new(toggle));
    }

    if let Some(deadline) = Deadline::probe(hal).await {
        log::info!("Selected deadline charging control provider");
        return Some(Box::new(deadline));
    }

    log::error!("No available charging control provider");
    None
}
