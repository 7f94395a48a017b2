//! Binary toggle pacing strategy.
//!
//! The hardware only supports allow/forbid charging, so the pacing decision
//! lives here: in limit mode a hysteresis band keeps the cell from bouncing
//! around the cap, and in time mode a small stage machine holds the battery
//! at 80% until the remaining window shrinks to the hardware's time-to-full
//! estimate, then charges through to 100%.

use async_trait::async_trait;
use chrono::Utc;

use super::{ChargingControlProvider, ProviderConfig};
use crate::config::ChargingMode;
use crate::error::Result;
use crate::hal::{ChargeCtrlModes, HalHandle};
use crate::schedule::ms_to_string;

/// Charging control only takes hold above this battery level
const CHARGE_CTRL_MIN_LEVEL: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Outside the configured window; no effect
    Idle,
    /// Charging freely toward the hold level
    Initial,
    /// Holding at the hold level until the window runs short
    Waiting,
    /// Charging through to full
    Continue,
}

pub struct Toggle {
    hal: HalHandle,
    enabled: bool,
    bypass_supported: bool,
    recharge_margin_pct: u32,
    time_margin_ms: i64,
    limit_set: bool,
    saved_target_time: i64,
    estimated_full_time_ms: i64,
    stage: Stage,
}

impl Toggle {
    /// Probe the HAL; `None` when the hardware cannot toggle charging
    pub async fn probe(hal: HalHandle, config: &ProviderConfig) -> Option<Self> {
        if !hal.is_mode_supported(ChargeCtrlModes::TOGGLE).await {
            return None;
        }

        let bypass_supported = hal
            .is_mode_supported(ChargeCtrlModes::TOGGLE.union(ChargeCtrlModes::BYPASS))
            .await;

        // With bypass the board can idle at the limit without draining, so
        // only a token margin is needed before recharging.
        let recharge_margin_pct = if bypass_supported {
            1
        } else {
            config.recharge_margin_pct
        };

        log::info!("Toggle provider: bypass supported: {}", bypass_supported);

        Some(Self {
            hal,
            enabled: false,
            bypass_supported,
            recharge_margin_pct,
            time_margin_ms: config.time_margin_mins as i64 * 60_000,
            limit_set: false,
            saved_target_time: 0,
            estimated_full_time_ms: 0,
            stage: Stage::Idle,
        })
    }

    async fn set_charging_enabled(&self, enabled: bool) -> Result<bool> {
        if self.hal.charging_enabled().await? != enabled {
            self.hal.set_charging_enabled(enabled).await?;
        }
        Ok(true)
    }

    fn should_stop_charging(&self, current_pct: f32, target_pct: u32) -> bool {
        if self.limit_set {
            // Already stopped: stay stopped until the hysteresis band clears
            current_pct >= target_pct.saturating_sub(self.recharge_margin_pct) as f32
        } else {
            current_pct >= target_pct as f32
        }
    }

    async fn next_stage(
        &mut self,
        battery_pct: f32,
        start_time: i64,
        target_time: i64,
    ) -> Result<Stage> {
        let current_time = Utc::now().timestamp_millis();
        let mut stage = self.stage;

        if start_time > current_time && stage != Stage::Continue {
            // Not yet inside the configured window
            return Ok(Stage::Idle);
        }

        if self.saved_target_time != target_time
            && (self.saved_target_time == 0 || self.saved_target_time >= current_time)
        {
            log::info!(
                "Target time changed to {}, restarting pacing",
                ms_to_string(target_time)
            );
            self.saved_target_time = target_time;
            stage = Stage::Initial;
        }

        let remaining_ms = self
            .hal
            .charge_time_remaining()
            .await?
            .map(|d| d.as_millis() as i64 + self.time_margin_ms);

        let delta_ms = target_time - current_time;

        Ok(match stage {
            Stage::Idle | Stage::Initial => match remaining_ms {
                Some(remaining) if battery_pct >= CHARGE_CTRL_MIN_LEVEL as f32 => {
                    if delta_ms > remaining {
                        // Enough slack to hold here and still make the target
                        self.estimated_full_time_ms = remaining;
                        Stage::Waiting
                    } else {
                        Stage::Continue
                    }
                }
                // Below the hold level, or the hardware has no estimate yet
                _ => Stage::Initial,
            },
            Stage::Waiting => {
                if delta_ms <= self.estimated_full_time_ms {
                    Stage::Continue
                } else {
                    Stage::Waiting
                }
            }
            Stage::Continue => Stage::Continue,
        })
    }

    async fn apply_stage(&self) -> Result<bool> {
        match self.stage {
            Stage::Idle => {
                self.set_charging_enabled(true).await?;
                Ok(false)
            }
            Stage::Initial | Stage::Continue => self.set_charging_enabled(true).await,
            Stage::Waiting => self.set_charging_enabled(false).await,
        }
    }

    async fn reset_state(&mut self) {
        self.limit_set = false;
        self.saved_target_time = 0;
        self.estimated_full_time_ms = 0;
        self.stage = Stage::Idle;
        if let Err(e) = self.hal.set_charging_enabled(true).await {
            log::error!("Failed to re-enable charging on reset: {}", e);
        }
    }
}

#[async_trait]
impl ChargingControlProvider for Toggle {
    fn name(&self) -> &'static str {
        "toggle"
    }

    fn requires_battery_monitoring(&self) -> bool {
        // Without bypass, "plugged but not charging" is indistinguishable
        // from "unplugged" unless we watch the battery level ourselves.
        !self.bypass_supported
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.reset_state().await;
        log::info!("Toggle provider enabled");
    }

    async fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        log::info!("Toggle provider disabled");
        self.reset_state().await;
    }

    async fn reset(&mut self) {
        self.reset_state().await;
    }

    async fn update_limit(&mut self, battery_pct: f32, limit: u32) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }

        self.limit_set = self.should_stop_charging(battery_pct, limit);
        log::info!(
            "Battery level {:.1}%, limit {}%, charging stopped: {}",
            battery_pct,
            limit,
            self.limit_set
        );
        self.set_charging_enabled(!self.limit_set).await
    }

    async fn update_time(
        &mut self,
        battery_pct: f32,
        start_time: i64,
        target_time: i64,
        mode: ChargingMode,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }

        if !mode.is_time_based() {
            log::error!("update_time called with non time-based mode {:?}", mode);
            return Ok(false);
        }

        let prev_stage = self.stage;
        self.stage = self.next_stage(battery_pct, start_time, target_time).await?;
        if prev_stage != self.stage {
            log::info!("Pacing stage change: {:?} -> {:?}", prev_stage, self.stage);
        }

        self.apply_stage().await
    }

    fn dump(&self) -> String {
        format!(
            "Provider: toggle\n  enabled: {}\n  limit_set: {}\n  saved_target_time: {}\n  \
             estimated_full_time_ms: {}\n  stage: {:?}\n  recharge_margin_pct: {}\n",
            self.enabled,
            self.limit_set,
            ms_to_string(self.saved_target_time),
            self.estimated_full_time_ms,
            self.stage,
            self.recharge_margin_pct,
        )
    }
}
