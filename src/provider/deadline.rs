//! Deadline pacing strategy.
//!
//! The hardware accepts a completion deadline and paces the charge current
//! itself; this provider only forwards the target when it changes and
//! clears it on reset.

use async_trait::async_trait;
use chrono::Utc;

use super::ChargingControlProvider;
use crate::config::ChargingMode;
use crate::error::{Error, Result};
use crate::hal::{ChargeCtrlModes, HalHandle};
use crate::schedule::ms_to_string;

pub struct Deadline {
    hal: HalHandle,
    enabled: bool,
    saved_target_time: i64,
}

impl Deadline {
    /// Probe the HAL; `None` when the hardware does not self-pace
    pub async fn probe(hal: HalHandle) -> Option<Self> {
        if !hal.is_mode_supported(ChargeCtrlModes::DEADLINE).await {
            return None;
        }

        Some(Self {
            hal,
            enabled: false,
            saved_target_time: 0,
        })
    }

    async fn clear_deadline(&mut self) {
        self.saved_target_time = 0;
        if let Err(e) = self.hal.set_charging_deadline(-1).await {
            log::error!("Failed to clear charging deadline: {}", e);
        }
    }
}

#[async_trait]
impl ChargingControlProvider for Deadline {
    fn name(&self) -> &'static str {
        "deadline"
    }

    fn requires_battery_monitoring(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.clear_deadline().await;
        log::info!("Deadline provider enabled");
    }

    async fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        log::info!("Deadline provider disabled");
        self.clear_deadline().await;
    }

    async fn reset(&mut self) {
        self.clear_deadline().await;
    }

    async fn update_limit(&mut self, _battery_pct: f32, _limit: u32) -> Result<bool> {
        Err(Error::Unsupported(
            "deadline hardware cannot cap state of charge".to_string(),
        ))
    }

    async fn update_time(
        &mut self,
        _battery_pct: f32,
        _start_time: i64,
        target_time: i64,
        _mode: ChargingMode,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }

        // Same target as last push: the hardware already knows, skip the call
        if target_time == self.saved_target_time {
            return Ok(true);
        }

        let deadline_secs = (target_time - Utc::now().timestamp_millis()) / 1000;
        log::info!(
            "Setting charge deadline {} ({} seconds away)",
            ms_to_string(target_time),
            deadline_secs
        );

        self.hal.set_charging_deadline(deadline_secs).await?;
        self.saved_target_time = target_time;
        Ok(true)
    }

    fn dump(&self) -> String {
        format!(
            "Provider: deadline\n  enabled: {}\n  saved_target_time: {}\n",
            self.enabled,
            ms_to_string(self.saved_target_time),
        )
    }
}
