//! chargectl - battery charging control decision engine
//!
//! Decides when a plugged-in device should actually charge. Users pick a
//! strategy (charge toward the next alarm, toward a fixed time window, or
//! hold at a percentage cap) and the engine drives the charging hardware
//! through whichever control protocol the HAL supports:
//! - config: persisted user settings and the snapshot model
//! - schedule: charge-target time arithmetic (alarms, windows, local time)
//! - hal: hardware abstraction with capability bits and retries
//! - provider: pacing strategies bound to probed capabilities
//! - battery: power/battery event intake
//! - notify: user-facing status notification adapter
//! - controller: the event-serialized decision state machine

pub mod battery;
pub mod config;
pub mod controller;
pub mod error;
pub mod hal;
pub mod notify;
pub mod provider;
pub mod schedule;

// Re-export the embedder-facing surface
pub use battery::BatteryMonitor;
pub use config::{
    ChargingConfig, ChargingMode, MemorySettingsStore, SettingsStore, TomlSettingsStore,
};
pub use controller::{
    ChargingControlController, ChargingControlHandle, ControlEvent, EVENT_QUEUE_DEPTH,
};
pub use error::{Error, Result};
pub use hal::{ChargeCtrlModes, ChargingControlHal, HalHandle};
pub use notify::{NotificationContent, NotificationSink};
pub use provider::{ChargingControlProvider, ProviderConfig};
pub use schedule::{AlarmSource, ChargeTime};

use std::sync::Arc;
use tokio::sync::mpsc;

/// Probe the hardware, spawn the controller task, and return the embedder's
/// two attachment points: the settings/action handle and the battery event
/// intake. On unsupported hardware the service still starts but stays inert.
pub async fn launch(
    hal: Arc<dyn ChargingControlHal>,
    sink: Box<dyn NotificationSink>,
    alarms: Box<dyn AlarmSource>,
    settings: Arc<dyn SettingsStore>,
    provider_config: &ProviderConfig,
) -> (ChargingControlHandle, BatteryMonitor) {
    let provider = provider::select_provider(HalHandle::new(hal), provider_config).await;

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let controller = ChargingControlController::new(provider, sink, alarms, settings.clone());
    let monitor = BatteryMonitor::new(tx.clone(), controller.requires_battery_monitoring());
    let handle = ChargingControlHandle::new(settings, tx);

    tokio::spawn(controller.run(rx));

    (handle, monitor)
}
