//! Battery and power event intake.
//!
//! Wraps the platform's raw power-connect/disconnect/battery-changed
//! callbacks into the controller's event stream. Subscription policy lives
//! here: battery samples are forwarded only while power is connected,
//! unless the active provider needs always-on monitoring because its
//! hardware cannot distinguish "plugged but not charging" from "unplugged".

use tokio::sync::mpsc;

use crate::controller::ControlEvent;

pub struct BatteryMonitor {
    events: mpsc::Sender<ControlEvent>,
    always_monitor: bool,
    power_connected: bool,
    battery_pct: Option<f32>,
}

impl BatteryMonitor {
    pub fn new(events: mpsc::Sender<ControlEvent>, always_monitor: bool) -> Self {
        Self {
            events,
            always_monitor,
            // Always-monitor hardware cannot report unplug reliably, so the
            // session is treated as live from the start.
            power_connected: always_monitor,
            battery_pct: None,
        }
    }

    pub fn is_power_connected(&self) -> bool {
        self.power_connected
    }

    /// Most recent valid battery percentage, if any sample arrived yet
    pub fn battery_percent(&self) -> Option<f32> {
        self.battery_pct
    }

    pub async fn power_connected(&mut self) {
        log::info!("Power connected, start monitoring battery");
        self.power_connected = true;
        self.send(ControlEvent::PowerConnected).await;
    }

    pub async fn power_disconnected(&mut self) {
        log::info!("Power disconnected, stop monitoring battery");
        self.power_connected = false;
        self.send(ControlEvent::PowerDisconnected).await;
    }

    /// Feed a raw battery sample. Malformed samples are dropped silently.
    pub async fn battery_changed(&mut self, level: i32, scale: i32) {
        if level == -1 || scale == -1 {
            return;
        }

        if !self.power_connected && !self.always_monitor {
            return;
        }

        let percent = level as f32 * 100.0 / scale as f32;
        self.battery_pct = Some(percent);
        self.send(ControlEvent::BatterySample { percent }).await;
    }

    async fn send(&self, event: ControlEvent) {
        if self.events.send(event).await.is_err() {
            log::warn!("Charging controller is gone, dropping battery event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(rx: &mut mpsc::Receiver<ControlEvent>) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_malformed_samples_dropped() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut monitor = BatteryMonitor::new(tx, false);

        monitor.power_connected().await;
        monitor.battery_changed(-1, 100).await;
        monitor.battery_changed(50, -1).await;
        monitor.battery_changed(50, 100).await;

        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 2); // connect + one valid sample
        assert!(matches!(
            events[1],
            ControlEvent::BatterySample { percent } if (percent - 50.0).abs() < f32::EPSILON
        ));
        assert_eq!(monitor.battery_percent(), Some(50.0));
    }

    #[tokio::test]
    async fn test_samples_ignored_while_unplugged() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut monitor = BatteryMonitor::new(tx, false);

        monitor.battery_changed(80, 100).await;
        assert!(drain(&mut rx).await.is_empty());

        monitor.power_connected().await;
        monitor.power_disconnected().await;
        monitor.battery_changed(80, 100).await;

        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 2); // connect + disconnect only
    }

    #[tokio::test]
    async fn test_always_monitor_forwards_when_unplugged() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut monitor = BatteryMonitor::new(tx, true);

        assert!(monitor.is_power_connected());
        monitor.battery_changed(120, 150).await;

        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ControlEvent::BatterySample { percent } if (percent - 80.0).abs() < f32::EPSILON
        ));
    }
}
