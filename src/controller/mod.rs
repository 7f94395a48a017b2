//! Charging control controller.
//!
//! Owns the configuration snapshot, the per-session state, and the active
//! pacing provider, and re-runs the central evaluation on every trigger.
//! All triggers are delivered through one mpsc channel and handled by one
//! task, so the five trigger types are mutually exclusive and ordered
//! without any locking around session state.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, oneshot};

use crate::config::{
    self, ChargingConfig, ChargingMode, SettingsStore, KEY_ENABLED, KEY_LIMIT, KEY_MODE,
    KEY_START_TIME, KEY_TARGET_TIME,
};
use crate::error::{Error, Result};
use crate::notify::{ChargingNotification, NotificationSink};
use crate::provider::ChargingControlProvider;
use crate::schedule::{compute_charge_time, AlarmSource};

/// Depth of the trigger event queue
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Trigger events feeding the controller task
pub enum ControlEvent {
    /// Configuration changed; carries the full validated snapshot so the
    /// evaluation can never observe a half-updated configuration
    SettingsChanged(ChargingConfig),
    PowerConnected,
    PowerDisconnected,
    BatterySample { percent: f32 },
    /// User dismissed charging control for the rest of this session
    CancelOnce,
    /// Diagnostic dump request
    Dump(oneshot::Sender<String>),
}

pub struct ChargingControlController {
    settings: Arc<dyn SettingsStore>,
    alarms: Box<dyn AlarmSource>,
    provider: Option<Box<dyn ChargingControlProvider>>,
    notification: ChargingNotification,

    // Configuration snapshot, replaced wholesale on settings change
    config: ChargingConfig,

    // Session state, reset on every power disconnect
    battery_pct: f32,
    power_connected: bool,
    cancelled_once: bool,
}

impl ChargingControlController {
    pub fn new(
        provider: Option<Box<dyn ChargingControlProvider>>,
        sink: Box<dyn NotificationSink>,
        alarms: Box<dyn AlarmSource>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let config = ChargingConfig::load(settings.as_ref());

        Self {
            settings,
            alarms,
            provider,
            notification: ChargingNotification::new(sink),
            config,
            battery_pct: 0.0,
            power_connected: false,
            cancelled_once: false,
        }
    }

    /// Whether any hardware strategy was probed successfully. When false the
    /// controller is permanently inert and every trigger is a no-op.
    pub fn is_supported(&self) -> bool {
        self.provider.is_some()
    }

    pub fn requires_battery_monitoring(&self) -> bool {
        self.provider
            .as_ref()
            .map(|p| p.requires_battery_monitoring())
            .unwrap_or(false)
    }

    /// Drive the controller until the event channel closes.
    ///
    /// Restores the persisted configuration first, so the provider reflects
    /// the stored settings even before the first external trigger.
    pub async fn run(mut self, mut events: mpsc::Receiver<ControlEvent>) {
        if !self.is_supported() {
            log::info!("Charging control hardware not found, controller is inert");
        }

        if self.requires_battery_monitoring() {
            // The hardware cannot report unplug, treat the session as live
            self.power_connected = true;
        }

        let snapshot = ChargingConfig::load(self.settings.as_ref());
        self.handle_event(ControlEvent::SettingsChanged(snapshot)).await;

        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }

        log::info!("Charging control event channel closed, stopping");
    }

    /// Process one trigger. Exposed so tests can drive the state machine
    /// directly; production code goes through [`run`](Self::run).
    pub async fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::SettingsChanged(snapshot) => {
                log::info!("Configuration changed: {:?}", snapshot);
                self.config = snapshot;
                self.reset_internal_state().await;
                self.update_charge_control().await;
            }
            ControlEvent::PowerConnected => {
                self.power_connected = true;
                self.update_charge_control().await;
            }
            ControlEvent::PowerDisconnected => {
                // A fresh session always starts clean
                self.power_connected = false;
                self.battery_pct = 0.0;
                self.reset_internal_state().await;
                self.update_charge_control().await;
            }
            ControlEvent::BatterySample { percent } => {
                if !self.power_connected {
                    return;
                }
                self.battery_pct = percent;
                self.update_charge_control().await;
            }
            ControlEvent::CancelOnce => {
                log::info!("Charging control cancelled for this session");
                self.cancelled_once = true;
                if let Some(provider) = self.provider.as_mut() {
                    provider.disable().await;
                }
                self.notification.cancel();
            }
            ControlEvent::Dump(reply) => {
                let _ = reply.send(self.dump());
            }
        }
    }

    /// Clear everything that must not survive a session or configuration
    /// boundary: the cancel-once override, any visible notification, and the
    /// provider's saved pacing state (which includes the cached target time).
    async fn reset_internal_state(&mut self) {
        self.cancelled_once = false;
        self.notification.cancel();
        if let Some(provider) = self.provider.as_mut() {
            provider.reset().await;
        }
    }

    /// The central evaluation, run after every trigger's bookkeeping
    async fn update_charge_control(&mut self) {
        let Some(provider) = self.provider.as_mut() else {
            return;
        };

        if !self.config.enabled {
            provider.disable().await;
            self.notification.cancel();
            return;
        }

        // A cancelled session stays uncontrolled until the next disconnect,
        // no matter how many battery samples arrive in between.
        if self.cancelled_once || !self.power_connected {
            provider.disable().await;
            self.notification.cancel();
            return;
        }

        match self.config.mode {
            ChargingMode::None => {
                provider.disable().await;
                self.notification.cancel();
            }
            ChargingMode::Limit => {
                provider.enable().await;
                match provider.update_limit(self.battery_pct, self.config.limit).await {
                    Ok(true) => {
                        let done = self.battery_pct >= self.config.limit as f32;
                        self.notification.post_limit(self.config.limit, done);
                    }
                    Ok(false) => {}
                    Err(e) => log::error!("Failed to update charge limit: {}", e),
                }
            }
            mode @ (ChargingMode::Auto | ChargingMode::Manual) => {
                provider.enable().await;
                match compute_charge_time(mode, &self.config, Local::now(), self.alarms.as_ref()) {
                    None => {
                        // Auto without an alarm: nothing to target, degrade
                        // gracefully rather than guessing
                        provider.disable().await;
                        self.notification.cancel();
                    }
                    Some(t) => {
                        match provider
                            .update_time(self.battery_pct, t.start_time, t.target_time, mode)
                            .await
                        {
                            Ok(true) => {
                                let done = self.battery_pct >= 100.0;
                                self.notification.post_target(t.target_time, done);
                            }
                            Ok(false) => {}
                            Err(e) => log::error!("Failed to update charge window: {}", e),
                        }
                    }
                }
            }
        }
    }

    fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "ChargingControlController configuration:");
        let _ = writeln!(out, "  enabled: {}", self.config.enabled);
        let _ = writeln!(out, "  mode: {:?}", self.config.mode);
        let _ = writeln!(out, "  limit: {}", self.config.limit);
        let _ = writeln!(out, "  start_time: {}", self.config.start_time);
        let _ = writeln!(out, "  target_time: {}", self.config.target_time);
        let _ = writeln!(out, "ChargingControlController state:");
        let _ = writeln!(out, "  battery_pct: {:.1}", self.battery_pct);
        let _ = writeln!(out, "  power_connected: {}", self.power_connected);
        let _ = writeln!(out, "  cancelled_once: {}", self.cancelled_once);
        let _ = writeln!(out, "  notification: {}", self.notification.dump());
        match self.provider.as_ref() {
            Some(provider) => {
                let _ = write!(out, "{}", provider.dump());
            }
            None => {
                let _ = writeln!(out, "Provider: none (unsupported hardware)");
            }
        }
        out
    }
}

/// Cloneable front door for settings writes and user actions.
///
/// Setters validate first, persist second, and only then enqueue a
/// `SettingsChanged` snapshot; a rejected write leaves the stored value and
/// the controller untouched.
#[derive(Clone)]
pub struct ChargingControlHandle {
    settings: Arc<dyn SettingsStore>,
    events: mpsc::Sender<ControlEvent>,
}

impl ChargingControlHandle {
    pub fn new(settings: Arc<dyn SettingsStore>, events: mpsc::Sender<ControlEvent>) -> Self {
        Self { settings, events }
    }

    /// Current persisted configuration snapshot
    pub fn config(&self) -> ChargingConfig {
        ChargingConfig::load(self.settings.as_ref())
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.settings.put(KEY_ENABLED, enabled as i64)?;
        self.notify_settings_changed()
    }

    pub fn set_mode(&self, mode: i64) -> Result<()> {
        let mode = config::validate_mode(mode)?;
        self.settings.put(KEY_MODE, mode.as_raw())?;
        self.notify_settings_changed()
    }

    pub fn set_limit(&self, limit: i64) -> Result<()> {
        let limit = config::validate_limit(limit)?;
        self.settings.put(KEY_LIMIT, limit as i64)?;
        self.notify_settings_changed()
    }

    pub fn set_start_time(&self, seconds_of_day: i64) -> Result<()> {
        let time = config::validate_time_of_day(seconds_of_day)?;
        self.settings.put(KEY_START_TIME, time as i64)?;
        self.notify_settings_changed()
    }

    pub fn set_target_time(&self, seconds_of_day: i64) -> Result<()> {
        let time = config::validate_time_of_day(seconds_of_day)?;
        self.settings.put(KEY_TARGET_TIME, time as i64)?;
        self.notify_settings_changed()
    }

    /// Restore all five configuration keys to the platform defaults
    pub fn reset_to_defaults(&self) -> Result<()> {
        ChargingConfig::store_defaults(self.settings.as_ref())?;
        self.notify_settings_changed()
    }

    /// Suppress charging control for the remainder of the current session
    pub fn cancel_once(&self) -> Result<()> {
        self.send(ControlEvent::CancelOnce)
    }

    /// Fetch a diagnostic dump from the controller task
    pub async fn dump(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.send(ControlEvent::Dump(tx))?;
        rx.await
            .map_err(|_| Error::Config("controller task is gone".to_string()))
    }

    fn notify_settings_changed(&self) -> Result<()> {
        let snapshot = ChargingConfig::load(self.settings.as_ref());
        self.send(ControlEvent::SettingsChanged(snapshot))
    }

    fn send(&self, event: ControlEvent) -> Result<()> {
        self.events
            .try_send(event)
            .map_err(|e| Error::Config(format!("event queue unavailable: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySettingsStore;
    use crate::notify::NotificationContent;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedAlarm(Option<i64>);

    impl AlarmSource for FixedAlarm {
        fn next_alarm(&self) -> Option<i64> {
            self.0
        }
    }

    #[derive(Clone, Default)]
    struct ProviderLog {
        enables: Arc<AtomicU32>,
        disables: Arc<AtomicU32>,
        resets: Arc<AtomicU32>,
        limit_updates: Arc<Mutex<Vec<(f32, u32)>>>,
        time_updates: Arc<AtomicU32>,
    }

    struct RecordingProvider {
        log: ProviderLog,
        enabled: bool,
        notify: bool,
    }

    impl RecordingProvider {
        fn new(log: ProviderLog) -> Self {
            Self {
                log,
                enabled: false,
                notify: true,
            }
        }
    }

    #[async_trait]
    impl ChargingControlProvider for RecordingProvider {
        fn name(&self) -> &'static str {
            "recording"
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
            self.log.enables.fetch_add(1, Ordering::SeqCst);
        }

        async fn disable(&mut self) {
            if !self.enabled {
                return;
            }
            self.enabled = false;
            self.log.disables.fetch_add(1, Ordering::SeqCst);
        }

        async fn reset(&mut self) {
            self.log.resets.fetch_add(1, Ordering::SeqCst);
        }

        async fn update_limit(&mut self, battery_pct: f32, limit: u32) -> Result<bool> {
            self.log.limit_updates.lock().push((battery_pct, limit));
            Ok(self.notify)
        }

        async fn update_time(
            &mut self,
            _battery_pct: f32,
            _start_time: i64,
            _target_time: i64,
            _mode: ChargingMode,
        ) -> Result<bool> {
            self.log.time_updates.fetch_add(1, Ordering::SeqCst);
            Ok(self.notify)
        }

        fn dump(&self) -> String {
            "Provider: recording\n".to_string()
        }
    }

    #[derive(Clone, Default)]
    struct SinkLog {
        posts: Arc<Mutex<Vec<NotificationContent>>>,
        cancels: Arc<AtomicU32>,
    }

    struct RecordingSink(SinkLog);

    impl NotificationSink for RecordingSink {
        fn post(&self, content: &NotificationContent) {
            self.0.posts.lock().push(*content);
        }

        fn cancel(&self) {
            self.0.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        controller: ChargingControlController,
        provider: ProviderLog,
        sink: SinkLog,
        settings: Arc<MemorySettingsStore>,
    }

    fn harness(alarm: Option<i64>) -> Harness {
        let settings = Arc::new(MemorySettingsStore::new());
        let provider = ProviderLog::default();
        let sink = SinkLog::default();

        let controller = ChargingControlController::new(
            Some(Box::new(RecordingProvider::new(provider.clone()))),
            Box::new(RecordingSink(sink.clone())),
            Box::new(FixedAlarm(alarm)),
            settings.clone(),
        );

        Harness {
            controller,
            provider,
            sink,
            settings,
        }
    }

    fn limit_snapshot(limit: u32) -> ChargingConfig {
        ChargingConfig {
            enabled: true,
            mode: ChargingMode::Limit,
            limit,
            ..ChargingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_config_keeps_provider_off() {
        let mut h = harness(None);

        h.controller
            .handle_event(ControlEvent::SettingsChanged(ChargingConfig::default()))
            .await;
        h.controller.handle_event(ControlEvent::PowerConnected).await;

        assert_eq!(h.provider.enables.load(Ordering::SeqCst), 0);
        assert!(h.sink.posts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_limit_at_target_posts_done() {
        let mut h = harness(None);

        h.controller
            .handle_event(ControlEvent::SettingsChanged(limit_snapshot(80)))
            .await;
        h.controller.handle_event(ControlEvent::PowerConnected).await;
        h.controller
            .handle_event(ControlEvent::BatterySample { percent: 80.0 })
            .await;

        let posts = h.sink.posts.lock();
        assert!(matches!(
            posts.last(),
            Some(NotificationContent::Limit { limit: 80, done: true })
        ));
    }

    #[tokio::test]
    async fn test_auto_without_alarm_cancels_only() {
        let mut h = harness(None);
        h.controller.config = ChargingConfig {
            enabled: true,
            mode: ChargingMode::Auto,
            ..ChargingConfig::default()
        };

        h.controller.handle_event(ControlEvent::PowerConnected).await;

        assert!(h.sink.posts.lock().is_empty());
        assert_eq!(h.sink.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_with_alarm_posts_target() {
        let target = Local::now().timestamp_millis() + 8 * 3_600_000;
        let mut h = harness(Some(target));
        h.controller.config = ChargingConfig {
            enabled: true,
            mode: ChargingMode::Auto,
            ..ChargingConfig::default()
        };

        h.controller.handle_event(ControlEvent::PowerConnected).await;
        h.controller
            .handle_event(ControlEvent::BatterySample { percent: 55.0 })
            .await;

        let posts = h.sink.posts.lock();
        assert!(matches!(
            posts.last(),
            Some(NotificationContent::Target { target_time, done: false }) if *target_time == target
        ));
    }

    #[tokio::test]
    async fn test_cancel_once_short_circuits_until_disconnect() {
        let mut h = harness(None);

        h.controller
            .handle_event(ControlEvent::SettingsChanged(limit_snapshot(80)))
            .await;
        h.controller.handle_event(ControlEvent::PowerConnected).await;
        h.controller
            .handle_event(ControlEvent::BatterySample { percent: 50.0 })
            .await;
        assert_eq!(h.provider.enables.load(Ordering::SeqCst), 1);

        h.controller.handle_event(ControlEvent::CancelOnce).await;
        assert_eq!(h.provider.disables.load(Ordering::SeqCst), 1);

        // Samples after cancel must not re-enable control
        h.controller
            .handle_event(ControlEvent::BatterySample { percent: 60.0 })
            .await;
        assert_eq!(h.provider.enables.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.limit_updates.lock().len(), 1);

        // Disconnect clears the override; the next session is controlled
        h.controller
            .handle_event(ControlEvent::PowerDisconnected)
            .await;
        h.controller.handle_event(ControlEvent::PowerConnected).await;
        h.controller
            .handle_event(ControlEvent::BatterySample { percent: 60.0 })
            .await;
        assert_eq!(h.provider.enables.load(Ordering::SeqCst), 2);
        assert_eq!(h.provider.limit_updates.lock().len(), 2);
        assert!(!h.controller.cancelled_once);
    }

    #[tokio::test]
    async fn test_settings_changes_each_reset_and_reevaluate() {
        let mut h = harness(None);

        h.controller.handle_event(ControlEvent::PowerConnected).await;
        h.controller
            .handle_event(ControlEvent::SettingsChanged(limit_snapshot(70)))
            .await;
        h.controller
            .handle_event(ControlEvent::SettingsChanged(limit_snapshot(90)))
            .await;

        assert_eq!(h.provider.resets.load(Ordering::SeqCst), 2);
        let updates = h.provider.limit_updates.lock();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1, 70);
        assert_eq!(updates[1].1, 90);
    }

    #[tokio::test]
    async fn test_unsupported_hardware_is_inert() {
        let settings = Arc::new(MemorySettingsStore::new());
        let sink = SinkLog::default();
        let mut controller = ChargingControlController::new(
            None,
            Box::new(RecordingSink(sink.clone())),
            Box::new(FixedAlarm(None)),
            settings,
        );

        assert!(!controller.is_supported());
        controller
            .handle_event(ControlEvent::SettingsChanged(limit_snapshot(80)))
            .await;
        controller.handle_event(ControlEvent::PowerConnected).await;
        controller
            .handle_event(ControlEvent::BatterySample { percent: 50.0 })
            .await;

        assert!(sink.posts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_zeroes_battery_level() {
        let mut h = harness(None);

        h.controller
            .handle_event(ControlEvent::SettingsChanged(limit_snapshot(80)))
            .await;
        h.controller.handle_event(ControlEvent::PowerConnected).await;
        h.controller
            .handle_event(ControlEvent::BatterySample { percent: 77.0 })
            .await;
        h.controller
            .handle_event(ControlEvent::PowerDisconnected)
            .await;
        h.controller.handle_event(ControlEvent::PowerConnected).await;

        // Evaluation after reconnect runs on a zeroed session level
        let updates = h.provider.limit_updates.lock();
        assert_eq!(updates.last().map(|(pct, _)| *pct), Some(0.0));
    }

    #[tokio::test]
    async fn test_handle_rejects_out_of_range_writes() {
        let h = harness(None);
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let handle = ChargingControlHandle::new(h.settings.clone(), tx);

        assert!(handle.set_limit(150).is_err());
        assert!(handle.set_start_time(90_000).is_err());
        assert!(handle.set_mode(7).is_err());
        assert!(rx.try_recv().is_err());

        handle.set_limit(85).unwrap();
        match rx.try_recv() {
            Ok(ControlEvent::SettingsChanged(snapshot)) => assert_eq!(snapshot.limit, 85),
            _ => panic!("expected a settings snapshot event"),
        }

        // The rejected writes left the store untouched
        assert_eq!(handle.config().limit, 85);
        assert_eq!(
            handle.config().start_time,
            ChargingConfig::default().start_time
        );
    }

    #[tokio::test]
    async fn test_reset_to_defaults_restores_all_keys() {
        let h = harness(None);
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let handle = ChargingControlHandle::new(h.settings.clone(), tx);

        handle.set_enabled(true).unwrap();
        handle.set_limit(55).unwrap();
        handle.reset_to_defaults().unwrap();

        while rx.try_recv().is_ok() {}
        assert_eq!(handle.config(), ChargingConfig::default());
    }
}
