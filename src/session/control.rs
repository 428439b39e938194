//! Control session with statum state machine
//!
//! One session owns the device snapshot, the timers and the history of a
//! single connected client. Every mutation happens on the session task, so
//! no locking is involved; ordering between reports and commands is handled
//! by the synchronizer protocol.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Active ──► Disposing ──► Disposed
//! ```
//!
//! # Data flow
//!
//! ```text
//! MqttMessage ──► [TopicRouter] ──► [DeviceSynchronizer] ──► SessionView
//!                                          ▲      │
//! Intent ──► [command dispatch] ──► Publisher     └──► [RuleEngine] (poll)
//!                   ▲
//!             [Scheduler] (debounce, confirmation, delay-off, notice)
//! ```

use super::error::SessionError;
use super::intent::Intent;
use super::scheduler::{Scheduler, TimerFired, TimerKind};
use super::view::{DelayTimerView, Notice, Operator, SessionView};
use crate::automation::RuleEngine;
use crate::config::{AppConfig, TimingConfig, TopicConfig};
use crate::device::{DeviceSnapshot, DeviceSynchronizer, LampId, TerraceMode, ThresholdOutcome};
use crate::history::{ActivityHistory, ChartPoint, ChartSeries, HistoryEntry};
use crate::mqtt::{ConnectionState, MqttMessage, Publisher};
use crate::protocol::{Command, DeviceScale, Inbound, LedAction};
use crate::router::{inbound_router, TopicRouter};
use chrono::{Local, NaiveTime};
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Initializing, // Router, rules and snapshot built
    Active,       // Handling messages, intents and timers
    Disposing,    // Cancelling timers
    Disposed,     // Nothing pending, view frozen
}

/// Requests accepted by a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Intent(Intent),
    SetOperator(Option<Operator>),
}

/// Event sources of the session loop
pub struct SessionInputs {
    pub inbound: mpsc::Receiver<MqttMessage>,
    pub requests: mpsc::Receiver<SessionRequest>,
    pub connection: watch::Receiver<ConnectionState>,
}

#[machine]
pub struct ControlSession<S: SessionState> {
    publisher: Arc<dyn Publisher>,
    topics: TopicConfig,
    timing: TimingConfig,
    scale: DeviceScale,
    gate_room_lamps: bool,
    router: TopicRouter<Inbound>,
    sync: DeviceSynchronizer,
    rules: RuleEngine,
    scheduler: Scheduler,
    history: ActivityHistory,
    chart: ChartSeries,
    notice: Option<Notice>,
    operator: Option<Operator>,
    connection: ConnectionState,
    view_tx: watch::Sender<SessionView>,
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Command that moves `lamp` to `on`. The room controller only understands
/// toggles, so room lamps rely on the known state being accurate.
fn switch_command(lamp: LampId, on: bool) -> Command {
    match lamp {
        LampId::Terrace => Command::Terrace(LedAction::from_state(on)),
        room => Command::ToggleRoom(room),
    }
}

fn toggle_command(lamp: LampId) -> Command {
    match lamp {
        LampId::Terrace => Command::Terrace(LedAction::Toggle),
        room => Command::ToggleRoom(room),
    }
}

impl<S: SessionState> ControlSession<S> {
    pub fn snapshot(&self) -> &DeviceSnapshot {
        self.sync.snapshot()
    }

    pub fn history(&self) -> &ActivityHistory {
        &self.history
    }

    pub fn chart(&self) -> &ChartSeries {
        &self.chart
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> SessionView {
        let now = Instant::now();
        SessionView {
            snapshot: self.sync.snapshot().clone(),
            connection: self.connection,
            strategy: self.rules.kind(),
            pending_threshold: self.sync.pending_confirmation().map(|p| p.expected),
            editing_threshold: self.sync.is_editing_threshold(),
            delay_timers: self
                .scheduler
                .delay_timers()
                .into_iter()
                .map(|(lamp, deadline)| DelayTimerView {
                    lamp,
                    remaining: deadline.saturating_duration_since(now),
                })
                .collect(),
            history: self.history.to_vec(),
            chart: self.chart.to_vec(),
            notice: self.notice.clone(),
            operator: self.operator.clone(),
        }
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(self.view());
    }

    fn record(&mut self, message: impl Into<String>) {
        let entry = HistoryEntry::now(message);
        info!("{}", entry.message);
        self.history.append(entry);
    }
}

impl ControlSession<Initializing> {
    pub fn create(
        config: &AppConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, SessionError> {
        info!("Creating control session for {}", config.broker);

        let scale = DeviceScale::new(config.device.scale_max);
        let router = inbound_router(&config.topics, scale)?;
        let rules = RuleEngine::from_config(&config.automation)
            .map_err(|e| SessionError::Initialization(e.to_string()))?;
        let snapshot =
            DeviceSnapshot::initial(config.device.initial_threshold, config.device.room3_enabled);
        let sync = DeviceSynchronizer::new(snapshot);
        let connection = publisher.connection_state();

        let session = Self::new(
            publisher,
            config.topics.clone(),
            config.timing.clone(),
            scale,
            config.device.gate_room_lamps,
            router,
            sync,
            rules,
            Scheduler::new(),
            ActivityHistory::new(config.buffers.history_capacity),
            ChartSeries::new(config.buffers.chart_capacity),
            None,       // notice
            None,       // operator
            connection,
            watch::channel(SessionView::default()).0,
        );
        session.view_tx.send_replace(session.view());
        Ok(session)
    }

    pub fn activate(mut self) -> ControlSession<Active> {
        self.record("Session started");
        self.publish_view();
        self.transition()
    }
}

impl ControlSession<Active> {
    pub fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Intent(intent) => self.apply(intent),
            SessionRequest::SetOperator(operator) => self.set_operator(operator),
        }
    }

    pub fn apply(&mut self, intent: Intent) {
        debug!("Applying intent {:?}", intent);
        match intent {
            Intent::SetMode(mode) => self.set_mode(mode),
            Intent::ToggleLamp(lamp) => self.toggle_lamp(lamp),
            Intent::SetThreshold(value) => self.set_threshold(value),
            Intent::SetDelayTimer { lamp, minutes } => self.set_delay_timer(lamp, minutes),
            Intent::CancelDelayTimer(lamp) => self.cancel_delay_timer(lamp),
            Intent::AllOn => self.set_all_rooms(true),
            Intent::AllOff => self.set_all_rooms(false),
        }
    }

    pub fn set_operator(&mut self, operator: Option<Operator>) {
        match &operator {
            Some(op) => info!("Operator {} (admin: {})", op.username, op.is_admin),
            None => info!("Operator cleared"),
        }
        self.operator = operator;
        self.publish_view();
    }

    /// Mode is taken from the device's next report, never set locally
    pub fn set_mode(&mut self, mode: TerraceMode) {
        if self.dispatch(Command::SetMode(mode)) {
            self.record(format!("Terrace mode change to {} requested", mode));
        }
        self.publish_view();
    }

    /// No-op for lamps locked by auto mode
    pub fn toggle_lamp(&mut self, lamp: LampId) {
        if !self.sync.snapshot().has_lamp(lamp) {
            warn!("Ignoring toggle of unavailable {}", lamp);
            return;
        }
        if self.is_locked(lamp) {
            debug!("Ignoring toggle of {} while terrace mode is auto", lamp);
            return;
        }

        let next = !self.sync.snapshot().lamp(lamp);
        if self.dispatch(toggle_command(lamp)) {
            self.sync.set_lamp_optimistic(lamp, next);
            self.record(format!("{} {} (manual)", lamp, on_off(next)));
        }
        self.publish_view();
    }

    /// Shows the value at once and publishes it after the quiet interval.
    /// Each call restarts the interval.
    pub fn set_threshold(&mut self, value: u8) {
        self.sync.edit_threshold(value.min(100));
        self.scheduler.cancel(TimerKind::Confirmation);
        self.scheduler.arm(TimerKind::Debounce, self.timing.debounce());
        self.publish_view();
    }

    fn flush_threshold(&mut self) {
        let value = self.sync.snapshot().terrace_threshold;
        if self.dispatch(Command::SetThreshold(self.scale.to_device(value))) {
            let deadline = self
                .scheduler
                .arm(TimerKind::Confirmation, self.timing.confirmation_timeout());
            self.sync.expect_threshold(value, deadline);
            self.record(format!("Light threshold set to {}%", value));
        } else {
            self.sync.abandon_threshold_edit();
        }
    }

    /// Turns `lamp` on if needed and switches it off after `minutes`,
    /// replacing any timer already running for it
    pub fn set_delay_timer(&mut self, lamp: LampId, minutes: u32) {
        if !self.sync.snapshot().has_lamp(lamp) {
            warn!("Ignoring delay timer for unavailable {}", lamp);
            return;
        }
        if minutes == 0 {
            warn!("Ignoring zero-minute delay timer for {}", lamp);
            return;
        }
        if self.is_locked(lamp) {
            debug!("Ignoring delay timer for {} while terrace mode is auto", lamp);
            return;
        }

        let replaced = self.scheduler.cancel(TimerKind::DelayOff(lamp));
        if replaced {
            debug!("Replacing running delay timer of {}", lamp);
        }

        if !self.sync.snapshot().lamp(lamp) {
            if !self.dispatch(switch_command(lamp, true)) {
                self.publish_view();
                return;
            }
            self.sync.set_lamp_optimistic(lamp, true);
        }

        let delay = Duration::from_secs(u64::from(minutes) * 60);
        self.scheduler.arm(TimerKind::DelayOff(lamp), delay);
        self.record(format!("{}-minute timer set for {}", minutes, lamp));
        self.publish_view();
    }

    pub fn cancel_delay_timer(&mut self, lamp: LampId) {
        if self.scheduler.cancel(TimerKind::DelayOff(lamp)) {
            self.record(format!("Timer for {} cancelled", lamp));
            self.publish_view();
        } else {
            debug!("No delay timer running for {}", lamp);
        }
    }

    fn fire_delay_timer(&mut self, lamp: LampId) {
        if !self.sync.snapshot().lamp(lamp) {
            self.record(format!("Timer finished, {} already OFF", lamp));
            return;
        }
        if self.is_locked(lamp) {
            self.record(format!("Timer finished, {} left to auto mode", lamp));
            return;
        }
        if self.dispatch(switch_command(lamp, false)) {
            self.sync.set_lamp_optimistic(lamp, false);
            self.record(format!("{} OFF (timer finished)", lamp));
        } else {
            self.record(format!("Timer finished, {} OFF not sent", lamp));
        }
    }

    pub fn set_all_rooms(&mut self, on: bool) {
        if self.gate_room_lamps && self.sync.snapshot().terrace_mode != TerraceMode::Manual {
            debug!("Ignoring all-{} while room lamps follow auto mode", on_off(on));
            return;
        }

        if self.dispatch(Command::AllRooms(on)) {
            let rooms: Vec<LampId> = self.sync.snapshot().room_lamps().collect();
            for lamp in rooms {
                self.sync.set_lamp_optimistic(lamp, on);
            }
            self.record(format!("All room lamps {}", on_off(on)));
        }
        self.publish_view();
    }

    pub fn handle_message(&mut self, message: &MqttMessage) {
        debug!("Inbound {}", message);
        if let Some(inbound) = self.router.dispatch(message) {
            self.handle_inbound(inbound);
        }
    }

    pub fn handle_inbound(&mut self, inbound: Inbound) {
        let now = Instant::now();
        match inbound {
            Inbound::Status(report) => {
                let outcome = self.sync.apply_status(&report, now);
                self.chart.append(ChartPoint::at(Local::now(), outcome.intensity));

                if let Some(mode) = outcome.mode_change {
                    self.record(format!("Device reports terrace mode {}", mode));
                }
                if let Some(threshold) = outcome.threshold {
                    self.note_threshold(threshold);
                }
                for (lamp, on) in outcome.lamp_changes {
                    self.record(format!("{} reported {}", lamp, on_off(on)));
                }
            }
            Inbound::ThresholdEcho(reported) => {
                let outcome = self.sync.apply_threshold_echo(reported, now);
                self.note_threshold(outcome);
            }
            Inbound::RoomStatus(lamps) => {
                for (lamp, on) in self.sync.apply_lamp_reports(&lamps) {
                    self.record(format!("{} reported {}", lamp, on_off(on)));
                }
            }
        }
        self.publish_view();
    }

    fn note_threshold(&mut self, outcome: ThresholdOutcome) {
        match outcome {
            ThresholdOutcome::Confirmed(value) => {
                self.scheduler.cancel(TimerKind::Confirmation);
                debug!("Threshold {}% confirmed", value);
            }
            ThresholdOutcome::Accepted { value, changed: true } => {
                self.record(format!("Device reports light threshold {}%", value));
            }
            ThresholdOutcome::Accepted { .. } => {}
            ThresholdOutcome::Ignored { reported, local } => {
                debug!("Held threshold {}% against report of {}%", local, reported);
            }
        }
    }

    /// One poll of the automation rule
    pub fn rule_tick(&mut self, time_of_day: NaiveTime) {
        if self.publisher.connection_state() != ConnectionState::Connected {
            debug!("Skipping rule evaluation while {}", self.connection);
            return;
        }

        let Some(decision) = self.rules.tick(self.sync.snapshot(), time_of_day) else {
            return;
        };
        if self.dispatch(switch_command(decision.lamp, decision.on)) {
            self.sync.set_lamp_optimistic(decision.lamp, decision.on);
            self.record(format!(
                "{} {} (automatic, {})",
                decision.lamp,
                on_off(decision.on),
                decision.reason
            ));
        }
        self.publish_view();
    }

    pub fn connection_changed(&mut self, state: ConnectionState) {
        if state == self.connection {
            return;
        }
        self.connection = state;
        self.record(format!("Connection {}", state));
        self.publish_view();
    }

    pub async fn next_timer(&mut self) -> Option<TimerFired> {
        self.scheduler.next_fired().await
    }

    pub fn handle_timer(&mut self, fired: TimerFired) {
        if !self.scheduler.accept(fired) {
            return;
        }

        match fired.kind {
            TimerKind::Debounce => self.flush_threshold(),
            TimerKind::Confirmation => {
                self.sync.expire_confirmation(Instant::now());
            }
            TimerKind::DelayOff(lamp) => self.fire_delay_timer(lamp),
            TimerKind::NoticeDismiss => {
                debug!("Dismissing notice");
                self.notice = None;
            }
        }
        self.publish_view();
    }

    /// Runs until the shutdown signal arrives
    pub async fn run_until_shutdown(
        mut self,
        mut inputs: SessionInputs,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> ControlSession<Disposing> {
        info!("Control session running");

        let poll = self.timing.rule_poll();
        let mut rule_poll = tokio::time::interval_at(Instant::now() + poll, poll);
        rule_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connection_open = true;

        self.connection_changed(*inputs.connection.borrow_and_update());

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received for control session");
                    break;
                }

                Some(message) = inputs.inbound.recv() => self.handle_message(&message),

                Some(request) = inputs.requests.recv() => self.handle_request(request),

                Some(fired) = self.scheduler.next_fired() => self.handle_timer(fired),

                _ = rule_poll.tick() => self.rule_tick(Local::now().time()),

                changed = inputs.connection.changed(), if connection_open => match changed {
                    Ok(()) => {
                        let state = *inputs.connection.borrow_and_update();
                        self.connection_changed(state);
                    }
                    Err(_) => {
                        warn!("Connection state channel closed");
                        connection_open = false;
                    }
                },
            }
        }

        self.transition()
    }

    pub fn dispose(self) -> ControlSession<Disposing> {
        info!("Disposing control session");
        self.transition()
    }

    fn is_locked(&self, lamp: LampId) -> bool {
        let manual = self.sync.snapshot().terrace_mode == TerraceMode::Manual;
        let gated = lamp == LampId::Terrace || (self.gate_room_lamps && lamp.is_room());
        gated && !manual
    }

    /// Publishes a command; a refused publish raises a notice instead of
    /// touching local state
    fn dispatch(&mut self, command: Command) -> bool {
        let payload = match command.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {:?}: {}", command, e);
                return false;
            }
        };

        let topic = command.topic(&self.topics);
        match self.publisher.publish(topic, payload) {
            Ok(()) => {
                debug!("Sent {:?} to {}", command, topic);
                true
            }
            Err(e) => {
                warn!("Command {:?} not sent: {}", command, e);
                self.raise_notice(format!("Command not sent: {}", e));
                false
            }
        }
    }

    fn raise_notice(&mut self, message: String) {
        self.notice = Some(Notice::now(message));
        self.scheduler
            .arm(TimerKind::NoticeDismiss, self.timing.notice_ttl());
    }
}

impl ControlSession<Disposing> {
    /// Cancels every pending timer and freezes the view
    pub fn shutdown(mut self) -> ControlSession<Disposed> {
        self.scheduler.cancel_all();
        self.sync.abandon_threshold_edit();
        self.record("Session closed");
        self.publish_view();
        info!("Control session disposed");
        self.transition()
    }
}

impl ControlSession<Disposed> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use crate::mqtt::TransportError;
    use crate::protocol::StatusReport;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, Value)>>,
        offline: AtomicBool,
    }

    impl RecordingPublisher {
        fn sent_to(&self, topic: &str) -> Vec<Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, v)| v.clone())
                .collect()
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(TransportError::NotConnected(ConnectionState::Disconnected));
            }
            let value = serde_json::from_slice(&payload).unwrap();
            self.sent.lock().unwrap().push((topic.to_string(), value));
            Ok(())
        }

        fn connection_state(&self) -> ConnectionState {
            if self.offline.load(Ordering::SeqCst) {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Connected
            }
        }
    }

    fn session_with(
        config: AppConfig,
    ) -> (ControlSession<Active>, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let session = ControlSession::create(&config, publisher.clone())
            .unwrap()
            .activate();
        (session, publisher)
    }

    fn session() -> (ControlSession<Active>, Arc<RecordingPublisher>) {
        session_with(AppConfig::default())
    }

    fn status(mode: TerraceMode, threshold: Option<u8>) -> Inbound {
        Inbound::Status(StatusReport {
            intensity: 50,
            mode,
            threshold,
            terrace_lamp: None,
            room_lamps: Vec::new(),
        })
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn dark_status(led: Option<bool>) -> Inbound {
        Inbound::Status(StatusReport {
            intensity: 10,
            mode: TerraceMode::Auto,
            threshold: Some(40),
            terrace_lamp: led,
            room_lamps: Vec::new(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_threshold_edits_publish_once_with_last_value() {
        let (mut session, publisher) = session();
        let topic = TopicConfig::default().threshold_set;

        session.set_threshold(40);
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.set_threshold(55);
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.set_threshold(60);
        assert_eq!(session.snapshot().terrace_threshold, 60);
        assert!(publisher.sent_to(&topic).is_empty());

        let fired = session.next_timer().await.unwrap();
        session.handle_timer(fired);

        assert_eq!(publisher.sent_to(&topic), vec![json!({"threshold": 614})]);
        assert_eq!(session.view().pending_threshold, Some(60));
        assert_eq!(
            session.history().latest().unwrap().message,
            "Light threshold set to 60%"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_echo_is_ignored_until_confirmation_times_out() {
        let (mut session, _publisher) = session();
        session.set_threshold(60);
        let fired = session.next_timer().await.unwrap();
        session.handle_timer(fired);

        session.handle_inbound(Inbound::ThresholdEcho(55));
        assert_eq!(session.snapshot().terrace_threshold, 60);
        session.handle_inbound(status(TerraceMode::Auto, Some(40)));
        assert_eq!(session.snapshot().terrace_threshold, 60);

        let start = Instant::now();
        let fired = session.next_timer().await.unwrap();
        assert_eq!(fired.kind, TimerKind::Confirmation);
        assert!(Instant::now() - start < Duration::from_secs(5));
        session.handle_timer(fired);
        assert_eq!(session.view().pending_threshold, None);

        session.handle_inbound(Inbound::ThresholdEcho(58));
        assert_eq!(session.snapshot().terrace_threshold, 58);
    }

    #[tokio::test(start_paused = true)]
    async fn matching_report_confirms_threshold() {
        let (mut session, _publisher) = session();
        session.set_threshold(60);
        let fired = session.next_timer().await.unwrap();
        session.handle_timer(fired);

        session.handle_inbound(status(TerraceMode::Auto, Some(60)));
        assert_eq!(session.view().pending_threshold, None);

        session.handle_inbound(status(TerraceMode::Auto, Some(42)));
        assert_eq!(session.snapshot().terrace_threshold, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_delay_timer_fires_once_at_the_new_deadline() {
        let (mut session, publisher) = session();
        let topic = TopicConfig::default().room_command;

        session.set_delay_timer(LampId::Room1, 10);
        assert!(session.snapshot().lamp(LampId::Room1));
        assert_eq!(publisher.sent_to(&topic), vec![json!({"toggle_lamp1": true})]);

        tokio::time::sleep(Duration::from_secs(3 * 60)).await;
        let second_call = Instant::now();
        session.set_delay_timer(LampId::Room1, 5);
        assert_eq!(publisher.sent_to(&topic).len(), 1);

        let fired = session.next_timer().await.unwrap();
        assert_eq!(fired.kind, TimerKind::DelayOff(LampId::Room1));
        let waited = Instant::now() - second_call;
        assert!(waited >= Duration::from_secs(5 * 60));
        assert!(waited < Duration::from_secs(6 * 60));
        session.handle_timer(fired);

        assert!(!session.snapshot().lamp(LampId::Room1));
        assert_eq!(publisher.sent_to(&topic).len(), 2);

        let nothing_left =
            tokio::time::timeout(Duration::from_secs(3600), session.next_timer()).await;
        assert!(nothing_left.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_timers_of_other_lamps_survive() {
        let (mut session, _publisher) = session();
        session.set_delay_timer(LampId::Room1, 1);
        session.set_delay_timer(LampId::Room2, 2);
        session.cancel_delay_timer(LampId::Room2);
        session.cancel_delay_timer(LampId::Room2);

        assert_eq!(session.view().delay_timers.len(), 1);
        let fired = session.next_timer().await.unwrap();
        assert_eq!(fired.kind, TimerKind::DelayOff(LampId::Room1));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_for_lamp_already_off_publishes_nothing() {
        let (mut session, publisher) = session();
        session.set_delay_timer(LampId::Room2, 1);
        session.handle_inbound(Inbound::RoomStatus(vec![(LampId::Room2, false)]));
        let before = publisher.count();

        let fired = session.next_timer().await.unwrap();
        session.handle_timer(fired);
        assert_eq!(publisher.count(), before);
        assert_eq!(
            session.history().latest().unwrap().message,
            "Timer finished, room 2 lamp already OFF"
        );
    }

    #[tokio::test]
    async fn terrace_toggle_is_locked_in_auto_mode() {
        let (mut session, publisher) = session();
        session.toggle_lamp(LampId::Terrace);
        assert_eq!(publisher.count(), 0);
        assert!(!session.snapshot().lamp(LampId::Terrace));

        session.handle_inbound(status(TerraceMode::Manual, None));
        session.toggle_lamp(LampId::Terrace);
        assert_eq!(
            publisher.sent_to(&TopicConfig::default().command),
            vec![json!({"led": "toggle"})]
        );
        assert!(session.snapshot().lamp(LampId::Terrace));
    }

    #[tokio::test]
    async fn room_lamps_are_ungated_by_default() {
        let (mut session, publisher) = session();
        session.toggle_lamp(LampId::Room2);
        assert_eq!(publisher.count(), 1);

        let mut config = AppConfig::default();
        config.device.gate_room_lamps = true;
        let (mut gated, gated_publisher) = session_with(config);
        gated.toggle_lamp(LampId::Room2);
        gated.set_all_rooms(true);
        assert_eq!(gated_publisher.count(), 0);
    }

    #[tokio::test]
    async fn mode_follows_device_report_only() {
        let (mut session, publisher) = session();
        session.set_mode(TerraceMode::Manual);
        assert_eq!(
            publisher.sent_to(&TopicConfig::default().command),
            vec![json!({"mode": "manual"})]
        );
        assert_eq!(session.snapshot().terrace_mode, TerraceMode::Auto);

        session.handle_inbound(status(TerraceMode::Manual, None));
        assert_eq!(session.snapshot().terrace_mode, TerraceMode::Manual);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_raises_a_notice_that_dismisses_itself() {
        let (mut session, publisher) = session();
        publisher.offline.store(true, Ordering::SeqCst);
        let history_len = session.history().len();

        session.toggle_lamp(LampId::Room1);
        assert!(!session.snapshot().lamp(LampId::Room1));
        assert_eq!(session.history().len(), history_len);
        assert!(session.notice().is_some());

        let fired = session.next_timer().await.unwrap();
        assert_eq!(fired.kind, TimerKind::NoticeDismiss);
        session.handle_timer(fired);
        assert!(session.notice().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_threshold_publish_lets_reports_through() {
        let (mut session, publisher) = session();
        publisher.offline.store(true, Ordering::SeqCst);

        session.set_threshold(70);
        let fired = session.next_timer().await.unwrap();
        session.handle_timer(fired);
        assert_eq!(session.view().pending_threshold, None);

        session.handle_inbound(status(TerraceMode::Auto, Some(45)));
        assert_eq!(session.snapshot().terrace_threshold, 45);
    }

    #[tokio::test]
    async fn rule_commands_only_on_transitions() {
        let (mut session, publisher) = session();
        session.handle_inbound(Inbound::Status(StatusReport {
            intensity: 10,
            mode: TerraceMode::Auto,
            threshold: Some(40),
            terrace_lamp: None,
            room_lamps: Vec::new(),
        }));

        for _ in 0..5 {
            session.rule_tick(noon());
        }
        assert_eq!(
            publisher.sent_to(&TopicConfig::default().command),
            vec![json!({"led": "ON"})]
        );
        assert!(session.snapshot().lamp(LampId::Terrace));
    }

    #[tokio::test]
    async fn device_mirror_strategy_never_commands() {
        let mut config = AppConfig::default();
        config.automation.strategy = StrategyKind::DeviceMirror;
        let (mut session, publisher) = session_with(config);

        session.handle_inbound(Inbound::Status(StatusReport {
            intensity: 0,
            mode: TerraceMode::Auto,
            threshold: Some(40),
            terrace_lamp: Some(true),
            room_lamps: Vec::new(),
        }));
        session.rule_tick(noon());

        assert_eq!(publisher.count(), 0);
        assert!(session.snapshot().lamp(LampId::Terrace));
    }

    #[tokio::test]
    async fn all_on_updates_every_room_lamp() {
        let (mut session, publisher) = session();
        session.apply(Intent::AllOn);
        assert_eq!(
            publisher.sent_to(&TopicConfig::default().room_command),
            vec![json!({"command": "all_on"})]
        );
        assert!(session.snapshot().lamp(LampId::Room1));
        assert!(session.snapshot().lamp(LampId::Room2));
        assert!(session.snapshot().lamp(LampId::Room3));
    }

    #[tokio::test]
    async fn status_feeds_chart_and_malformed_messages_are_dropped() {
        let (mut session, _publisher) = session();
        let topic = TopicConfig::default().status;

        session.handle_message(&MqttMessage::from_topic(topic.clone(), b"garbage".to_vec()));
        session.handle_message(&MqttMessage::from_topic(
            topic,
            br#"{"intensity": 512, "mode": "AUTO"}"#.to_vec(),
        ));

        assert_eq!(session.chart().len(), 1);
        assert_eq!(session.snapshot().light_intensity, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timers() {
        let (mut session, publisher) = session();
        session.set_threshold(80);
        session.set_delay_timer(LampId::Room1, 1);
        let before = publisher.count();

        let disposed = session.dispose().shutdown();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(publisher.count(), before);
        assert_eq!(disposed.history().latest().unwrap().message, "Session closed");
        assert!(disposed.view().delay_timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_edit_supersedes_the_pending_confirmation() {
        let (mut session, publisher) = session();
        let topic = TopicConfig::default().threshold_set;

        session.set_threshold(60);
        let fired = session.next_timer().await.unwrap();
        session.handle_timer(fired);
        assert_eq!(session.view().pending_threshold, Some(60));

        tokio::time::sleep(Duration::from_secs(1)).await;
        session.set_threshold(70);
        let view = session.view();
        assert_eq!(view.pending_threshold, None);
        assert!(view.editing_threshold);
        assert!(!session.scheduler.is_armed(TimerKind::Confirmation));

        session.handle_inbound(status(TerraceMode::Auto, Some(60)));
        assert_eq!(session.snapshot().terrace_threshold, 70);

        let fired = session.next_timer().await.unwrap();
        assert_eq!(fired.kind, TimerKind::Debounce);
        session.handle_timer(fired);
        assert_eq!(
            publisher.sent_to(&topic),
            vec![json!({"threshold": 614}), json!({"threshold": 716})]
        );
        assert_eq!(session.view().pending_threshold, Some(70));

        session.handle_inbound(status(TerraceMode::Auto, Some(60)));
        assert_eq!(session.snapshot().terrace_threshold, 70);
        assert_eq!(session.view().pending_threshold, Some(70));
    }

    #[tokio::test]
    async fn rule_waits_for_the_connection() {
        let (mut session, publisher) = session();
        let topic = TopicConfig::default().command;
        session.handle_inbound(dark_status(Some(false)));

        publisher.offline.store(true, Ordering::SeqCst);
        session.rule_tick(noon());
        assert_eq!(publisher.count(), 0);
        assert!(session.notice().is_none());
        assert!(!session.snapshot().lamp(LampId::Terrace));

        publisher.offline.store(false, Ordering::SeqCst);
        session.rule_tick(noon());
        session.rule_tick(noon());
        assert_eq!(publisher.sent_to(&topic), vec![json!({"led": "ON"})]);
        assert!(session.snapshot().lamp(LampId::Terrace));
    }

    #[tokio::test]
    async fn device_led_report_overrides_an_automatic_switch() {
        let (mut session, publisher) = session();
        let topic = TopicConfig::default().command;
        session.handle_inbound(dark_status(Some(false)));
        session.rule_tick(noon());
        assert!(session.snapshot().lamp(LampId::Terrace));

        session.handle_inbound(dark_status(Some(false)));
        assert!(!session.snapshot().lamp(LampId::Terrace));
        session.rule_tick(noon());
        assert_eq!(
            publisher.sent_to(&topic),
            vec![json!({"led": "ON"}), json!({"led": "ON"})]
        );

        session.handle_inbound(dark_status(Some(true)));
        session.rule_tick(noon());
        assert_eq!(publisher.sent_to(&topic).len(), 2);
        assert!(session.snapshot().lamp(LampId::Terrace));
    }

    #[tokio::test]
    async fn device_threshold_change_is_recorded() {
        let (mut session, _publisher) = session();
        session.handle_inbound(status(TerraceMode::Auto, Some(55)));
        assert_eq!(
            session.history().latest().unwrap().message,
            "Device reports light threshold 55%"
        );

        let len = session.history().len();
        session.handle_inbound(status(TerraceMode::Auto, Some(55)));
        assert_eq!(session.history().len(), len);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_switch_off_at_expiry_is_recorded() {
        let (mut session, publisher) = session();
        session.set_delay_timer(LampId::Room1, 1);
        publisher.offline.store(true, Ordering::SeqCst);

        let fired = session.next_timer().await.unwrap();
        assert_eq!(fired.kind, TimerKind::DelayOff(LampId::Room1));
        session.handle_timer(fired);

        assert!(session.snapshot().lamp(LampId::Room1));
        assert!(session.notice().is_some());
        assert!(session.view().delay_timers.is_empty());
        assert_eq!(
            session.history().latest().unwrap().message,
            "Timer finished, room 1 lamp OFF not sent"
        );
    }
}
