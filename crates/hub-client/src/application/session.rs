//! High-level hub operations built on the dispatcher and event bus.
//!
//! A [`HubSession`] lives exactly as long as its connection.  Once the
//! transport closes (hub gone, or [`HubSession::disconnect`]) every operation
//! fails with a connection error; a new session must be opened.
//!
//! # Activity changes
//!
//! Starting or ending an activity is asynchronous on the hub:
//!
//! 1. The run-activity command is *fired*: its reply is not awaited through
//!    the pending table, so every frame carrying its correlation id reaches
//!    the event bus.
//! 2. Progress frames (code 100 on `startActivity`/`helpdiscretes`) are
//!    forwarded to the caller's progress callback.
//! 3. The wait resolves on `startActivityFinished` for that command.  A
//!    `startActivity` frame with status 200 or 200.2 (home-automation state)
//!    does not resolve it.
//!
//! # Holding a button
//!
//! At most one function may be held.  While held, a background task sends a
//! "hold" action every `hold_interval`; `stop_holding` clears the held
//! function and the task exits on its next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use hub_core::domain::hub::{
    Activity, ActivityFinished, ActivityProgress, FixActivityAction, Function, HubConfiguration,
    StateDigest,
};
use hub_core::protocol::commands::{
    ActivityRule, ChangeChannelParams, EmptyParams, FormatParams, HoldActionParams, HoldStatus,
    RunActivityParams, CHANGE_CHANNEL, GET_STATE_DIGEST, HELP_DISCRETES_NOTIFY, HELP_SYNC,
    HOLD_ACTION, RUN_ACTIVITY, START_ACTIVITY_FINISHED_NOTIFY, START_ACTIVITY_NOTIFY,
    SYNC_CONFIGURATION,
};
use hub_core::protocol::{CorrelationIdGenerator, DeviceIdentity, Envelope, OutboundCommand};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::{HubEndpoint, SessionSettings};
use crate::infrastructure::dispatcher::{decode_reply, CommandDispatcher, CommandError};
use crate::infrastructure::event_bus::{EventBus, SubscriptionHandle, WaitError};
use crate::infrastructure::transport::{Transport, TransportError, WebSocketTransport};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("a function is already being held")]
    AlreadyHolding,

    #[error("hold interval must be greater than zero")]
    ZeroHoldInterval,

    #[error("no activity is running")]
    NoRunningActivity,

    #[error("unknown activity: {0}")]
    UnknownActivity(String),

    #[error("hub configuration has not been synced")]
    NotSynced,
}

struct HeldFunction {
    action: String,
    generation: u64,
}

pub struct HubSession {
    dispatcher: CommandDispatcher,
    settings: SessionSettings,
    connected_at: Instant,
    configuration: RwLock<Option<Arc<HubConfiguration>>>,
    held: Arc<Mutex<Option<HeldFunction>>>,
    hold_generation: AtomicU64,
}

impl HubSession {
    /// Opens the WebSocket to `endpoint` and starts the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the connection cannot be opened.
    pub async fn connect(
        endpoint: &HubEndpoint,
        identity: DeviceIdentity,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let transport = WebSocketTransport::connect(&endpoint.url()).await?;
        Ok(Self::with_transport(
            Arc::new(transport),
            CorrelationIdGenerator::new(identity),
            settings,
        ))
    }

    /// Starts a session over an already-open transport.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        ids: CorrelationIdGenerator,
        settings: SessionSettings,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::start(transport, ids),
            settings,
            connected_at: Instant::now(),
            configuration: RwLock::new(None),
            held: Arc::new(Mutex::new(None)),
            hold_generation: AtomicU64::new(0),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &EventBus {
        self.dispatcher.bus()
    }

    /// Milliseconds since the session connected; the hub's timestamp unit.
    pub fn elapsed_ms(&self) -> u64 {
        elapsed_ms(self.connected_at)
    }

    // ── Configuration and state ──────────────────────────────────────────────

    /// Fetches the hub configuration and keeps it for lookups.
    pub async fn sync_configuration(&self) -> Result<Arc<HubConfiguration>, SessionError> {
        let reply = self
            .dispatcher
            .send_command_timeout(
                SYNC_CONFIGURATION,
                &EmptyParams {},
                self.settings.command_timeout(),
                &CancellationToken::new(),
            )
            .await?;
        let config: Arc<HubConfiguration> = Arc::new(decode_reply(&reply)?);
        info!(
            "synced configuration: {} activities, {} devices",
            config.activities.len(),
            config.devices.len()
        );
        *self
            .configuration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&config));
        Ok(config)
    }

    /// Installs a configuration saved earlier with
    /// [`HubConfiguration::to_json`], skipping the sync round trip.
    pub fn restore_configuration(&self, config: HubConfiguration) -> Arc<HubConfiguration> {
        let config = Arc::new(config);
        debug!("restored configuration: {} activities", config.activities.len());
        *self
            .configuration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&config));
        config
    }

    /// The configuration from the last successful sync or restore.
    pub fn configuration(&self) -> Option<Arc<HubConfiguration>> {
        self.configuration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn synced(&self) -> Result<Arc<HubConfiguration>, SessionError> {
        self.configuration().ok_or(SessionError::NotSynced)
    }

    /// Fetches the current state digest.
    pub async fn update_state(&self) -> Result<StateDigest, SessionError> {
        let reply = self
            .dispatcher
            .send_command_timeout(
                GET_STATE_DIGEST,
                &FormatParams::json(),
                self.settings.command_timeout(),
                &CancellationToken::new(),
            )
            .await?;
        Ok(decode_reply(&reply)?)
    }

    /// The running activity, `None` when the hub is off.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSynced`] without a synced configuration, and
    /// [`SessionError::UnknownActivity`] when the hub reports an activity the
    /// configuration does not contain.
    pub async fn get_running_activity(&self) -> Result<Option<Activity>, SessionError> {
        let config = self.synced()?;
        let digest = self.update_state().await?;
        match digest.running_activity_id() {
            None => Ok(None),
            Some(id) => config
                .activity_by_id(id)
                .cloned()
                .map(Some)
                .ok_or_else(|| SessionError::UnknownActivity(id.to_string())),
        }
    }

    /// Looks up an activity by id or label in the synced configuration.
    pub fn find_activity(&self, id_or_label: &str) -> Result<Activity, SessionError> {
        self.synced()?
            .find_activity(id_or_label)
            .cloned()
            .ok_or_else(|| SessionError::UnknownActivity(id_or_label.to_string()))
    }

    // ── Simple commands ──────────────────────────────────────────────────────

    pub async fn change_channel(&self, channel: &str) -> Result<(), SessionError> {
        let params = ChangeChannelParams {
            channel: channel.to_string(),
            timestamp: self.elapsed_ms(),
        };
        self.dispatcher
            .send_command_timeout(
                CHANGE_CHANNEL,
                &params,
                self.settings.command_timeout(),
                &CancellationToken::new(),
            )
            .await?;
        Ok(())
    }

    /// Presses `function` once.
    pub async fn press_button(&self, function: &Function) -> Result<(), SessionError> {
        self.hold_action(&function.action, HoldStatus::Press).await
    }

    /// Presses `functions` in order.
    ///
    /// `delay` is raised to the configured minimum.  The hub drops presses
    /// that arrive at perfectly regular intervals, so the pause alternates
    /// between `delay + adjustment` and `delay - adjustment`.
    pub async fn press_buttons(
        &self,
        delay: Duration,
        functions: &[Function],
    ) -> Result<(), SessionError> {
        let delays = press_delays(
            delay,
            Duration::from_millis(self.settings.min_press_delay_ms),
            Duration::from_millis(self.settings.repeat_adjustment_ms),
            functions.len(),
        );
        let mut functions = functions.iter();
        if let Some(first) = functions.next() {
            self.press_button(first).await?;
        }
        for (function, pause) in functions.zip(delays) {
            tokio::time::sleep(pause).await;
            self.press_button(function).await?;
        }
        Ok(())
    }

    /// Runs a button sequence by id.  Numeric ids go out as JSON numbers, the
    /// way the hub's own apps send them.
    pub async fn fire_sequence(&self, sequence_id: &str) -> Result<(), SessionError> {
        let id = match sequence_id.parse::<u64>() {
            Ok(n) => serde_json::Value::from(n),
            Err(_) => serde_json::Value::from(sequence_id),
        };
        let action = serde_json::json!({ "sequenceId": id }).to_string();
        self.hold_action(&action, HoldStatus::Press).await
    }

    /// Corrects one device's power or input state.
    pub async fn send_fix_activity_action(
        &self,
        action: &FixActivityAction,
    ) -> Result<(), SessionError> {
        let cmd = self
            .dispatcher
            .command(HELP_SYNC, &action.params(self.elapsed_ms()))?;
        self.dispatcher.fire(&cmd).await?;
        Ok(())
    }

    async fn hold_action(&self, action: &str, status: HoldStatus) -> Result<(), SessionError> {
        let cmd = hold_command(&self.dispatcher, action, status, self.connected_at)?;
        self.dispatcher.fire(&cmd).await?;
        Ok(())
    }

    // ── Activities ───────────────────────────────────────────────────────────

    /// Starts `activity` and waits until the hub reports it finished.
    pub async fn start_activity<F>(
        &self,
        activity: &Activity,
        on_progress: F,
    ) -> Result<(), SessionError>
    where
        F: FnMut(ActivityProgress) + Send,
    {
        self.run_activity(&activity.id, ActivityRule::Start, on_progress)
            .await
    }

    /// Ends the running activity.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoRunningActivity`] when nothing is running.
    pub async fn end_activity<F>(&self, on_progress: F) -> Result<(), SessionError>
    where
        F: FnMut(ActivityProgress) + Send,
    {
        let running = self
            .get_running_activity()
            .await?
            .ok_or(SessionError::NoRunningActivity)?;
        self.run_activity(&running.id, ActivityRule::End, on_progress)
            .await
    }

    async fn run_activity<F>(
        &self,
        activity_id: &str,
        rule: ActivityRule,
        mut on_progress: F,
    ) -> Result<(), SessionError>
    where
        F: FnMut(ActivityProgress) + Send,
    {
        let params = RunActivityParams::new(activity_id, rule, self.elapsed_ms());
        let cmd = self.dispatcher.command(RUN_ACTIVITY, &params)?;
        let bus = self.events();

        // Both registrations happen before the command is sent.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let progress_id = cmd.id.clone();
        let _progress = ScopedSubscription {
            bus,
            handle: bus.subscribe(
                move |env| is_progress(env, &progress_id),
                move |env| {
                    let _ = progress_tx.send(env.payload().clone());
                },
            ),
        };
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();
        let (run_id, wanted) = (cmd.id.clone(), activity_id.to_string());
        let finished = bus.wait_for_one(move |env| is_terminal(env, &run_id, &wanted), cancel);

        info!("{rule:?} activity {activity_id}");
        self.dispatcher.fire(&cmd).await?;

        let deadline = tokio::time::sleep(self.settings.activity_timeout());
        tokio::pin!(deadline, finished);
        loop {
            tokio::select! {
                biased;
                Some(payload) = progress_rx.recv() => {
                    match payload.decode::<ActivityProgress>() {
                        Ok(progress) => on_progress(progress),
                        Err(e) => debug!("unreadable progress payload: {e}"),
                    }
                }
                outcome = &mut finished => return terminal_outcome(outcome?),
                _ = &mut deadline => return Err(CommandError::Timeout.into()),
            }
        }
    }

    // ── Holding ──────────────────────────────────────────────────────────────

    /// Starts holding `function` down until [`stop_holding`](Self::stop_holding).
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyHolding`] if another function is held, and
    /// [`SessionError::ZeroHoldInterval`] if the settings would make the
    /// repeat loop spin.
    pub fn start_holding(&self, function: &Function) -> Result<(), SessionError> {
        if self.settings.hold_interval().is_zero() {
            return Err(SessionError::ZeroHoldInterval);
        }
        let generation = self.hold_generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut held = lock_held(&self.held);
            if held.is_some() {
                return Err(SessionError::AlreadyHolding);
            }
            *held = Some(HeldFunction {
                action: function.action.clone(),
                generation,
            });
        }
        debug!("holding {}", function.name);

        tokio::spawn(hold_loop(
            self.dispatcher.clone(),
            Arc::clone(&self.held),
            generation,
            self.settings.hold_interval(),
            self.connected_at,
        ));
        Ok(())
    }

    /// Releases the held function.  A no-op when nothing is held.
    pub fn stop_holding(&self) {
        if lock_held(&self.held).take().is_some() {
            debug!("released held function");
        }
    }

    pub fn is_holding(&self) -> bool {
        lock_held(&self.held).is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Closes the connection.  Idempotent; pending commands fail with a
    /// connection error.
    pub async fn disconnect(&self) {
        self.stop_holding();
        self.dispatcher.shutdown().await;
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn lock_held(held: &Mutex<Option<HeldFunction>>) -> MutexGuard<'_, Option<HeldFunction>> {
    held.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hold_command(
    dispatcher: &CommandDispatcher,
    action: &str,
    status: HoldStatus,
    connected_at: Instant,
) -> Result<OutboundCommand, CommandError> {
    let params = HoldActionParams {
        action: action.to_string(),
        status,
        timestamp: elapsed_ms(connected_at),
    };
    dispatcher.command(HOLD_ACTION, &params)
}

async fn hold_loop(
    dispatcher: CommandDispatcher,
    held: Arc<Mutex<Option<HeldFunction>>>,
    generation: u64,
    interval: Duration,
    connected_at: Instant,
) {
    loop {
        tokio::time::sleep(interval).await;

        let action = match &*lock_held(&held) {
            Some(current) if current.generation == generation => current.action.clone(),
            _ => break,
        };

        let sent = match hold_command(&dispatcher, &action, HoldStatus::Hold, connected_at) {
            Ok(cmd) => dispatcher.fire(&cmd).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("stopped holding: {e}");
            let mut current = lock_held(&held);
            if current.as_ref().map(|h| h.generation) == Some(generation) {
                *current = None;
            }
            break;
        }
    }
}

/// Pauses between consecutive presses: `count - 1` values alternating
/// `delay + adjustment` and `delay - adjustment`, with `delay >= minimum`.
fn press_delays(
    delay: Duration,
    minimum: Duration,
    adjustment: Duration,
    count: usize,
) -> Vec<Duration> {
    let delay = delay.max(minimum);
    (0..count.saturating_sub(1))
        .map(|i| {
            if i % 2 == 0 {
                delay + adjustment
            } else {
                delay.saturating_sub(adjustment)
            }
        })
        .collect()
}

fn is_progress(env: &Envelope, run_id: &str) -> bool {
    let topic = env.topic();
    (topic == START_ACTIVITY_NOTIFY || topic == HELP_DISCRETES_NOTIFY)
        && env.code().is_progress()
        && env.correlation_id().map_or(true, |id| id == run_id)
}

#[derive(Deserialize)]
struct ActivityIdOnly {
    #[serde(rename = "activityId", default)]
    activity_id: String,
}

fn is_terminal(env: &Envelope, run_id: &str, activity_id: &str) -> bool {
    match (env.topic(), env.correlation_id()) {
        (START_ACTIVITY_FINISHED_NOTIFY, Some(id)) => id == run_id,
        // Some firmware sends the finished frame as a `type` notification
        // without an id; match it on the activity instead.
        (START_ACTIVITY_FINISHED_NOTIFY, None) => env
            .payload()
            .decode::<ActivityIdOnly>()
            .map_or(false, |data| data.activity_id == activity_id),
        (RUN_ACTIVITY, Some(id)) => id == run_id && !env.code().is_success(),
        _ => false,
    }
}

fn terminal_outcome(env: Envelope) -> Result<(), SessionError> {
    if env.topic() == RUN_ACTIVITY {
        return Err(CommandError::Protocol {
            code: env.code(),
            message: env.message().to_string(),
        }
        .into());
    }
    let finished: ActivityFinished = env
        .payload()
        .decode()
        .map_err(CommandError::Decode)?;
    if finished.error_code.is_success() {
        info!("activity {} finished", finished.activity_id);
        Ok(())
    } else {
        Err(CommandError::Protocol {
            code: finished.error_code,
            message: finished.error_string,
        }
        .into())
    }
}

/// Unsubscribes when dropped.
struct ScopedSubscription<'a> {
    bus: &'a EventBus,
    handle: SubscriptionHandle,
}

impl Drop for ScopedSubscription<'_> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.handle);
    }
}
