//! # Subscription Manager
//!
//! Connectivity-aware realtime channel management.
//!
//! ## Manager Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Subscription Manager                               │
//! │                                                                         │
//! │  SubscriptionHandle ──commands──► manager task ◄──events── pump tasks  │
//! │                                       │                    (1/channel)  │
//! │                                       │                                 │
//! │   ┌───────────────────────────────────┴──────────────────────────────┐ │
//! │   │  • validated connection state machine (logged transitions)      │ │
//! │   │  • reconnect timer: min(1s * 2^(N-1), 30s), ceiling 5           │ │
//! │   │  • event buffer, flushed to callbacks every 100 ms              │ │
//! │   │  • reachability + foreground/background gating                  │ │
//! │   └──────────────────────────────────────────────────────────────────┘ │
//! │                                                                         │
//! │  Connection States                                                     │
//! │  ─────────────────                                                     │
//! │  Offline ──► Connecting ──► Online ──► Reconnecting ──► Online         │
//! │     ▲________________any state________________│                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pocket_core::backoff::retry_delay;
use pocket_core::types::{ChangeEvent, ChannelStatus, ConnectionState};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::ChannelTransport;

// =============================================================================
// Callback & Snapshot Types
// =============================================================================

/// Host callback receiving batched change events for one channel. Events
/// arrive in the order the transport delivered them.
pub type ChangeCallback = Arc<dyn Fn(Vec<ChangeEvent>) + Send + Sync>;

/// Point-in-time view of the manager, for diagnostics.
#[derive(Debug, Clone)]
pub struct ManagerSnapshot {
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    pub channels: Vec<(String, ChannelStatus)>,
}

// =============================================================================
// Commands
// =============================================================================

enum ManagerCommand {
    Subscribe {
        channel_id: String,
        target: String,
        filter: Option<String>,
        callback: ChangeCallback,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        channel_id: String,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    UnsubscribeAll {
        reply: oneshot::Sender<()>,
    },
    ForceReconnect,
    SetBackground,
    SetForeground,
    Snapshot {
        reply: oneshot::Sender<ManagerSnapshot>,
    },
    Shutdown,
}

/// Internal signal from a channel pump that its feed ended.
struct ChannelClosed {
    channel_id: String,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for controlling the subscription manager.
#[derive(Clone)]
pub struct SubscriptionHandle {
    cmd_tx: mpsc::Sender<ManagerCommand>,
    connection_rx: watch::Receiver<ConnectionState>,
}

impl SubscriptionHandle {
    /// Registers a channel and returns its generated id. The channel opens
    /// immediately when the device is reachable and foregrounded, otherwise
    /// it opens on the next connect.
    pub async fn subscribe(
        &self,
        target: impl Into<String>,
        filter: Option<String>,
        callback: ChangeCallback,
    ) -> SyncResult<String> {
        // v7 ids sort in creation order, same scheme as action ids.
        let channel_id = Uuid::now_v7().to_string();
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::Subscribe {
                channel_id: channel_id.clone(),
                target: target.into(),
                filter,
                callback,
                reply,
            })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)?;
        Ok(channel_id)
    }

    /// Closes and forgets a channel.
    pub async fn unsubscribe(&self, channel_id: &str) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::Unsubscribe {
                channel_id: channel_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// Closes and forgets every channel.
    pub async fn unsubscribe_all(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::UnsubscribeAll { reply })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Discards any backoff in progress and reconnects now.
    pub async fn force_reconnect(&self) -> SyncResult<()> {
        self.cmd_tx
            .send(ManagerCommand::ForceReconnect)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// App moved to the background: channels close but stay registered.
    pub async fn set_background(&self) -> SyncResult<()> {
        self.cmd_tx
            .send(ManagerCommand::SetBackground)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// App returned to the foreground: registered channels reopen.
    pub async fn set_foreground(&self) -> SyncResult<()> {
        self.cmd_tx
            .send(ManagerCommand::SetForeground)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_rx.borrow()
    }

    /// Observer for connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection_rx.clone()
    }

    /// Snapshot of manager state for diagnostics.
    pub async fn snapshot(&self) -> SyncResult<ManagerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::Snapshot { reply })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.cmd_tx
            .send(ManagerCommand::Shutdown)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }
}

// =============================================================================
// Manager
// =============================================================================

struct ChannelEntry {
    target: String,
    filter: Option<String>,
    callback: ChangeCallback,
    status: ChannelStatus,
    pump: Option<JoinHandle<()>>,
}

/// The manager task. Owns every channel and the connection state machine;
/// all mutation goes through its command loop.
pub struct SubscriptionManager {
    transport: Arc<dyn ChannelTransport>,
    config: Arc<SyncConfig>,

    cmd_rx: mpsc::Receiver<ManagerCommand>,
    closed_tx: mpsc::Sender<ChannelClosed>,
    closed_rx: mpsc::Receiver<ChannelClosed>,
    event_tx: mpsc::Sender<ChangeEvent>,
    event_rx: mpsc::Receiver<ChangeEvent>,

    reachability: watch::Receiver<bool>,
    connection_tx: watch::Sender<ConnectionState>,

    channels: HashMap<String, ChannelEntry>,
    /// Buffered events per channel, in arrival order, awaiting a flush.
    pending_events: HashMap<String, Vec<ChangeEvent>>,

    backgrounded: bool,
    reconnect_attempts: u32,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl SubscriptionManager {
    /// Creates the manager and its handle. Spawn [`Self::run`] to start it.
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        config: Arc<SyncConfig>,
        reachability: watch::Receiver<bool>,
    ) -> (Self, SubscriptionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (closed_tx, closed_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Offline);

        let manager = SubscriptionManager {
            transport,
            config,
            cmd_rx,
            closed_tx,
            closed_rx,
            event_tx,
            event_rx,
            reachability,
            connection_tx,
            channels: HashMap::new(),
            pending_events: HashMap::new(),
            backgrounded: false,
            reconnect_attempts: 0,
            reconnect_timer: None,
        };

        let handle = SubscriptionHandle {
            cmd_tx,
            connection_rx,
        };

        (manager, handle)
    }

    /// Runs the manager loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Subscription manager starting");

        let flush_every = Duration::from_millis(self.config.channels.flush_interval_ms);
        let mut flush = tokio::time::interval(flush_every);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // The reconnect timer only participates in the select while armed.
            let armed_timer = self.reconnect_timer.as_mut();
            let reconnect_due = async {
                match armed_timer {
                    Some(timer) => timer.await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }

                Ok(()) = self.reachability.changed() => {
                    let reachable = *self.reachability.borrow();
                    self.handle_reachability(reachable).await;
                }

                Some(event) = self.event_rx.recv() => {
                    self.pending_events
                        .entry(event.channel_id.clone())
                        .or_default()
                        .push(event);
                }

                Some(closed) = self.closed_rx.recv() => {
                    self.handle_channel_closed(closed.channel_id).await;
                }

                () = reconnect_due => {
                    self.reconnect_timer = None;
                    self.attempt_connect().await;
                }

                _ = flush.tick() => {
                    self.flush_events();
                }
            }
        }

        self.close_all_channels(ChannelStatus::Closed);
        self.flush_events();
        info!("Subscription manager stopped");
    }

    /// Handles one command; returns true on shutdown.
    async fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
        match cmd {
            ManagerCommand::Subscribe {
                channel_id,
                target,
                filter,
                callback,
                reply,
            } => {
                self.subscribe(channel_id, target, filter, callback).await;
                let _ = reply.send(());
            }
            ManagerCommand::Unsubscribe { channel_id, reply } => {
                let result = self.unsubscribe(&channel_id);
                let _ = reply.send(result);
            }
            ManagerCommand::UnsubscribeAll { reply } => {
                let ids: Vec<String> = self.channels.keys().cloned().collect();
                for id in ids {
                    let _ = self.unsubscribe(&id);
                }
                self.recompute_after_removal();
                let _ = reply.send(());
            }
            ManagerCommand::ForceReconnect => {
                info!("Forced reconnect requested");
                self.reconnect_attempts = 0;
                self.reconnect_timer = None;
                if *self.reachability.borrow() && !self.backgrounded && !self.channels.is_empty() {
                    match self.connection() {
                        ConnectionState::Online => self.transition(ConnectionState::Reconnecting),
                        ConnectionState::Offline => self.transition(ConnectionState::Connecting),
                        _ => {}
                    }
                    self.attempt_connect().await;
                } else {
                    debug!("Force reconnect ignored: unreachable, backgrounded, or no channels");
                }
            }
            ManagerCommand::SetBackground => {
                if !self.backgrounded {
                    info!("App backgrounded, closing channels");
                    self.backgrounded = true;
                    self.reconnect_timer = None;
                    self.reconnect_attempts = 0;
                    self.close_all_channels(ChannelStatus::Closed);
                    self.transition(ConnectionState::Offline);
                }
            }
            ManagerCommand::SetForeground => {
                if self.backgrounded {
                    info!("App foregrounded");
                    self.backgrounded = false;
                    if *self.reachability.borrow() && !self.channels.is_empty() {
                        self.transition(ConnectionState::Connecting);
                        self.attempt_connect().await;
                    }
                }
            }
            ManagerCommand::Snapshot { reply } => {
                let snapshot = ManagerSnapshot {
                    connection: self.connection(),
                    reconnect_attempts: self.reconnect_attempts,
                    channels: self
                        .channels
                        .iter()
                        .map(|(id, entry)| (id.clone(), entry.status))
                        .collect(),
                };
                let _ = reply.send(snapshot);
            }
            ManagerCommand::Shutdown => return true,
        }
        false
    }

    // =========================================================================
    // Subscription Lifecycle
    // =========================================================================

    async fn subscribe(
        &mut self,
        channel_id: String,
        target: String,
        filter: Option<String>,
        callback: ChangeCallback,
    ) {
        info!(channel_id = %channel_id, target = %target, "Channel registered");
        self.channels.insert(
            channel_id.clone(),
            ChannelEntry {
                target,
                filter,
                callback,
                status: ChannelStatus::Closed,
                pump: None,
            },
        );

        if self.backgrounded || !*self.reachability.borrow() {
            return;
        }

        match self.connection() {
            // First subscription while reachable starts the connect.
            ConnectionState::Offline => {
                self.transition(ConnectionState::Connecting);
                self.attempt_connect().await;
            }
            // Already online: open just this channel.
            ConnectionState::Online => {
                if !self.open_channel(&channel_id).await {
                    self.transition(ConnectionState::Reconnecting);
                    self.schedule_reconnect();
                }
            }
            // A connect or backoff is in progress; the channel rides along.
            _ => {}
        }
    }

    fn unsubscribe(&mut self, channel_id: &str) -> SyncResult<()> {
        let Some(mut entry) = self.channels.remove(channel_id) else {
            return Err(SyncError::InvalidAction(format!(
                "channel {channel_id} is not subscribed"
            )));
        };

        if let Some(pump) = entry.pump.take() {
            pump.abort();
        }
        self.pending_events.remove(channel_id);
        info!(channel_id, "Channel unsubscribed");

        self.recompute_after_removal();
        Ok(())
    }

    /// With no channels left there is nothing to keep connected.
    fn recompute_after_removal(&mut self) {
        if self.channels.is_empty() {
            self.reconnect_timer = None;
            self.reconnect_attempts = 0;
            self.transition(ConnectionState::Offline);
        }
    }

    // =========================================================================
    // Connection State Machine
    // =========================================================================

    fn connection(&self) -> ConnectionState {
        *self.connection_tx.borrow()
    }

    /// Applies a validated transition. Invalid transitions are logged and
    /// dropped rather than corrupting the machine.
    fn transition(&mut self, next: ConnectionState) {
        let current = self.connection();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Ignoring invalid connection transition");
            return;
        }
        info!(from = %current, to = %next, "Connection state changed");
        let _ = self.connection_tx.send(next);
    }

    async fn handle_reachability(&mut self, reachable: bool) {
        if !reachable {
            info!("Device unreachable, closing channels");
            self.reconnect_timer = None;
            self.reconnect_attempts = 0;
            self.close_all_channels(ChannelStatus::Closed);
            self.transition(ConnectionState::Offline);
            return;
        }

        if self.backgrounded || self.channels.is_empty() {
            debug!("Reachable, but nothing to connect");
            return;
        }

        self.transition(ConnectionState::Connecting);
        self.attempt_connect().await;
    }

    /// One connect pass: opens every non-open channel. All open moves the
    /// machine Online; any failure schedules a backoff retry. Online
    /// requires at least one real open ack, so an empty registry never
    /// connects vacuously.
    async fn attempt_connect(&mut self) {
        if !*self.reachability.borrow() || self.backgrounded || self.channels.is_empty() {
            return;
        }

        let ids: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, e)| e.status != ChannelStatus::Open)
            .map(|(id, _)| id.clone())
            .collect();

        let mut all_open = true;
        for id in ids {
            if !self.open_channel(&id).await {
                all_open = false;
            }
        }

        if all_open {
            self.reconnect_attempts = 0;
            self.transition(ConnectionState::Online);
        } else {
            self.transition(ConnectionState::Reconnecting);
            self.schedule_reconnect();
        }
    }

    /// Opens one channel and spawns its pump. Returns false on failure.
    async fn open_channel(&mut self, channel_id: &str) -> bool {
        let Some(entry) = self.channels.get_mut(channel_id) else {
            return true;
        };
        entry.status = ChannelStatus::Opening;
        let target = entry.target.clone();
        let filter = entry.filter.clone();

        match self.transport.open(channel_id, &target, filter.as_deref()).await {
            Ok(events) => {
                debug!(channel_id, target = %target, "Channel open");
                let pump = spawn_pump(
                    channel_id.to_string(),
                    events.receiver,
                    self.event_tx.clone(),
                    self.closed_tx.clone(),
                );
                let Some(entry) = self.channels.get_mut(channel_id) else {
                    pump.abort();
                    return true;
                };
                if let Some(old) = entry.pump.replace(pump) {
                    old.abort();
                }
                entry.status = ChannelStatus::Open;
                true
            }
            Err(e) => {
                warn!(channel_id, error = %e, "Channel open failed");
                if let Some(entry) = self.channels.get_mut(channel_id) {
                    entry.status = ChannelStatus::Errored;
                }
                false
            }
        }
    }

    /// A pump reported its feed ended. While reachable and foregrounded
    /// that means the connection dropped.
    async fn handle_channel_closed(&mut self, channel_id: String) {
        let Some(entry) = self.channels.get_mut(&channel_id) else {
            return;
        };
        if entry.status != ChannelStatus::Open {
            return;
        }
        entry.status = ChannelStatus::Errored;
        entry.pump = None;

        if !*self.reachability.borrow() || self.backgrounded {
            return;
        }

        warn!(channel_id = %channel_id, "Channel feed dropped");
        self.transition(ConnectionState::Reconnecting);
        self.schedule_reconnect();
    }

    /// Arms the reconnect timer with the backoff delay for the next
    /// attempt, or gives up once the ceiling is reached.
    fn schedule_reconnect(&mut self) {
        let ceiling = self.config.channels.reconnect_ceiling;
        self.reconnect_attempts += 1;

        if ceiling > 0 && self.reconnect_attempts > ceiling {
            error!(
                attempts = self.reconnect_attempts - 1,
                "Reconnect ceiling reached, going offline until an explicit trigger"
            );
            self.reconnect_timer = None;
            self.reconnect_attempts = 0;
            self.close_all_channels(ChannelStatus::Errored);
            self.transition(ConnectionState::Offline);
            return;
        }

        let delay = retry_delay(
            self.reconnect_attempts,
            Duration::from_millis(self.config.queue.retry_base_delay_ms),
            Duration::from_millis(self.config.queue.max_retry_delay_ms),
        );
        info!(
            attempt = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
    }

    fn close_all_channels(&mut self, status: ChannelStatus) {
        for entry in self.channels.values_mut() {
            if let Some(pump) = entry.pump.take() {
                pump.abort();
            }
            entry.status = status;
        }
    }

    // =========================================================================
    // Event Delivery
    // =========================================================================

    /// Delivers buffered events to their callbacks, one batch per channel,
    /// preserving per-channel arrival order.
    fn flush_events(&mut self) {
        if self.pending_events.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_events);
        for (channel_id, events) in pending {
            let Some(entry) = self.channels.get(&channel_id) else {
                continue;
            };
            debug!(channel_id = %channel_id, count = events.len(), "Delivering change events");
            (entry.callback)(events);
        }
    }
}

/// Forwards a channel's feed into the manager and reports when it ends.
fn spawn_pump(
    channel_id: String,
    mut receiver: mpsc::Receiver<ChangeEvent>,
    event_tx: mpsc::Sender<ChangeEvent>,
    closed_tx: mpsc::Sender<ChannelClosed>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if event_tx.send(event).await.is_err() {
                return;
            }
        }
        let _ = closed_tx.send(ChannelClosed { channel_id }).await;
    })
}
