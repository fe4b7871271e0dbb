//! Connection lifecycle state machine
//!
//! One session runs per 0→1 observer transition. A session registers for
//! the client's events, connects, subscribes to the configured filters as
//! soon as the connect resolves, and forwards decoded messages until one
//! of these ends it:
//!
//! - the last observer detaches (disposal),
//! - the client reports a disconnect after the connection was established,
//! - connecting, subscribing or decoding fails, or the event source breaks.
//!
//! Whatever ended it, exactly one bounded-time [`cleanup`] pass follows.
//! The connect runs on its own task; a session that ends while it is still
//! in flight lets it settle inside the cleanup bound and then disconnects.
//! All state changes happen on the session task, which is the only writer of
//! the `is_connected` flag and the [`LifecycleState`].

use super::shared::Fanout;
use crate::error::AdapterError;
use crate::lifecycle_span;
use crate::protocol::{ConnectionOptions, TopicFilter, WillMessage};
use crate::transport::mqtt::{translate_options, MessageHandler};
use crate::transport::{ClientEvent, ClientError, ProtocolClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Upper bound on how long cleanup waits for a disconnect
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of the current (or most recent) session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No observer has attached yet
    Idle,
    /// Connect issued, waiting for acknowledgment
    Connecting,
    /// Connection acknowledged; messages are being forwarded
    Connected,
    /// Cleanup in progress
    Disconnecting,
    /// Session ended by completion or disposal
    Closed,
    /// Session ended by an error
    Errored,
}

/// Result of one cleanup pass
#[derive(Debug, Clone, PartialEq)]
pub enum CleanupOutcome {
    /// Client was not connected; nothing to do
    NotConnected,
    /// Disconnect completed within the timeout
    Disconnected,
    /// Disconnect completed within the timeout but reported an error
    DisconnectFailed(ClientError),
    /// Timer won the race; the disconnect keeps running in the background
    TimedOut,
}

/// How a session ended
#[derive(Debug)]
enum Termination {
    Disposed,
    Completed,
    Failed(AdapterError),
}

/// Connect call running on its own task
type ConnectTask = JoinHandle<Result<(), ClientError>>;

/// Disconnect `client` unless it is already disconnected, waiting at most `timeout`
///
/// Never fails: a slow or failing disconnect is logged and reported through
/// the outcome. The disconnect runs on its own task, so giving up on it does
/// not cancel it.
pub async fn cleanup<C: ProtocolClient>(client: &Arc<C>, timeout: Duration) -> CleanupOutcome {
    if !client.is_connected() {
        debug!("Cleanup skipped, client not connected");
        return CleanupOutcome::NotConnected;
    }

    let client = client.clone();
    race_teardown(tokio::spawn(disconnect(client)), timeout).await
}

/// Like [`cleanup`], but first lets an in-flight connect finish
///
/// Both steps share the one `timeout`. If the timer wins, the teardown task
/// still disconnects once the connect resolves.
async fn cleanup_after_connect<C: ProtocolClient>(
    client: &Arc<C>,
    connect: ConnectTask,
    timeout: Duration,
) -> CleanupOutcome {
    let client = client.clone();
    let teardown = tokio::spawn(async move {
        if let Ok(Err(e)) = connect.await {
            debug!("Abandoned connect failed: {}", e);
        }
        disconnect(client).await
    });
    race_teardown(teardown, timeout).await
}

async fn disconnect<C: ProtocolClient>(client: Arc<C>) -> CleanupOutcome {
    if !client.is_connected() {
        debug!("Cleanup skipped, client not connected");
        return CleanupOutcome::NotConnected;
    }
    match client.disconnect().await {
        Ok(()) => {
            info!("Disconnected successfully");
            CleanupOutcome::Disconnected
        }
        Err(e) => {
            warn!("Disconnect reported an error: {}", e);
            CleanupOutcome::DisconnectFailed(e)
        }
    }
}

async fn race_teardown(teardown: JoinHandle<CleanupOutcome>, timeout: Duration) -> CleanupOutcome {
    match tokio::time::timeout(timeout, teardown).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!("Disconnect task ended abnormally: {}", e);
            CleanupOutcome::DisconnectFailed(ClientError::Connection(e.to_string()))
        }
        Err(_) => {
            warn!("{}", AdapterError::DisconnectTimeout(timeout));
            CleanupOutcome::TimedOut
        }
    }
}

/// Drives one protocol client through connect, subscribe and teardown
pub struct LifecycleOrchestrator<C: ProtocolClient> {
    client: Arc<C>,
    options: ConnectionOptions,
    topic_filters: Vec<TopicFilter>,
    will: Option<WillMessage>,
    disconnect_timeout: Duration,
    state_tx: watch::Sender<LifecycleState>,
    connected_tx: watch::Sender<bool>,
}

impl<C: ProtocolClient> LifecycleOrchestrator<C> {
    pub fn new(
        client: Arc<C>,
        options: ConnectionOptions,
        topic_filters: Vec<TopicFilter>,
        will: Option<WillMessage>,
    ) -> Self {
        Self {
            client,
            options,
            topic_filters,
            will,
            disconnect_timeout: DISCONNECT_TIMEOUT,
            state_tx: watch::Sender::new(LifecycleState::Idle),
            connected_tx: watch::Sender::new(false),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Whether the current session holds an acknowledged connection
    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    /// Watch the connection flag
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!("Lifecycle state: {:?} -> {:?}", previous, next);
        }
    }

    /// Run one session to completion, including its cleanup pass
    ///
    /// `previous` is the prior session's task; it is awaited first so two
    /// sessions never overlap on the same client.
    pub(crate) async fn run(
        self: Arc<Self>,
        fanout: Fanout,
        mut detach_rx: oneshot::Receiver<()>,
        previous: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let span = lifecycle_span!(phase = "session", client_id = ?self.options.client_id);
        async {
            // Detached while waiting on the previous session
            let (termination, pending_connect) = match detach_rx.try_recv() {
                Err(TryRecvError::Empty) => self.drive(&fanout, &mut detach_rx).await,
                _ => (Termination::Disposed, None),
            };

            let final_state = match termination {
                Termination::Disposed => {
                    info!("Stream disposed by last observer");
                    LifecycleState::Closed
                }
                Termination::Completed => {
                    info!("Stream completed");
                    fanout.terminate(None);
                    LifecycleState::Closed
                }
                Termination::Failed(e) => {
                    error!("Stream failed: {}", e);
                    fanout.terminate(Some(e));
                    LifecycleState::Errored
                }
            };

            self.transition(LifecycleState::Disconnecting);
            self.cleanup(pending_connect).await;
            self.transition(final_state);
        }
        .instrument(span)
        .await
    }

    /// The event loop of one session
    ///
    /// Returns how it ended, plus the connect task if it was still running.
    async fn drive(
        &self,
        fanout: &Fanout,
        detach_rx: &mut oneshot::Receiver<()>,
    ) -> (Termination, Option<ConnectTask>) {
        // Register before connecting so the acknowledgment can't be missed
        let mut events = self.client.events();
        self.transition(LifecycleState::Connecting);

        let native = match translate_options(&self.options, self.will.as_ref()) {
            Ok(native) => native,
            Err(e) => return (Termination::Failed(e), None),
        };

        let client = self.client.clone();
        let mut connect: ConnectTask = tokio::spawn(async move { client.connect(native).await });
        let mut connecting = true;

        // Events are polled ahead of the connect, so the acknowledgment a client
        // raises before `connect` resolves is seen while still connecting
        let termination = loop {
            tokio::select! {
                biased;

                _ = &mut *detach_rx => break Termination::Disposed,

                event = events.recv() => match event {
                    Ok(ClientEvent::Connected) => {
                        if !self.is_connected() {
                            debug!("Connection acknowledged");
                            continue;
                        }
                        info!("Client reconnected, resubscribing");
                        if let Some(termination) = self.subscribe_unless_detached(detach_rx).await {
                            break termination;
                        }
                    }
                    Ok(ClientEvent::MessageReceived(message)) => {
                        if !self.is_connected() {
                            debug!("Dropping message on {} received before connect", message.topic);
                            continue;
                        }
                        match MessageHandler::decode(message) {
                            Ok(message) => fanout.next(message),
                            Err(e) => break Termination::Failed(e),
                        }
                    }
                    Ok(ClientEvent::Disconnected { reason }) => {
                        if !self.is_connected() {
                            debug!("Ignoring disconnect before connection was established: {}", reason);
                            continue;
                        }
                        info!("Disconnected: {}", reason);
                        break Termination::Completed;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        break Termination::Failed(AdapterError::EventStreamLagged(missed));
                    }
                    Err(RecvError::Closed) => break Termination::Completed,
                },

                result = &mut connect, if connecting => {
                    connecting = false;
                    let result = result.unwrap_or_else(|e| Err(ClientError::Connection(e.to_string())));
                    if let Err(e) = result {
                        break Termination::Failed(AdapterError::ConnectFailure(e));
                    }
                    self.connected_tx.send_replace(true);
                    self.transition(LifecycleState::Connected);
                    info!("Connected");

                    if let Some(termination) = self.subscribe_unless_detached(detach_rx).await {
                        break termination;
                    }
                }
            }
        };

        (termination, connecting.then_some(connect))
    }

    /// Subscribe to the configured filters, giving up if the last observer leaves
    async fn subscribe_unless_detached(
        &self,
        detach_rx: &mut oneshot::Receiver<()>,
    ) -> Option<Termination> {
        tokio::select! {
            biased;

            _ = &mut *detach_rx => Some(Termination::Disposed),
            result = self.subscribe_filters() => result.err().map(Termination::Failed),
        }
    }

    async fn subscribe_filters(&self) -> Result<(), AdapterError> {
        if self.topic_filters.is_empty() {
            return Ok(());
        }
        info!("Subscribing to {} topic filter(s)", self.topic_filters.len());
        self.client
            .subscribe(self.topic_filters.clone())
            .await
            .map_err(AdapterError::SubscribeFailure)
    }

    /// Bounded-time disconnect; the only place the connection flag is cleared
    async fn cleanup(&self, pending_connect: Option<ConnectTask>) -> CleanupOutcome {
        let outcome = match pending_connect {
            Some(connect) => {
                debug!("Session ended mid-connect, letting the connect settle");
                cleanup_after_connect(&self.client, connect, self.disconnect_timeout).await
            }
            None => cleanup(&self.client, self.disconnect_timeout).await,
        };
        self.connected_tx.send_replace(false);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProtocolClient;
    use crate::transport::NativeOptions;

    fn native_options() -> NativeOptions {
        let options = ConnectionOptions::new(
            "tcp://broker:1883".parse().unwrap(),
            crate::protocol::ConnectionType::Tcp,
        );
        translate_options(&options, None).unwrap()
    }

    #[tokio::test]
    async fn test_cleanup_noop_when_not_connected() {
        let client = Arc::new(MockProtocolClient::new());

        assert_eq!(
            cleanup(&client, DISCONNECT_TIMEOUT).await,
            CleanupOutcome::NotConnected
        );
        assert_eq!(client.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_disconnects_connected_client() {
        let client = Arc::new(MockProtocolClient::new());
        client.set_connected(true);

        assert_eq!(
            cleanup(&client, DISCONNECT_TIMEOUT).await,
            CleanupOutcome::Disconnected
        );
        assert_eq!(client.disconnect_calls(), 1);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_cleanup_reports_disconnect_error() {
        let client = Arc::new(MockProtocolClient::new().with_disconnect_failure());
        client.set_connected(true);

        assert!(matches!(
            cleanup(&client, DISCONNECT_TIMEOUT).await,
            CleanupOutcome::DisconnectFailed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_times_out_on_hanging_disconnect() {
        let client =
            Arc::new(MockProtocolClient::new().with_disconnect_delay(Duration::from_secs(8)));
        client.set_connected(true);

        let started = tokio::time::Instant::now();
        let outcome = cleanup(&client, DISCONNECT_TIMEOUT).await;

        assert_eq!(outcome, CleanupOutcome::TimedOut);
        assert!(started.elapsed() >= DISCONNECT_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_after_connect_disconnects_once_connected() {
        let client =
            Arc::new(MockProtocolClient::new().with_connect_delay(Duration::from_secs(1)));
        let connecting = client.clone();
        let connect = tokio::spawn(async move { connecting.connect(native_options()).await });

        let outcome = cleanup_after_connect(&client, connect, DISCONNECT_TIMEOUT).await;

        assert_eq!(outcome, CleanupOutcome::Disconnected);
        assert_eq!(client.connect_calls(), 1);
        assert_eq!(client.disconnect_calls(), 1);
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_after_slow_connect_still_disconnects_later() {
        let client =
            Arc::new(MockProtocolClient::new().with_connect_delay(Duration::from_secs(8)));
        let connecting = client.clone();
        let connect = tokio::spawn(async move { connecting.connect(native_options()).await });

        let outcome = cleanup_after_connect(&client, connect, DISCONNECT_TIMEOUT).await;
        assert_eq!(outcome, CleanupOutcome::TimedOut);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.disconnect_calls(), 1);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_new_orchestrator_is_idle_and_disconnected() {
        let orchestrator = LifecycleOrchestrator::new(
            Arc::new(MockProtocolClient::new()),
            ConnectionOptions::new(
                "tcp://broker:1883".parse().unwrap(),
                crate::protocol::ConnectionType::Tcp,
            ),
            Vec::new(),
            None,
        );
        assert_eq!(orchestrator.state(), LifecycleState::Idle);
        assert!(!orchestrator.is_connected());
    }
}
