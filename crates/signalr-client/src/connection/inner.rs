//! Connection state machine internals.
//!
//! A single mutex guards the state, the callbacks and the configuration.
//! User callbacks are never invoked while it is held. The asynchronous
//! `shutdown_lock` serializes teardown decisions only; it is released before
//! the transport close so that a second stop caller can observe the
//! `disconnecting` state and resolve as canceled.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::receive;
use super::ConnectionState;
use crate::config::ClientConfig;
use crate::error::{SignalrError, SignalrResult};
use crate::http::HttpClient;
use crate::negotiate;
use crate::trace::{LogCategory, Logger};
use crate::transport::{Transport, TransportFactory};
use crate::url_builder;

pub(crate) type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;
pub(crate) type DisconnectedCallback = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct ConnectionCore {
    base_url: String,
    logger: Logger,
    http_client: Arc<dyn HttpClient>,
    transport_factory: Arc<dyn TransportFactory>,
    state: Mutex<CoreState>,
    /// Mirrors `CoreState::state` so teardown paths can be awaited without
    /// polling.
    state_tx: watch::Sender<ConnectionState>,
    shutdown_lock: AsyncMutex<()>,
}

struct CoreState {
    state: ConnectionState,
    connection_id: String,
    config: ClientConfig,
    on_message: Option<MessageCallback>,
    on_disconnected: Option<DisconnectedCallback>,
    transport: Option<Arc<dyn Transport>>,
    start: Option<StartAttempt>,
    receive_handle: Option<JoinHandle<()>>,
}

struct StartAttempt {
    cancel_tx: watch::Sender<bool>,
    /// Resolved when the start driver has settled (connected, failed or
    /// canceled); taken by the stop path.
    settled_rx: Option<oneshot::Receiver<()>>,
}

/// Resolves once the attempt's cancel flag is raised. Never resolves if the
/// attempt outlives its cancel handle.
async fn canceled(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|canceled| *canceled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> Option<String> {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        Some((*message).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

impl ConnectionCore {
    pub(crate) fn new(
        base_url: String,
        logger: Logger,
        http_client: Arc<dyn HttpClient>,
        transport_factory: Arc<dyn TransportFactory>,
        config: ClientConfig,
    ) -> Self {
        Self {
            base_url,
            logger,
            http_client,
            transport_factory,
            state: Mutex::new(CoreState {
                state: ConnectionState::Disconnected,
                connection_id: String::new(),
                config,
                on_message: None,
                on_disconnected: None,
                transport: None,
                start: None,
                receive_handle: None,
            }),
            state_tx: watch::channel(ConnectionState::Disconnected).0,
            shutdown_lock: AsyncMutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.lock().state
    }

    pub(crate) fn connection_id(&self) -> String {
        self.state.lock().connection_id.clone()
    }

    pub(crate) fn set_on_message(&self, callback: MessageCallback) -> SignalrResult<()> {
        let mut s = self.state.lock();
        if s.state != ConnectionState::Disconnected {
            return Err(SignalrError::invalid_state(format!(
                "cannot set the callback when the connection is not in the disconnected state. \
                 current connection state: {}",
                s.state
            )));
        }
        s.on_message = Some(callback);
        Ok(())
    }

    pub(crate) fn set_on_disconnected(&self, callback: DisconnectedCallback) -> SignalrResult<()> {
        let mut s = self.state.lock();
        if s.state != ConnectionState::Disconnected {
            return Err(SignalrError::invalid_state(format!(
                "cannot set the disconnected callback when the connection is not in the \
                 disconnected state. current connection state: {}",
                s.state
            )));
        }
        s.on_disconnected = Some(callback);
        Ok(())
    }

    pub(crate) fn set_client_config(&self, config: ClientConfig) -> SignalrResult<()> {
        let mut s = self.state.lock();
        if s.state != ConnectionState::Disconnected {
            return Err(SignalrError::invalid_state(format!(
                "cannot set client config when the connection is not in the disconnected state. \
                 current connection state: {}",
                s.state
            )));
        }
        s.config = config;
        Ok(())
    }

    /// Start the connection: negotiate, connect the transport, run the
    /// receive loop and await the handshake frame.
    ///
    /// The work is driven by a spawned task so that dropping the returned
    /// future does not strand the state machine mid-transition.
    pub(crate) async fn start(self: &Arc<Self>) -> SignalrResult<()> {
        let (cancel_rx, settled_tx, config) = {
            let mut s = self.state.lock();
            if s.state != ConnectionState::Disconnected {
                return Err(SignalrError::invalid_state(
                    "cannot start a connection that is not in the disconnected state",
                ));
            }
            self.change_state(&mut s, ConnectionState::Disconnected, ConnectionState::Connecting);
            s.connection_id.clear();
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let (settled_tx, settled_rx) = oneshot::channel();
            s.start = Some(StartAttempt {
                cancel_tx,
                settled_rx: Some(settled_rx),
            });
            (cancel_rx, settled_tx, s.config.clone())
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let result = core.drive_start(cancel_rx, config).await;
            let _ = settled_tx.send(());
            let _ = outcome_tx.send(result);
        });

        match outcome_rx.await {
            Ok(result) => result,
            Err(_) => Err(SignalrError::Canceled),
        }
    }

    async fn drive_start(
        self: &Arc<Self>,
        mut cancel_rx: watch::Receiver<bool>,
        config: ClientConfig,
    ) -> SignalrResult<()> {
        // the receive loop withholds frame delivery until this start has
        // settled as connected; see `receive::run`
        let (ready_tx, ready_rx) = oneshot::channel();
        match self.run_start(&mut cancel_rx, config, ready_rx).await {
            Ok(()) => {
                {
                    let mut s = self.state.lock();
                    self.change_state(
                        &mut s,
                        ConnectionState::Connecting,
                        ConnectionState::Connected,
                    );
                }
                let _ = ready_tx.send(());
                Ok(())
            }
            Err(error) => {
                if matches!(error, SignalrError::Canceled) {
                    self.logger
                        .log(LogCategory::Info, "starting the connection has been canceled.");
                } else {
                    self.logger.log(
                        LogCategory::Error,
                        format_args!("connection could not be started due to: {error}"),
                    );
                }
                let (transport, handle) = {
                    let mut s = self.state.lock();
                    let resources = (s.transport.take(), s.receive_handle.take());
                    self.change_state(
                        &mut s,
                        ConnectionState::Connecting,
                        ConnectionState::Disconnected,
                    );
                    s.start = None;
                    resources
                };
                // unblock a loop parked at the handshake rendezvous before
                // joining it
                drop(ready_tx);
                if let Some(transport) = transport {
                    let _ = transport.close().await;
                }
                if let Some(handle) = handle {
                    let _ = handle.await;
                }
                Err(error)
            }
        }
    }

    async fn run_start(
        self: &Arc<Self>,
        cancel_rx: &mut watch::Receiver<bool>,
        config: ClientConfig,
        ready_rx: oneshot::Receiver<()>,
    ) -> SignalrResult<()> {
        let negotiation = tokio::select! {
            biased;
            _ = canceled(cancel_rx) => return Err(SignalrError::Canceled),
            result = negotiate::negotiate(self.http_client.as_ref(), &self.base_url, &config) => {
                result?
            }
        };

        // the negotiated id is observable even if a later step fails
        self.state.lock().connection_id = negotiation.connection_id.clone();

        let connect_url = url_builder::build_connect(&negotiation.url, &negotiation.connection_id)?;
        let transport = self.transport_factory.create(&negotiation.config);
        self.state.lock().transport = Some(Arc::clone(&transport));

        let handshake_timeout = negotiation.config.handshake_timeout;
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let connect_and_handshake = async {
            if let Err(error) = transport.connect(&connect_url).await {
                self.logger.log(
                    LogCategory::Error,
                    format_args!("transport could not connect due to: {error}"),
                );
                return Err(error);
            }
            let handle = tokio::spawn(receive::run(
                Arc::downgrade(self),
                Arc::clone(&transport),
                handshake_tx,
                ready_rx,
            ));
            self.state.lock().receive_handle = Some(handle);
            match handshake_rx.await {
                Ok(result) => result,
                Err(_) => Err(SignalrError::transport(
                    "connection closed before the handshake could complete",
                )),
            }
        };

        tokio::select! {
            biased;
            _ = canceled(cancel_rx) => Err(SignalrError::Canceled),
            result = timeout(handshake_timeout, connect_and_handshake) => match result {
                Ok(result) => result,
                Err(_) => Err(SignalrError::protocol(
                    "transport timed out when trying to connect",
                )),
            },
        }
    }

    /// Stop the connection. The first caller owns the teardown; a stop that
    /// finds another stop in progress resolves as canceled.
    pub(crate) async fn stop(self: &Arc<Self>) -> SignalrResult<()> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let result = core.run_stop().await;
            let _ = outcome_tx.send(result);
        });
        match outcome_rx.await {
            Ok(result) => result,
            Err(_) => Err(SignalrError::Canceled),
        }
    }

    async fn run_stop(self: &Arc<Self>) -> SignalrResult<()> {
        self.logger.log(LogCategory::Info, "stopping connection");
        if self.shutdown().await? {
            self.invoke_disconnected();
        }
        Ok(())
    }

    /// Returns whether this call performed a teardown (and therefore owes the
    /// disconnected callback).
    async fn shutdown(self: &Arc<Self>) -> SignalrResult<bool> {
        let guard = self.shutdown_lock.lock().await;
        self.logger.log(LogCategory::Info, "acquired lock in shutdown()");

        let pending_start = {
            let mut s = self.state.lock();
            match s.state {
                ConnectionState::Disconnected => return Ok(false),
                ConnectionState::Disconnecting => return Err(SignalrError::Canceled),
                ConnectionState::Connecting => match s.start.as_mut() {
                    Some(attempt) => {
                        let _ = attempt.cancel_tx.send(true);
                        attempt.settled_rx.take()
                    }
                    None => None,
                },
                ConnectionState::Connected => None,
            }
        };

        if let Some(settled_rx) = pending_start {
            let _ = settled_rx.await;
            if self.state.lock().state == ConnectionState::Disconnected {
                return Ok(true);
            }
            // the start won the race and reached connected; fall through
        }

        let Some((transport, handle)) = self.begin_teardown() else {
            // the receive loop raced us and owns the disconnect; wait for it
            // to drain before reporting the stop complete
            let mut state_rx = self.state_tx.subscribe();
            drop(guard);
            let _ = state_rx
                .wait_for(|state| *state == ConnectionState::Disconnected)
                .await;
            return Ok(false);
        };
        drop(guard);
        self.finish_teardown(transport, handle).await;
        Ok(true)
    }

    fn begin_teardown(&self) -> Option<(Option<Arc<dyn Transport>>, Option<JoinHandle<()>>)> {
        let mut s = self.state.lock();
        if s.state != ConnectionState::Connected {
            return None;
        }
        self.change_state(&mut s, ConnectionState::Connected, ConnectionState::Disconnecting);
        Some((s.transport.take(), s.receive_handle.take()))
    }

    async fn finish_teardown(
        &self,
        transport: Option<Arc<dyn Transport>>,
        handle: Option<JoinHandle<()>>,
    ) {
        if let Some(transport) = transport {
            let _ = transport.close().await;
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let mut s = self.state.lock();
        self.change_state(&mut s, ConnectionState::Disconnecting, ConnectionState::Disconnected);
        s.start = None;
    }

    /// Disconnect path driven by the receive loop after a terminal receive
    /// failure while connected.
    pub(crate) async fn handle_transport_closed(self: Arc<Self>) {
        let (transport, own_handle) = {
            let mut s = self.state.lock();
            if s.state != ConnectionState::Connected {
                // a stop owns the teardown; it will join this task
                return;
            }
            self.change_state(&mut s, ConnectionState::Connected, ConnectionState::Disconnecting);
            (s.transport.take(), s.receive_handle.take())
        };
        // own_handle is this very task; dropping it detaches
        drop(own_handle);
        if let Some(transport) = transport {
            let _ = transport.close().await;
        }
        {
            let mut s = self.state.lock();
            self.change_state(&mut s, ConnectionState::Disconnecting, ConnectionState::Disconnected);
            s.start = None;
        }
        self.invoke_disconnected();
    }

    pub(crate) async fn send(&self, message: &str) -> SignalrResult<()> {
        let transport = {
            let s = self.state.lock();
            if s.state != ConnectionState::Connected {
                return Err(SignalrError::invalid_state(format!(
                    "cannot send data when the connection is not in the connected state. current \
                     connection state: {}",
                    s.state
                )));
            }
            match s.transport.clone() {
                Some(transport) => transport,
                None => return Err(SignalrError::transport("transport is not available")),
            }
        };

        if let Err(error) = transport.send(message).await {
            self.logger.log(
                LogCategory::Error,
                format_args!("error sending data: {error}"),
            );
            return Err(error);
        }
        Ok(())
    }

    /// Log one received buffer at the messages level.
    pub(crate) fn note_chunk(&self, chunk: &str) {
        self.logger.log(
            LogCategory::Message,
            format_args!("processing message: {chunk}"),
        );
    }

    /// Deliver a buffer's frames to the user callback, in order, outside the
    /// state lock.
    pub(crate) fn deliver_frames(&self, chunk: &str) {
        let callback = self.state.lock().on_message.clone();
        let Some(callback) = callback else { return };
        for frame in receive::frames(chunk) {
            self.invoke_message_received(&callback, frame.payload);
        }
    }

    fn invoke_message_received(&self, callback: &MessageCallback, message: &str) {
        let message = message.to_string();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
            match panic_message(payload.as_ref()) {
                Some(reason) => self.logger.log(
                    LogCategory::Error,
                    format_args!("message_received callback threw an exception: {reason}"),
                ),
                None => self.logger.log(
                    LogCategory::Error,
                    "message_received callback threw an unknown exception",
                ),
            }
        }
    }

    fn invoke_disconnected(&self) {
        let callback = self.state.lock().on_disconnected.clone();
        let Some(callback) = callback else { return };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback())) {
            match panic_message(payload.as_ref()) {
                Some(reason) => self.logger.log(
                    LogCategory::Error,
                    format_args!("disconnected callback threw an exception: {reason}"),
                ),
                None => self.logger.log(
                    LogCategory::Error,
                    "disconnected callback threw an unknown exception",
                ),
            }
        }
    }

    fn change_state(&self, s: &mut CoreState, from: ConnectionState, to: ConnectionState) {
        debug_assert_eq!(s.state, from);
        s.state = to;
        self.state_tx.send_replace(to);
        self.logger
            .log(LogCategory::StateChange, format_args!("{from} -> {to}"));
    }
}

impl Drop for ConnectionCore {
    fn drop(&mut self) {
        let s = self.state.get_mut();
        if let Some(attempt) = &s.start {
            let _ = attempt.cancel_tx.send(true);
        }
        if let Some(handle) = s.receive_handle.take() {
            handle.abort();
        }
        // the transport closes when its last owner drops
    }
}
