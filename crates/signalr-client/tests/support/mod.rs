//! Shared test doubles: a scripted transport, a stubbed HTTP client and an
//! in-memory log writer.
#![allow(dead_code)]

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use signalr_client::{
    ClientConfig, Connection, HttpClient, LogWriter, SignalrError, SignalrResult, TraceLevel,
    Transport, TransportFactory,
};
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};

pub const CONNECTION_ID: &str = "f7707523-307d-4cba-9abf-3eef701241e8";

/// The handshake acknowledgement frame as servers send it.
pub fn handshake_frame() -> String {
    "{ }\u{1e}".to_string()
}

pub fn negotiate_success_body() -> String {
    format!(
        "{{\"connectionId\":\"{CONNECTION_ID}\",\"availableTransports\":[{{\"transport\":\
         \"WebSockets\",\"transferFormats\":[\"Text\",\"Binary\"]}}]}}"
    )
}

/// Collects log entries for assertions.
#[derive(Default)]
pub struct MemoryLogWriter {
    entries: StdMutex<Vec<String>>,
}

impl MemoryLogWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries with the leading timestamp removed, matching from the
    /// category bracket onward.
    pub fn entries_without_timestamps(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|entry| match entry.find('[') {
                Some(index) => entry[index..].to_string(),
                None => entry.clone(),
            })
            .collect()
    }
}

impl LogWriter for MemoryLogWriter {
    fn write(&self, entry: &str) {
        self.entries.lock().unwrap().push(entry.to_string());
    }
}

/// Responds to negotiate requests from a closure, recording each request.
pub struct StubHttpClient {
    handler: Box<dyn Fn(&str) -> SignalrResult<String> + Send + Sync>,
    requests: StdMutex<Vec<(String, ClientConfig)>>,
}

impl StubHttpClient {
    pub fn new(handler: impl Fn(&str) -> SignalrResult<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: StdMutex::new(Vec::new()),
        })
    }

    /// A client answering every negotiate request with a successful body.
    pub fn default_negotiate() -> Arc<Self> {
        Self::new(|url| {
            assert!(url.contains("/negotiate"), "unexpected request to {url}");
            Ok(negotiate_success_body())
        })
    }

    pub fn requests(&self) -> Vec<(String, ClientConfig)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for StubHttpClient {
    async fn post(&self, url: &str, config: &ClientConfig) -> SignalrResult<String> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), config.clone()));
        (self.handler)(url)
    }
}

pub enum ConnectBehavior {
    Succeed,
    Fail(String),
    /// Never resolves until the transport is closed.
    Pending,
}

/// A scripted transport. Frames pushed with [`push_frame`] are handed to the
/// receive loop one buffer per call, in order; once the script is exhausted
/// `receive` blocks until the transport is closed.
///
/// [`push_frame`]: MockTransport::push_frame
pub struct MockTransport {
    connect_behavior: ConnectBehavior,
    send_error: StdMutex<Option<String>>,
    script_tx: mpsc::UnboundedSender<Result<String, String>>,
    script_rx: TokioMutex<mpsc::UnboundedReceiver<Result<String, String>>>,
    closed_tx: watch::Sender<bool>,
    connect_started_tx: watch::Sender<bool>,
    /// When false, `close` blocks until released.
    close_gate_tx: watch::Sender<bool>,
    sent: StdMutex<Vec<String>>,
    connect_urls: StdMutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(connect_behavior: ConnectBehavior) -> Arc<Self> {
        let (script_tx, script_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connect_behavior,
            send_error: StdMutex::new(None),
            script_tx,
            script_rx: TokioMutex::new(script_rx),
            closed_tx: watch::channel(false).0,
            connect_started_tx: watch::channel(false).0,
            close_gate_tx: watch::channel(true).0,
            sent: StdMutex::new(Vec::new()),
            connect_urls: StdMutex::new(Vec::new()),
        })
    }

    /// A transport that connects successfully and immediately serves the
    /// handshake frame.
    pub fn with_handshake() -> Arc<Self> {
        let transport = Self::new(ConnectBehavior::Succeed);
        transport.push_frame(&handshake_frame());
        transport
    }

    pub fn push_frame(&self, frame: &str) {
        let _ = self.script_tx.send(Ok(frame.to_string()));
    }

    pub fn push_error(&self, message: &str) {
        let _ = self.script_tx.send(Err(message.to_string()));
    }

    pub fn set_send_error(&self, message: &str) {
        *self.send_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connect_urls(&self) -> Vec<String> {
        self.connect_urls.lock().unwrap().clone()
    }

    pub async fn wait_connect_started(&self) {
        let mut rx = self.connect_started_tx.subscribe();
        let _ = rx.wait_for(|started| *started).await;
    }

    pub fn block_close(&self) {
        self.close_gate_tx.send_replace(false);
    }

    pub fn release_close(&self) {
        self.close_gate_tx.send_replace(true);
    }

    async fn wait_closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> SignalrResult<()> {
        self.connect_urls.lock().unwrap().push(url.to_string());
        self.closed_tx.send_replace(false);
        self.connect_started_tx.send_replace(true);
        match &self.connect_behavior {
            ConnectBehavior::Succeed => Ok(()),
            ConnectBehavior::Fail(message) => Err(SignalrError::transport(message.clone())),
            ConnectBehavior::Pending => {
                self.wait_closed().await;
                Err(SignalrError::transport("connect aborted"))
            }
        }
    }

    async fn send(&self, message: &str) -> SignalrResult<()> {
        if let Some(error) = self.send_error.lock().unwrap().clone() {
            return Err(SignalrError::transport(error));
        }
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn receive(&self) -> SignalrResult<String> {
        let mut script = self.script_rx.lock().await;
        tokio::select! {
            biased;
            next = script.recv() => match next {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(message)) => Err(SignalrError::transport(message)),
                None => Err(SignalrError::transport("websocket closed")),
            },
            _ = self.wait_closed() => Err(SignalrError::transport("websocket closed")),
        }
    }

    async fn close(&self) -> SignalrResult<()> {
        self.closed_tx.send_replace(true);
        let mut gate = self.close_gate_tx.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        Ok(())
    }
}

/// Hands the same scripted transport to every start attempt, recording the
/// configuration each one received.
pub struct MockTransportFactory {
    transport: Arc<MockTransport>,
    configs: StdMutex<Vec<ClientConfig>>,
}

impl MockTransportFactory {
    pub fn new(transport: Arc<MockTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            configs: StdMutex::new(Vec::new()),
        })
    }

    pub fn configs(&self) -> Vec<ClientConfig> {
        self.configs.lock().unwrap().clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, config: &ClientConfig) -> Arc<dyn Transport> {
        self.configs.lock().unwrap().push(config.clone());
        self.transport.clone()
    }
}

/// Wire a connection to the given doubles.
pub fn build_connection(
    url: &str,
    http_client: Arc<StubHttpClient>,
    transport: Arc<MockTransport>,
    trace_level: TraceLevel,
) -> (Connection, Arc<MemoryLogWriter>) {
    let writer = MemoryLogWriter::new();
    let connection = Connection::builder(url)
        .trace_level(trace_level)
        .log_writer(writer.clone())
        .http_client(http_client)
        .transport_factory(MockTransportFactory::new(transport))
        .build()
        .expect("build connection");
    (connection, writer)
}

/// Poll until the connection reaches `state`.
pub async fn wait_for_state(connection: &Connection, state: signalr_client::ConnectionState) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while connection.state() != state {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("connection never reached {state:?}"));
}
