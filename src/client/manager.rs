//! ConnectionManager implementation

use crate::auth::{LoginConfig, NegotiatorRegistry};
use crate::config::Config;
use crate::connection::{
    BackoffRetryConnector, ConnectionState, ConnectionType, Endpoint, RetryPolicy,
    SharedTransport, Socket, Transport,
};
use crate::metrics::{counters, histograms};
use crate::protocol::BinaryProtocol;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Authenticated transport together with the protocol view derived from it
///
/// The two are created together and always refer to the same stream.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    transport: SharedTransport,
    protocol: BinaryProtocol,
}

impl ConnectionHandle {
    fn new(transport: Transport) -> Self {
        let transport = SharedTransport::new(transport);
        let protocol = BinaryProtocol::new(transport.clone());
        Self {
            transport,
            protocol,
        }
    }

    /// Authenticated transport
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// Framed protocol over [`Self::transport`]
    pub fn protocol(&self) -> &BinaryProtocol {
        &self.protocol
    }
}

/// What `transport()` readers observe; replaced only as a whole
#[derive(Debug)]
struct Slot {
    state: ConnectionState,
    handle: Option<ConnectionHandle>,
}

/// Owns at most one authenticated connection to a cluster service
///
/// `reconnect()` and `close()` are serialized; `transport()` reads a snapshot
/// and never sees a transport whose protocol has not been installed.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> authconn::Result<()> {
/// use authconn::{Config, ConnectionManager, ConnectionType};
///
/// let manager = ConnectionManager::builder(Config::new(), ConnectionType::Nimbus, "nimbus.local")
///     .as_user("alice")
///     .connect()
///     .await?;
///
/// let protocol = manager.protocol().expect("connected");
/// protocol.write_frame(b"ping").await?;
/// manager.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    config: Arc<Config>,
    connection_type: ConnectionType,
    endpoint: Endpoint,
    as_user: Option<String>,
    retry_forever: bool,
    cancel: Option<CancellationToken>,
    registry: NegotiatorRegistry,
    lifecycle: tokio::sync::Mutex<()>,
    slot: RwLock<Slot>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.read();
        f.debug_struct("ConnectionManager")
            .field("connection_type", &self.connection_type)
            .field("endpoint", &self.endpoint)
            .field("as_user", &self.as_user)
            .field("retry_forever", &self.retry_forever)
            .field("state", &slot.state)
            .field("transport", &slot.handle.as_ref().map(|h| h.transport.id()))
            .finish()
    }
}

impl ConnectionManager {
    /// Validate the target and, unless the type is no-op, connect
    ///
    /// Fails with [`Error::InvalidArgument`] for a blank host or an unusable
    /// resolved port. Failures of the initial connect surface as
    /// [`Error::ConnectionFailed`].
    pub async fn new(
        config: impl Into<Arc<Config>>,
        connection_type: ConnectionType,
        host: &str,
        port: Option<i64>,
        timeout: Option<Duration>,
        as_user: Option<&str>,
    ) -> Result<Self> {
        let mut builder = Self::builder(config, connection_type, host);
        builder.port = port;
        builder.timeout = timeout;
        builder.as_user = as_user.map(str::to_string);
        builder.connect().await
    }

    /// Start building a manager with non-default options
    pub fn builder(
        config: impl Into<Arc<Config>>,
        connection_type: ConnectionType,
        host: impl Into<String>,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config: config.into(),
            connection_type,
            host: host.into(),
            port: None,
            timeout: None,
            as_user: None,
            retry_forever: false,
            cancel: None,
            registry: None,
        }
    }

    /// Current transport, if connected
    pub fn transport(&self) -> Option<SharedTransport> {
        self.slot.read().handle.as_ref().map(|h| h.transport.clone())
    }

    /// Protocol view of the current transport, if connected
    pub fn protocol(&self) -> Option<BinaryProtocol> {
        self.slot.read().handle.as_ref().map(|h| h.protocol.clone())
    }

    /// Current transport and protocol from one snapshot
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.slot.read().handle.clone()
    }

    /// Whether a handle is installed
    pub fn is_connected(&self) -> bool {
        self.slot.read().handle.is_some()
    }

    /// Lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.slot.read().state
    }

    /// Resolved connection target
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Service kind this manager connects to
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Identity the connection acts on behalf of
    pub fn as_user(&self) -> Option<&str> {
        self.as_user.as_deref()
    }

    /// Process configuration the manager reads on every reconnect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drop the current handle and establish a new one
    ///
    /// Either installs a fully authenticated handle or returns an error and
    /// leaves no handle at all; the previous handle is closed first in both
    /// cases. No-op connection types stay inert and return `Ok`.
    pub async fn reconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.connection_type.is_no_op() {
            tracing::debug!(connection_type = %self.connection_type, "no-op connection type, not connecting");
            return Ok(());
        }

        let conn_type = self.connection_type.to_string();
        let started = Instant::now();
        let span = tracing::info_span!(
            "reconnect",
            connection_type = %self.connection_type,
            endpoint = %self.endpoint,
            as_user = ?self.as_user
        );

        self.reconnect_locked(&conn_type, started)
            .instrument(span)
            .await
    }

    async fn reconnect_locked(&self, conn_type: &str, started: Instant) -> Result<()> {
        self.discard_handle().await;
        self.enter_connecting()?;

        match self.establish().await {
            Ok(handle) => {
                let transport_id = handle.transport.id();
                {
                    let mut slot = self.slot.write();
                    slot.state.transition(ConnectionState::Connected)?;
                    slot.handle = Some(handle);
                }
                counters::reconnect(conn_type, "success");
                histograms::reconnect_duration(conn_type, started.elapsed());
                tracing::info!(transport_id, "connection established");
                Ok(())
            }
            Err(e) => {
                self.slot
                    .write()
                    .state
                    .transition(ConnectionState::Disconnected)?;
                counters::reconnect(conn_type, e.category());
                histograms::reconnect_duration(conn_type, started.elapsed());
                tracing::error!(error = %e, "connection failed");
                Err(Error::ConnectionFailed {
                    host: self.endpoint.host.clone(),
                    port: self.endpoint.port,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Close the current handle, if any
    ///
    /// Idempotent. Shutdown failures are logged and otherwise ignored.
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.discard_handle().await;
    }

    fn enter_connecting(&self) -> Result<()> {
        let mut slot = self.slot.write();
        if slot.state == ConnectionState::Connecting {
            // An earlier reconnect future was dropped mid-flight
            slot.state = ConnectionState::Disconnected;
        }
        slot.state.transition(ConnectionState::Connecting)
    }

    /// Steps 2-6 of a reconnect: everything up to an authenticated transport
    async fn establish(&self) -> Result<ConnectionHandle> {
        let socket = Socket::for_endpoint(&self.endpoint)?;
        let login = LoginConfig::from_config(&self.config)?;
        let negotiator = self
            .registry
            .negotiator_for(self.connection_type, &self.config, &login)?;

        let mut policy = RetryPolicy::from_config(&self.config, self.retry_forever)?;
        if let Some(token) = &self.cancel {
            policy = policy.with_cancel_token(token.clone());
        }
        tracing::debug!(
            mechanism = negotiator.mechanism(),
            principal = %login.principal(),
            max_attempts = policy.max_attempts(),
            retry_forever = policy.retry_forever(),
            "connecting"
        );

        let transport = BackoffRetryConnector::new(policy)
            .connect(
                negotiator.as_ref(),
                &socket,
                &self.endpoint.host,
                self.as_user.as_deref(),
            )
            .await?;
        Ok(ConnectionHandle::new(transport))
    }

    /// Unpublish the current handle, then shut it down
    async fn discard_handle(&self) {
        let handle = {
            let mut slot = self.slot.write();
            let handle = slot.handle.take();
            // A dropped reconnect future can leave Connecting behind
            if handle.is_some() || slot.state == ConnectionState::Connecting {
                slot.state = ConnectionState::Disconnected;
            }
            handle
        };

        if let Some(handle) = handle {
            let id = handle.transport.id();
            if let Err(e) = handle.transport.close().await {
                tracing::debug!(transport = id, error = %e, "ignoring error while closing transport");
            }
            counters::handle_closed(&self.connection_type.to_string());
            tracing::debug!(transport = id, "connection closed");
        }
    }
}

/// Builder for [`ConnectionManager`]
#[derive(Debug)]
pub struct ConnectionManagerBuilder {
    config: Arc<Config>,
    connection_type: ConnectionType,
    host: String,
    port: Option<i64>,
    timeout: Option<Duration>,
    as_user: Option<String>,
    retry_forever: bool,
    cancel: Option<CancellationToken>,
    registry: Option<NegotiatorRegistry>,
}

impl ConnectionManagerBuilder {
    /// Override the port resolved from configuration
    pub fn port(mut self, port: i64) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the socket connect timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Act on behalf of another user
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.as_user = Some(user.into());
        self
    }

    /// Ignore the retry budget and keep trying until cancelled
    pub fn retry_forever(mut self, enabled: bool) -> Self {
        self.retry_forever = enabled;
        self
    }

    /// Token that aborts any retry loop this manager runs
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Use a custom negotiator table instead of the default one
    pub fn negotiator_registry(mut self, registry: NegotiatorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate, then connect unless the type is no-op
    pub async fn connect(self) -> Result<ConnectionManager> {
        let endpoint = Endpoint::resolve(
            self.connection_type,
            &self.config,
            &self.host,
            self.port,
            self.timeout,
        )?;

        let state = if self.connection_type.is_no_op() {
            ConnectionState::Inert
        } else {
            ConnectionState::Disconnected
        };

        let manager = ConnectionManager {
            config: self.config,
            connection_type: self.connection_type,
            endpoint,
            as_user: self.as_user.filter(|u| !u.is_empty()),
            retry_forever: self.retry_forever,
            cancel: self.cancel,
            registry: self.registry.unwrap_or_default(),
            lifecycle: tokio::sync::Mutex::new(()),
            slot: RwLock::new(Slot {
                state,
                handle: None,
            }),
        };

        if manager.connection_type.is_no_op() {
            tracing::debug!(endpoint = %manager.endpoint, "no-op connection type, skipping connect");
            return Ok(manager);
        }

        manager.reconnect().await?;
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthNegotiator;
    use crate::config::keys;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Hands out in-memory transports, or fails while `failing` is set
    ///
    /// Peer halves are kept alive and never written to, so reads on a handed
    /// out transport wait until it is closed. While `hanging` is set a call
    /// never completes.
    #[derive(Default)]
    struct Switchable {
        calls: AtomicUsize,
        failing: AtomicBool,
        hanging: AtomicBool,
        peers: parking_lot::Mutex<Vec<tokio::io::DuplexStream>>,
    }

    impl Switchable {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn set_hanging(&self, hanging: bool) {
            self.hanging.store(hanging, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AuthNegotiator for Switchable {
        fn mechanism(&self) -> &str {
            "switchable"
        }

        async fn authenticate(
            &self,
            socket: &Socket,
            _host: &str,
            _as_user: Option<&str>,
        ) -> Result<Transport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hanging.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::ConnectionClosed);
            }
            let (client, server) = tokio::io::duplex(64);
            self.peers.lock().push(server);
            Ok(Transport::from_stream(client, socket.peer(), "switchable"))
        }
    }

    fn fast_retry_config() -> Config {
        Config::new()
            .set(keys::RETRY_TIMES, 3)
            .set(keys::RETRY_INTERVAL_MS, 1)
            .set(keys::RETRY_INTERVAL_CEILING_MS, 4)
    }

    fn registry_with(negotiator: Arc<Switchable>) -> NegotiatorRegistry {
        let mut registry = NegotiatorRegistry::empty();
        registry.register_instance("plain", negotiator);
        registry
    }

    async fn connected(negotiator: &Arc<Switchable>) -> ConnectionManager {
        ConnectionManager::builder(fast_retry_config(), ConnectionType::Nimbus, "nimbus.local")
            .negotiator_registry(registry_with(negotiator.clone()))
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_op_type_never_connects() {
        let negotiator = Arc::new(Switchable::default());
        let manager =
            ConnectionManager::builder(Config::new(), ConnectionType::LocalFake, "localhost")
                .negotiator_registry(registry_with(negotiator.clone()))
                .connect()
                .await
                .unwrap();

        assert!(manager.transport().is_none());
        assert!(manager.protocol().is_none());
        assert_eq!(manager.state(), ConnectionState::Inert);

        manager.reconnect().await.unwrap();
        manager.close().await;
        assert!(manager.transport().is_none());
        assert_eq!(manager.state(), ConnectionState::Inert);
        assert_eq!(negotiator.calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_host_rejected_before_connecting() {
        let negotiator = Arc::new(Switchable::default());
        for host in ["", "   "] {
            let err = ConnectionManager::builder(Config::new(), ConnectionType::Nimbus, host)
                .negotiator_registry(registry_with(negotiator.clone()))
                .connect()
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
        assert_eq!(negotiator.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_port_rejected() {
        let config = Config::new().set(keys::DRPC_PORT, -1);
        let err = ConnectionManager::new(config, ConnectionType::Drpc, "drpc.local", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(ref m) if m.contains("-1")));

        let err = ConnectionManager::new(
            Config::new(),
            ConnectionType::Nimbus,
            "nimbus.local",
            Some(0),
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_connect_installs_handle() {
        let negotiator = Arc::new(Switchable::default());
        let manager = connected(&negotiator).await;

        assert_eq!(negotiator.calls(), 1);
        assert!(manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.endpoint().port, 6627);

        let handle = manager.handle().unwrap();
        assert!(handle.protocol().transport().ptr_eq(handle.transport()));
        assert!(manager.transport().unwrap().ptr_eq(handle.transport()));
        assert!(handle.transport().is_open());
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let negotiator = Arc::new(Switchable::default());
        let manager = connected(&negotiator).await;
        let transport = manager.transport().unwrap();

        manager.close().await;
        assert!(manager.transport().is_none());
        assert!(manager.protocol().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!transport.is_open());

        manager.close().await;
        assert!(manager.transport().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_while_reader_waits_for_response() {
        let negotiator = Arc::new(Switchable::default());
        let manager = Arc::new(connected(&negotiator).await);
        let protocol = manager.protocol().unwrap();

        let pending_call = tokio::spawn(async move { protocol.read_frame().await });
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(2), manager.close())
            .await
            .expect("close must not wait for a pending read");
        assert!(manager.handle().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let result = pending_call.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_reconnect_while_reader_waits_for_response() {
        let negotiator = Arc::new(Switchable::default());
        let manager = connected(&negotiator).await;
        let protocol = manager.protocol().unwrap();

        let pending_call = tokio::spawn(async move { protocol.read_frame().await });
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(2), manager.reconnect())
            .await
            .expect("reconnect must not wait for a pending read")
            .unwrap();
        assert!(manager.is_connected());
        assert!(matches!(pending_call.await.unwrap(), Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_after_dropped_reconnect_resets_state() {
        let negotiator = Arc::new(Switchable::default());
        let manager = connected(&negotiator).await;

        negotiator.set_hanging(true);
        let dropped = tokio::time::timeout(Duration::from_millis(20), manager.reconnect()).await;
        assert!(dropped.is_err());
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.handle().is_none());

        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        negotiator.set_hanging(false);
        manager.reconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_reconnect_after_close_gives_new_transport() {
        let negotiator = Arc::new(Switchable::default());
        let manager = connected(&negotiator).await;
        let first = manager.transport().unwrap();

        manager.close().await;
        manager.reconnect().await.unwrap();

        let second = manager.transport().unwrap();
        assert_ne!(first.id(), second.id());
        assert!(!first.ptr_eq(&second));
        assert!(!first.is_open());
        assert!(second.is_open());
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_handle() {
        let negotiator = Arc::new(Switchable::default());
        let manager = connected(&negotiator).await;
        let first = manager.transport().unwrap();

        manager.reconnect().await.unwrap();

        assert!(!first.is_open());
        assert_ne!(manager.transport().unwrap().id(), first.id());
        assert_eq!(negotiator.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnect_leaves_no_handle() {
        let negotiator = Arc::new(Switchable::default());
        let manager = connected(&negotiator).await;
        let previous = manager.transport().unwrap();

        negotiator.set_failing(true);
        let err = manager.reconnect().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { port: 6627, .. }));
        assert!(err.is_retry_exhausted());
        assert_eq!(negotiator.calls(), 1 + 4);
        assert!(manager.transport().is_none());
        assert!(manager.protocol().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!previous.is_open());

        negotiator.set_failing(false);
        manager.reconnect().await.unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_connect_failure_is_fatal() {
        let negotiator = Arc::new(Switchable::default());
        negotiator.set_failing(true);

        let err = ConnectionManager::builder(fast_retry_config(), ConnectionType::Supervisor, "sup")
            .negotiator_registry(registry_with(negotiator.clone()))
            .connect()
            .await
            .unwrap_err();

        assert!(err.is_retry_exhausted());
        assert_eq!(negotiator.calls(), 4);
    }

    #[tokio::test]
    async fn test_unregistered_plugin_fails_connect() {
        let negotiator = Arc::new(Switchable::default());
        let config = fast_retry_config().set(keys::NIMBUS_TRANSPORT, "digest");

        let err = ConnectionManager::builder(config, ConnectionType::Nimbus, "nimbus.local")
            .negotiator_registry(registry_with(negotiator.clone()))
            .connect()
            .await
            .unwrap_err();

        match err {
            Error::ConnectionFailed { source, .. } => {
                assert!(matches!(*source, Error::Config(ref m) if m.contains("digest")))
            }
            other => panic!("expected ConnectionFailed, got {:?}", other),
        }
        assert_eq!(negotiator.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retry_forever() {
        let negotiator = Arc::new(Switchable::default());
        negotiator.set_failing(true);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                token.cancel();
            })
        };

        let err = ConnectionManager::builder(Config::new(), ConnectionType::Drpc, "drpc.local")
            .retry_forever(true)
            .cancel_token(token)
            .negotiator_registry(registry_with(negotiator.clone()))
            .connect()
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!err.is_retry_exhausted());
        assert!(negotiator.calls() >= 2);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_reconnects_publish_complete_handles() {
        let negotiator = Arc::new(Switchable::default());
        let manager = Arc::new(connected(&negotiator).await);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager.reconnect().await.unwrap();
                    if let Some(handle) = manager.handle() {
                        assert!(handle.protocol().transport().ptr_eq(handle.transport()));
                    }
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert_eq!(negotiator.calls(), 9);
        let handle = manager.handle().unwrap();
        assert!(handle.transport().is_open());
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_as_user_and_accessors() {
        let negotiator = Arc::new(Switchable::default());
        let manager = ConnectionManager::builder(
            fast_retry_config(),
            ConnectionType::DrpcInvocations,
            "drpc.local",
        )
        .port(4000)
        .timeout(Duration::from_secs(2))
        .as_user("alice")
        .negotiator_registry(registry_with(negotiator))
        .connect()
        .await
        .unwrap();

        assert_eq!(manager.as_user(), Some("alice"));
        assert_eq!(manager.connection_type(), ConnectionType::DrpcInvocations);
        assert_eq!(manager.endpoint().to_string(), "drpc.local:4000");
        assert_eq!(manager.endpoint().timeout, Some(Duration::from_secs(2)));
        assert_eq!(manager.transport().unwrap().peer(), "drpc.local:4000");
        assert!(manager.config().contains(keys::RETRY_TIMES));
    }
}
