use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::{CryptoRng, RngCore};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::addr::{Multiaddr, Protocol};
use crate::address_book::AddressBook;
use crate::error::{BootstrapError, DialError};
use crate::identity::{Identity, PeerId};
use crate::negotiate::{negotiate_inbound, negotiate_outbound, NegotiationConfig};
use crate::registry::{ConnectionInfo, ConnectionRegistry, Direction};

/// Default deadline for establishing an outbound TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Handler invoked once per accepted stream, on its own task.
///
/// The token is cancelled when the node shuts down.
pub type StreamHandler =
    Arc<dyn Fn(Connection, CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Interface to listen on. Default: all IPv4 interfaces.
    pub listen_ip: IpAddr,
    /// Port to listen on. 0 selects an ephemeral port.
    pub port: u16,
    /// Deadline for each outbound TCP connect.
    pub connect_timeout: Duration,
    /// Stream negotiation settings.
    pub negotiation: NegotiationConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            negotiation: NegotiationConfig::default(),
        }
    }
}

/// A negotiated stream to one remote peer.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    remote_peer: PeerId,
    remote_addr: SocketAddr,
    protocol: String,
    direction: Direction,
    stream: TcpStream,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer: self.remote_peer,
            remote_addr: self.remote_addr,
            protocol: self.protocol.clone(),
            direction: self.direction,
        }
    }

    /// Take the underlying stream. Dropping it closes the connection.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// Local identity, listening endpoint, protocol handlers and address book.
pub struct Host {
    identity: Identity,
    listener: TcpListener,
    local_addr: SocketAddr,
    handlers: RwLock<HashMap<String, StreamHandler>>,
    address_book: AddressBook,
    config: HostConfig,
    next_conn_id: AtomicU64,
}

/// Generate an identity from `rng` and listen on `0.0.0.0:<port>`.
pub async fn create_host<R>(port: u16, rng: &mut R) -> Result<Host, BootstrapError>
where
    R: RngCore + CryptoRng,
{
    let identity = Identity::generate(rng);
    Host::bind(
        identity,
        HostConfig {
            port,
            ..HostConfig::default()
        },
    )
    .await
}

impl Host {
    /// Bind the listening socket for `identity`.
    pub async fn bind(identity: Identity, config: HostConfig) -> Result<Self, BootstrapError> {
        let addr = SocketAddr::new(config.listen_ip, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BootstrapError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(BootstrapError::LocalAddr)?;

        info!(peer = %identity.peer_id(), %local_addr, "host listening");

        Ok(Self {
            identity,
            listener,
            local_addr,
            handlers: RwLock::new(HashMap::new()),
            address_book: AddressBook::new(),
            config,
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Bound socket address (with the OS-assigned port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    /// Dialable addresses of this host, each ending in `/p2p/<peer-id>`.
    ///
    /// An unspecified bind address is reported as loopback.
    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        vec![
            Multiaddr::from_socket_addr(SocketAddr::new(ip, self.local_addr.port()))
                .with(Protocol::P2p(self.peer_id())),
        ]
    }

    /// Register the handler for streams negotiated under `protocol`.
    pub fn set_stream_handler(&self, protocol: impl Into<String>, handler: StreamHandler) {
        let protocol = protocol.into();
        debug!(%protocol, "stream handler registered");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(protocol, handler);
    }

    pub fn remove_stream_handler(&self, protocol: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(protocol)
            .is_some()
    }

    /// Protocols with a registered handler, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        protocols.sort();
        protocols
    }

    fn handler(&self, protocol: &str) -> Option<StreamHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(protocol)
            .cloned()
    }

    fn next_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open a stream to `peer` using addresses from the address book.
    pub async fn dial(&self, peer: &PeerId, protocol: &str) -> Result<Connection, DialError> {
        let addrs = self.address_book.addrs(peer);
        if addrs.is_empty() {
            return Err(DialError::NoAddresses(peer.to_string()));
        }

        let (mut stream, remote_addr) = self.connect_any(peer, &addrs).await?;
        let negotiated = negotiate_outbound(
            &mut stream,
            &self.identity,
            protocol,
            Some(peer),
            &self.config.negotiation,
        )
        .await?;

        Ok(Connection {
            id: self.next_id(),
            remote_peer: negotiated.remote_peer,
            remote_addr,
            protocol: negotiated.protocol,
            direction: Direction::Outbound,
            stream,
        })
    }

    async fn connect_any(
        &self,
        peer: &PeerId,
        addrs: &[Multiaddr],
    ) -> Result<(TcpStream, SocketAddr), DialError> {
        let timeout = self.config.connect_timeout;
        let mut last_err = None;
        let mut timed_out = false;

        for addr in addrs {
            let targets = match addr.resolve().await {
                Ok(targets) => targets,
                Err(err) => {
                    debug!(%addr, error = %err, "address did not resolve");
                    last_err = Some(err);
                    continue;
                }
            };
            for target in targets {
                match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
                    Ok(Ok(stream)) => {
                        let _ = stream.set_nodelay(true);
                        return Ok((stream, target));
                    }
                    Ok(Err(err)) => {
                        debug!(%target, error = %err, "connect failed");
                        last_err = Some(err);
                    }
                    Err(_) => {
                        debug!(%target, "connect timed out");
                        timed_out = true;
                    }
                }
            }
        }

        match last_err {
            Some(source) => Err(DialError::Unreachable {
                peer: peer.to_string(),
                source,
            }),
            None if timed_out => Err(DialError::Timeout {
                peer: peer.to_string(),
                timeout,
            }),
            None => Err(DialError::Unreachable {
                peer: peer.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no address resolved"),
            }),
        }
    }

    /// Accept streams until the registry shuts down.
    ///
    /// Each accepted socket is negotiated and handed to its protocol handler on
    /// a new registry task. There is no connection limit. Accept errors (e.g.
    /// out of file descriptors) pause the loop with a doubling delay.
    pub async fn accept_loop(self: Arc<Self>, registry: ConnectionRegistry) {
        let cancel = registry.child_token();
        let mut backoff = AcceptBackoff::default();
        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, remote_addr) = match accepted {
                Ok(accepted) => {
                    backoff.reset();
                    accepted
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(error = %err, ?delay, "accept failed");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };
            let _ = stream.set_nodelay(true);

            let host = Arc::clone(&self);
            let task_registry = registry.clone();
            let span = tracing::info_span!("inbound", %remote_addr);
            registry.spawn(
                async move { host.handle_inbound(stream, remote_addr, task_registry).await }
                    .instrument(span),
            );
        }
        debug!("accept loop stopped");
    }

    async fn handle_inbound(
        &self,
        mut stream: TcpStream,
        remote_addr: SocketAddr,
        registry: ConnectionRegistry,
    ) {
        let supported = self.protocols();
        let negotiated = match negotiate_inbound(
            &mut stream,
            &self.identity,
            &supported,
            &self.config.negotiation,
        )
        .await
        {
            Ok(negotiated) => negotiated,
            Err(err) => {
                warn!(error = %err, "inbound negotiation failed");
                return;
            }
        };

        let Some(handler) = self.handler(&negotiated.protocol) else {
            warn!(protocol = %negotiated.protocol, "handler removed during negotiation");
            return;
        };

        let conn = Connection {
            id: self.next_id(),
            remote_peer: negotiated.remote_peer,
            remote_addr,
            protocol: negotiated.protocol,
            direction: Direction::Inbound,
            stream,
        };
        let _active = registry.register(conn.info());
        handler(conn, registry.child_token()).await;
    }
}

#[derive(Debug)]
struct AcceptBackoff {
    delay: Duration,
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self {
            delay: ACCEPT_BACKOFF_MIN,
        }
    }
}

impl AcceptBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (delay * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.delay = ACCEPT_BACKOFF_MIN;
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("peer_id", &self.peer_id())
            .field("local_addr", &self.local_addr)
            .field("protocols", &self.protocols())
            .finish()
    }
}
