use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use shardlink_engine::EngineGateway;
use shardlink_frame::Frame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::addr::Multiaddr;
use crate::error::DialError;
use crate::host::{Connection, Host};
use crate::identity::PeerId;
use crate::reader::{run_reader, ReaderConfig};
use crate::registry::ConnectionRegistry;
use crate::writer::{run_writer, FrameCounter, WriterCloseReason, WriterReport};
use crate::PROTOCOL_ID;

/// Default time to wait for connection tasks on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Per-node settings for the stream loops.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub reader: ReaderConfig,
    pub shutdown_grace: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// A host wired to an engine: inbound streams feed the engine, outbound
/// streams carry frames from a channel.
pub struct Node<G: EngineGateway> {
    host: Arc<Host>,
    gateway: Arc<G>,
    registry: ConnectionRegistry,
    config: NodeConfig,
}

impl<G: EngineGateway> Node<G> {
    pub fn new(host: Host, gateway: Arc<G>, config: NodeConfig) -> Self {
        Self {
            host: Arc::new(host),
            gateway,
            registry: ConnectionRegistry::new(),
            config,
        }
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Serve the block protocol and start accepting streams.
    ///
    /// Each inbound stream gets its own reader task and engine session.
    /// Returns the addresses a dialer can use. Call once per node.
    pub fn listen(&self) -> Vec<Multiaddr> {
        let gateway = Arc::clone(&self.gateway);
        let reader_config = self.config.reader.clone();
        self.host.set_stream_handler(
            PROTOCOL_ID,
            Arc::new(move |conn: Connection, cancel: CancellationToken| {
                let gateway = Arc::clone(&gateway);
                let reader_config = reader_config.clone();
                let span = tracing::info_span!("reader", conn = conn.id(), peer = %conn.remote_peer());
                async move {
                    info!("stream opened");
                    run_reader(conn.into_stream(), gateway, &reader_config, cancel).await;
                }
                .instrument(span)
                .boxed()
            }),
        );

        self.registry
            .spawn(Arc::clone(&self.host).accept_loop(self.registry.clone()));

        let addrs = self.host.listen_addrs();
        info!(peer = %self.host.peer_id(), "node ready");
        for addr in &addrs {
            info!("start a block generator with `shardlink -d {addr}`");
        }
        addrs
    }

    /// Open a block stream to `dest` and send every frame from `frames`.
    ///
    /// `dest` must end in `/p2p/<peer-id>`. The writer runs on a registry
    /// task; the returned handle reports how it finished.
    pub async fn dial(
        &self,
        dest: &str,
        frames: mpsc::Receiver<Frame>,
    ) -> Result<DialHandle, DialError> {
        let addr: Multiaddr = dest.parse()?;
        let peer = addr.peer_id().ok_or(DialError::MissingPeerId)?;
        self.host.address_book().add_addrs(peer, [addr]);

        let conn = self.host.dial(&peer, PROTOCOL_ID).await?;
        info!(conn = conn.id(), %peer, remote = %conn.remote_addr(), "stream opened");

        let active = self.registry.register(conn.info());
        let counter = FrameCounter::new();
        let cancel = self.registry.child_token();
        let span = tracing::info_span!("writer", conn = conn.id(), %peer);
        let task = self.registry.spawn(
            {
                let counter = counter.clone();
                async move {
                    let _active = active;
                    run_writer(conn.into_stream(), frames, counter, cancel).await
                }
            }
            .instrument(span),
        );

        Ok(DialHandle {
            remote_peer: peer,
            counter,
            task,
        })
    }

    /// Interrupt the engine, cancel all streams and wait for their tasks, up to
    /// the shutdown grace.
    ///
    /// Returns `true` when every task finished in time.
    pub async fn shutdown(&self) -> bool {
        self.gateway.interrupt();
        self.registry.shutdown(self.config.shutdown_grace).await
    }
}

impl<G: EngineGateway> std::fmt::Debug for Node<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("host", &self.host)
            .field("connections", &self.registry.active_count())
            .finish()
    }
}

/// A running outbound block stream.
#[derive(Debug)]
pub struct DialHandle {
    remote_peer: PeerId,
    counter: FrameCounter,
    task: JoinHandle<WriterReport>,
}

impl DialHandle {
    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    /// Frames flushed so far.
    pub fn frames_sent(&self) -> u64 {
        self.counter.get()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the writer to finish.
    pub async fn join(self) -> WriterReport {
        match self.task.await {
            Ok(report) => report,
            Err(_) => WriterReport {
                frames_sent: self.counter.get(),
                reason: WriterCloseReason::Aborted,
            },
        }
    }
}
