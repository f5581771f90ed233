use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::amqp_client::LapinTransport;
use super::broker_config::BrokerConfig;
use super::channel_manager::ChannelManager;
use super::delivery::DeliveryHandler;
use super::errors::Result;
use super::options::{ConsumeOptions, ExchangeOptions, QueueOptions};
use super::state::ConnectionState;
use super::topology::Topology;
use super::transport::Transport;

/// Reconnecting RabbitMQ client.
///
/// Register producers and consumers, then [`connect`](Self::connect). The
/// client keeps one connection with one channel; when the broker drops it,
/// the whole topology is declared again and every consumer restarted.
/// Cloning shares the same client.
#[derive(Clone)]
pub struct RabbitMQClient {
    pub(crate) inner: Arc<ClientInner>,
}

/// The session currently serving publishes and consumers.
pub(crate) struct LiveSession {
    pub(crate) channel: ChannelManager,
    /// Cancels this session's pumps; child of the shutdown token.
    pub(crate) token: CancellationToken,
    pub(crate) task: JoinHandle<()>,
}

pub(crate) struct ClientInner {
    pub(crate) config: BrokerConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) topology: RwLock<Topology>,
    pub(crate) state: watch::Sender<ConnectionState>,
    /// Serializes connect attempts.
    pub(crate) reconnect_guard: tokio::sync::Mutex<()>,
    /// Serializes the declare/bind/consume sequence of each consumer.
    pub(crate) consume_guard: tokio::sync::Mutex<()>,
    pub(crate) current: Mutex<Option<LiveSession>>,
    pub(crate) shutdown: CancellationToken,
    /// Completion counter for every pump task ever started.
    pub(crate) pumps: TaskTracker,
    pub(crate) supervisor: Mutex<Option<JoinHandle<()>>>,
    pub(crate) sessions: AtomicU64,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClientInner {
    pub(crate) fn topology_snapshot(&self) -> Topology {
        self.topology
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Moves to `next` unless a close has already begun.
    pub(crate) fn set_state(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        })
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.sessions.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl RabbitMQClient {
    /// Client over the lapin transport.
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_transport(config, Arc::new(LapinTransport))
    }

    pub fn with_transport(config: BrokerConfig, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                topology: RwLock::new(Topology::new()),
                state,
                reconnect_guard: tokio::sync::Mutex::new(()),
                consume_guard: tokio::sync::Mutex::new(()),
                current: Mutex::new(None),
                shutdown: CancellationToken::new(),
                pumps: TaskTracker::new(),
                supervisor: Mutex::new(None),
                sessions: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Declares `exchange` on every connect. Takes effect from the next
    /// connect cycle when called on a live client.
    pub fn add_producer(&self, exchange: &str, options: ExchangeOptions) -> Result<()> {
        self.inner
            .topology
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_producer(exchange, options)
    }

    /// Binds `queue` to `exchange` with `routing_key` and feeds its deliveries
    /// to `handler`. Takes effect from the next connect cycle when called on a
    /// live client.
    pub fn add_consumer<H>(
        &self,
        exchange: &str,
        routing_key: &str,
        handler: H,
        queue: QueueOptions,
        consume: ConsumeOptions,
    ) -> Result<()>
    where
        H: DeliveryHandler,
    {
        self.inner
            .topology
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_consumer(exchange, routing_key, Arc::new(handler), queue, consume)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Resolves once the client reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut states = self.inner.state.subscribe();
        let _ = states.wait_for(|state| *state == target).await;
    }

    /// Pump tasks still running, across all sessions.
    pub fn active_pump_tasks(&self) -> usize {
        self.inner.pumps.len()
    }

    /// Sessions opened so far, counting the first one.
    pub fn session_count(&self) -> u64 {
        self.inner.sessions.load(Ordering::SeqCst)
    }
}
