//! Listener lifecycle and connection handling

use crate::accumulator::Accumulator;
use crate::admission::AdmissionController;
use crate::config::WriteListenerConfig;
use crate::error::{ListenerError, Result};
use crate::router;
use crate::state::{cancelled, system_clock, Clock, ListenerState};
use crate::tls;
use hyper::server::conn::Http;
use hyper::service::service_fn;
use parking_lot::Mutex;
use selfstat::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Back-off after a failed `accept`, e.g. when out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP write endpoint
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use selfstat::Registry;
/// use torq_write_listener::{ChannelAccumulator, WriteListener, WriteListenerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let (accumulator, mut deliveries) = ChannelAccumulator::new(1024);
/// let listener = WriteListener::new(
///     WriteListenerConfig::default(),
///     Arc::new(Registry::new()),
///     Arc::new(accumulator),
/// );
/// let addr = listener.start().await?;
/// println!("listening on {}", addr);
///
/// while let Some(delivery) = deliveries.recv().await {
///     println!("{}", delivery.accept());
/// }
/// listener.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct WriteListener {
    config: WriteListenerConfig,
    registry: Arc<Registry>,
    admission: Arc<AdmissionController>,
    accumulator: Arc<dyn Accumulator>,
    clock: Clock,
    running: Mutex<Option<Running>>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    state: Arc<ListenerState>,
}

impl WriteListener {
    pub fn new(
        config: WriteListenerConfig,
        registry: Arc<Registry>,
        accumulator: Arc<dyn Accumulator>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(config.max_undelivered_metrics));
        Self {
            config,
            registry,
            admission,
            accumulator,
            clock: system_clock(),
            running: Mutex::new(None),
        }
    }

    /// Replace the clock used to timestamp records without a timestamp
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WriteListenerConfig {
        &self.config
    }

    /// Admission state; outlives the listener so late acknowledgements stay valid
    pub fn admission(&self) -> Arc<AdmissionController> {
        Arc::clone(&self.admission)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Bind and start serving in the background
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(ListenerError::AlreadyStarted);
        }

        self.config.validate()?;
        let acceptor = tls::acceptor(&self.config)?;

        let listener = TcpListener::bind(&self.config.service_address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: self.config.service_address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ListenerState::new(
            self.config.clone(),
            &self.registry,
            Arc::clone(&self.admission),
            Arc::clone(&self.accumulator),
            Arc::clone(&self.clock),
            shutdown_rx,
        ));

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ListenerError::AlreadyStarted);
        }

        let accept_task = tokio::spawn(accept_loop(listener, acceptor.clone(), Arc::clone(&state)));
        *running = Some(Running {
            local_addr,
            shutdown,
            accept_task,
            state,
        });

        info!(
            "Write listener started on {}://{}",
            if acceptor.is_some() { "https" } else { "http" },
            local_addr
        );
        Ok(local_addr)
    }

    /// Stop accepting, let in-flight connections finish within the shutdown timeout
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        info!("Stopping write listener on {}", running.local_addr);
        running.shutdown.send_replace(true);

        if let Err(e) = running.accept_task.await {
            error!("Write listener serve loop failed: {}", e);
        }

        let stats = &running.state.stats;
        info!(
            requests_served = stats.requests_served.get(),
            pending = self.admission.pending(),
            "Write listener stopped"
        );
    }
}

impl Drop for WriteListener {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.send_replace(true);
        }
    }
}

async fn accept_loop(listener: TcpListener, acceptor: Option<TlsAcceptor>, state: Arc<ListenerState>) {
    let mut shutdown = state.shutdown_signal();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancelled(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    connections.spawn(serve_connection(stream, peer, acceptor.clone(), Arc::clone(&state)));
                }
                Err(e) => {
                    warn!("Write listener accept error: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(result) = connections.join_next(), if !connections.is_empty() => {
                log_connection_result(result);
            }
        }
    }
    drop(listener);

    let deadline = state.config.shutdown_timeout();
    let drained = tokio::time::timeout(deadline, async {
        while let Some(result) = connections.join_next().await {
            log_connection_result(result);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "Aborting connections still open after {:?}", deadline
        );
        connections.shutdown().await;
    }
}

fn log_connection_result(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Connection task panicked: {}", e);
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    state: Arc<ListenerState>,
) {
    let Some(acceptor) = acceptor else {
        drive_connection(stream, peer, state).await;
        return;
    };

    let mut shutdown = state.shutdown_signal();
    let handshake = tokio::time::timeout(state.config.read_timeout(), acceptor.accept(stream));
    let accepted = tokio::select! {
        _ = cancelled(&mut shutdown) => return,
        accepted = handshake => accepted,
    };

    match accepted {
        Ok(Ok(stream)) => drive_connection(stream, peer, state).await,
        Ok(Err(e)) => debug!(%peer, "TLS handshake failed: {}", e),
        Err(_) => debug!(%peer, "TLS handshake timed out"),
    }
}

async fn drive_connection<S>(io: S, peer: SocketAddr, state: Arc<ListenerState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut shutdown = state.shutdown_signal();
    let service = {
        let state = Arc::clone(&state);
        service_fn(move |req| router::route(req, Arc::clone(&state)))
    };

    let connection = Http::new()
        .http1_only(true)
        .http1_keep_alive(true)
        .serve_connection(io, service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!(%peer, "Connection error: {}", e);
            }
            return;
        }
        _ = cancelled(&mut shutdown) => {
            connection.as_mut().graceful_shutdown();
        }
    }

    if let Err(e) = connection.await {
        debug!(%peer, "Connection error during shutdown: {}", e);
    }
}
