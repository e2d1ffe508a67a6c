//! WebSocket transport server.
//!
//! Accepts upgrades on any path. Each connection gets a socket task (the
//! sole reader and writer for that socket), a fresh App from the
//! factory, and a dedicated worker pool for handler execution. Worker
//! threads hand finished packets back to the socket task over an
//! unbounded mailbox, which serializes replies per socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use wsrpc_protocol::Packet;
use wsrpc_server::{process, App, AppFactory, ScheduledTask, WorkerPool};

/// Maximum inbound message size.
const MAX_PAYLOAD: usize = 10 * 1024 * 1024;
/// Maximum buffered outbound bytes before sends report backpressure.
const MAX_BACKPRESSURE: usize = 100 * 1024 * 1024;
/// A socket that produced no inbound frame for this long is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Keepalive ping period; pongs count as inbound traffic.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime options, normally filled in by the CLI.
#[derive(Debug, Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    /// Grace period with zero connections before the server exits.
    pub timeout_secs: u64,
    /// Worker threads per connection.
    pub threads_num: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            timeout_secs: 60,
            threads_num: WorkerPool::default_threads(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("unavailable on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct ServerState {
    factory: AppFactory,
    options: Options,
    open_count: AtomicUsize,
    shutdown: ScheduledTask,
    /// Serializes count transitions against timer arm/cancel, so a close
    /// racing an open can never leave the timer armed with sockets live.
    lifecycle: Mutex<()>,
}

/// The wsrpc server. Construct with an App factory, then `serve`.
pub struct Server {
    factory: AppFactory,
}

impl Server {
    pub fn new(factory: AppFactory) -> Self {
        Self { factory }
    }

    /// A server whose connections get the stock App (echo only).
    pub fn with_default_app() -> Self {
        Self::new(Arc::new(App::default))
    }

    /// Bind the listening socket and arm the idle-shutdown timer.
    /// Splitting this from [`Bound::run`] exposes the bound address when
    /// the options request port 0.
    pub async fn bind(&self, options: Options) -> Result<Bound, ServeError> {
        let addr = format!("{}:{}", options.host, options.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Unavailable on {addr}: {e}");
                return Err(ServeError::Bind { addr, source: e });
            }
        };
        info!("Listening on {}", listener.local_addr()?);

        let token = CancellationToken::new();
        let shutdown = ScheduledTask::new("exit", {
            let token = token.clone();
            move || {
                info!("Exiting...");
                token.cancel();
            }
        });
        // Arm immediately so a server that never sees a connection still
        // exits after the grace period.
        info!("Exiting in {} seconds...", options.timeout_secs);
        shutdown.schedule(Duration::from_secs(options.timeout_secs));

        let state = Arc::new(ServerState {
            factory: self.factory.clone(),
            options,
            open_count: AtomicUsize::new(0),
            shutdown,
            lifecycle: Mutex::new(()),
        });
        Ok(Bound {
            listener,
            state,
            token,
        })
    }

    /// Run until the idle-shutdown timer fires. Single-shot.
    pub async fn serve(&self, options: Options) -> Result<(), ServeError> {
        self.bind(options).await?.run().await
    }
}

/// A bound, not-yet-serving server.
pub struct Bound {
    listener: TcpListener,
    state: Arc<ServerState>,
    token: CancellationToken,
}

impl Bound {
    pub fn local_addr(&self) -> Result<SocketAddr, ServeError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), ServeError> {
        let router = Router::new()
            .fallback(ws_upgrade)
            .with_state(self.state.clone());
        axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.token.cancelled_owned())
        .await?;
        info!("Exited");
        Ok(())
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_PAYLOAD)
        .max_write_buffer_size(MAX_BACKPRESSURE)
        .on_upgrade(move |socket| handle_socket(socket, peer, state))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: Arc<ServerState>) {
    info!("Socket opened");
    info!("Remote at {peer}");
    {
        let _guard = state.lifecycle.lock();
        state.open_count.fetch_add(1, Ordering::SeqCst);
        state.shutdown.cancel();
    }

    debug!("Building data for socket...");
    let pool = WorkerPool::new(state.options.threads_num);
    let app = Arc::new((state.factory)());
    let closed = Arc::new(AtomicBool::new(false));

    // The defer mailbox: worker threads push packets, the socket task is
    // the single consumer and the only writer to the sink, so replies go
    // out in completion order.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Packet>();
    let (mut sink, mut stream) = socket.split();

    let mut keepalive = tokio::time::interval(PING_INTERVAL);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await; // the first tick is immediate
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        trace!("Message received: {text}");
                        last_inbound = Instant::now();
                        let app = app.clone();
                        let closed = closed.clone();
                        let reply_tx = reply_tx.clone();
                        let text = text.to_string();
                        pool.submit(move || {
                            if closed.load(Ordering::SeqCst) {
                                return;
                            }
                            let packet = process(&app, &text);
                            trace!(
                                "Response +{} generated: {}",
                                packet.attachments.len(),
                                packet.json
                            );
                            let _ = reply_tx.send(packet);
                        });
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_inbound = Instant::now();
                        error!("Binary message received but not supported");
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        // The library answers with a pong itself.
                        trace!("Message ping received: {payload:?}");
                        last_inbound = Instant::now();
                    }
                    Some(Ok(Message::Pong(payload))) => {
                        trace!("Message pong received: {payload:?}");
                        last_inbound = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Socket closed: {frame:?}");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Socket error: {e}");
                        break;
                    }
                    None => break,
                }
            }
            Some(packet) = reply_rx.recv() => {
                reply(&mut sink, packet).await;
            }
            _ = keepalive.tick() => {
                if last_inbound.elapsed() >= IDLE_TIMEOUT {
                    info!("Socket idle for {IDLE_TIMEOUT:?}, closing");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    warn!("Message dropped: {e}");
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    debug!("Destroying data for socket...");
    // purge → wait → drop; blocking, so off the runtime.
    let _ = tokio::task::spawn_blocking(move || {
        debug!("Stopping pool with tasks: {}...", pool.tasks_total());
        pool.purge();
        pool.wait();
        drop(pool);
    })
    .await;
    drop(app);

    let _guard = state.lifecycle.lock();
    if state.open_count.fetch_sub(1, Ordering::SeqCst) == 1 {
        info!("Exiting in {} seconds...", state.options.timeout_secs);
        state
            .shutdown
            .schedule(Duration::from_secs(state.options.timeout_secs));
    }
}

/// Send one packet: attachments as binary frames in reverse order, then
/// the response text frame that terminates the attachment run. A failed
/// send is logged and skipped; backpressure never severs the connection.
async fn reply(sink: &mut SplitSink<WebSocket, Message>, packet: Packet) {
    let Packet { json, attachments } = packet;
    for attachment in attachments.into_iter().rev() {
        if let Err(e) = sink.send(Message::Binary(attachment.into())).await {
            warn!("Message dropped: {e}");
        }
    }
    if let Err(e) = sink.send(Message::Text(json.into())).await {
        warn!("Message dropped: {e}");
    }
}
