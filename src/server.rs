use crate::config::{ServerConfig, WebSocketConfig};
use crate::connection::{self, ConnState, Connection};
use log::{info, warn};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::TcpListener;

type Callback = dyn Fn(Arc<Connection>) + Send + Sync;

/// The four lifecycle callback slots a registry user can install via `Server::on`. Each
/// starts empty; firing an empty slot is a silent no-op.
#[derive(Default)]
pub(crate) struct Handlers {
    on_connection: StdMutex<Option<Arc<Callback>>>,
    on_message: StdMutex<Option<Arc<Callback>>>,
    on_error: StdMutex<Option<Arc<Callback>>>,
    on_close: StdMutex<Option<Arc<Callback>>>,
}

impl Handlers {
    pub(crate) fn fire_connection(&self, conn: Arc<Connection>) {
        Self::fire(&self.on_connection, conn);
    }

    pub(crate) fn fire_message(&self, conn: Arc<Connection>) {
        Self::fire(&self.on_message, conn);
    }

    pub(crate) fn fire_error(&self, conn: Arc<Connection>) {
        Self::fire(&self.on_error, conn);
    }

    pub(crate) fn fire_close(&self, conn: Arc<Connection>) {
        Self::fire(&self.on_close, conn);
    }

    fn fire(slot: &StdMutex<Option<Arc<Callback>>>, conn: Arc<Connection>) {
        let handler = slot.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(conn);
        }
    }
}

/// The accept loop and connection registry: a listener plus a remote-address-keyed map of
/// the live connections, a set of overwritable lifecycle callbacks, and monotonic
/// connection counters.
pub struct Server {
    listener: TcpListener,
    connections: StdMutex<HashMap<String, Arc<Connection>>>,
    handlers: Handlers,
    web_socket_config: WebSocketConfig,
    current_connections: AtomicUsize,
    peak_connections: AtomicUsize,
}

impl Server {
    /// Binds a listener on `addr` and returns a ready-to-run registry. Does not start
    /// accepting connections; call `run` on the returned `Arc` to do that.
    pub async fn bind(addr: &str, config: Option<ServerConfig>) -> io::Result<Arc<Server>> {
        let listener = TcpListener::bind(addr).await?;
        let web_socket_config = config
            .and_then(|c| c.web_socket_config)
            .unwrap_or_default();

        Ok(Arc::new(Server {
            listener,
            connections: StdMutex::new(HashMap::new()),
            handlers: Handlers::default(),
            web_socket_config,
            current_connections: AtomicUsize::new(0),
            peak_connections: AtomicUsize::new(0),
        }))
    }

    /// Installs or replaces the handler for `event`. Returns `false` for any name other
    /// than `connection`, `message`, `error`, or `close`, leaving the registry untouched.
    pub fn on(&self, event: &str, handler: impl Fn(Arc<Connection>) + Send + Sync + 'static) -> bool {
        let handler: Arc<Callback> = Arc::new(handler);
        let slot = match event {
            "connection" => &self.handlers.on_connection,
            "message" => &self.handlers.on_message,
            "error" => &self.handlers.on_error,
            "close" => &self.handlers.on_close,
            _ => return false,
        };
        *slot.lock().unwrap() = Some(handler);
        true
    }

    /// Runs the accept loop forever, spawning one independent task per accepted transport.
    /// Never returns under normal operation; a transient accept error is logged and
    /// retried rather than ending the loop.
    pub async fn run(self: Arc<Self>) {
        info!("accepting connections");
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("accepted connection from {addr}");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        connection::run(stream, server).await;
                    });
                }
                Err(err) => {
                    warn!("accept failed: {err}");
                }
            }
        }
    }

    /// The address the listener is actually bound to — useful when binding to port 0.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub(crate) fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub(crate) fn web_socket_config(&self) -> WebSocketConfig {
        self.web_socket_config.clone()
    }

    pub(crate) fn add_conn(&self, peer_addr: String, conn: Arc<Connection>) {
        self.connections.lock().unwrap().insert(peer_addr, conn);
        let current = self.current_connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_connections.fetch_max(current, Ordering::SeqCst);
    }

    pub(crate) fn remove_conn(&self, peer_addr: &str) {
        if self.connections.lock().unwrap().remove(peer_addr).is_some() {
            self.current_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn current_connections(&self) -> usize {
        self.current_connections.load(Ordering::SeqCst)
    }

    pub fn peak_connections(&self) -> usize {
        self.peak_connections.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().unwrap().values().cloned().collect()
    }

    /// Sends `payload` as a Text frame to every currently `Open` connection.
    pub async fn broadcast(&self, payload: &[u8]) {
        self.broadcast_only(payload, |_| true).await;
    }

    /// Sends `payload` to every `Open` connection except `exclude`.
    pub async fn broadcast_to_others(&self, payload: &[u8], exclude: &Connection) {
        self.broadcast_except(payload, |c| c.peer_addr() == exclude.peer_addr())
            .await;
    }

    /// Sends `payload` to every `Open` connection for which `predicate` returns `true`.
    /// Connections still `Handshaking` or already `Closed` are never written to.
    pub async fn broadcast_only(&self, payload: &[u8], predicate: impl Fn(&Connection) -> bool) {
        for conn in self.snapshot() {
            if conn.state() == ConnState::Open && predicate(&conn) {
                if let Err(err) = conn.send(payload).await {
                    warn!("broadcast send to {} failed: {err}", conn.peer_addr());
                }
            }
        }
    }

    /// Sends `payload` to connections for which `predicate` returns `false`.
    pub async fn broadcast_except(&self, payload: &[u8], predicate: impl Fn(&Connection) -> bool) {
        self.broadcast_only(payload, |c| !predicate(c)).await;
    }
}
