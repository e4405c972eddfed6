use crate::codec;
use crate::error::Error;
use crate::frame::OpCode;
use crate::handshake;
use crate::server::Server;
use log::{debug, error, warn};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Handshaking,
    Open,
    Closed,
}

/// A single peer's connection: owns the write half of the socket, the most recently
/// delivered message and last error (both readable from inside the matching callback),
/// and a non-owning back-reference to the registry that created it.
pub struct Connection {
    peer_addr: String,
    write_half: TokioMutex<WriteHalf<TcpStream>>,
    last_message: StdMutex<Vec<u8>>,
    last_error: StdMutex<Option<String>>,
    state: StdMutex<ConnState>,
    server: Weak<Server>,
}

impl Connection {
    fn new(peer_addr: String, write_half: WriteHalf<TcpStream>, server: Weak<Server>) -> Self {
        Self {
            peer_addr,
            write_half: TokioMutex::new(write_half),
            last_message: StdMutex::new(Vec::new()),
            last_error: StdMutex::new(None),
            state: StdMutex::new(ConnState::Handshaking),
            server,
        }
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ConnState) {
        *self.state.lock().unwrap() = state;
    }

    /// Sends `payload` as a Text frame.
    pub async fn send(&self, payload: &[u8]) -> Result<(), Error> {
        self.write_raw(&codec::encode_text(payload)).await
    }

    /// Sends `payload` as a Binary frame.
    pub async fn send_binary(&self, payload: &[u8]) -> Result<(), Error> {
        self.write_raw(&codec::encode_binary(payload)).await
    }

    /// The most recently delivered message payload. Only meaningful when called from
    /// inside an `on_message` callback.
    pub fn get_data(&self) -> Vec<u8> {
        self.last_message.lock().unwrap().clone()
    }

    /// The last error observed on this connection. Only meaningful when called from
    /// inside an `on_error` callback.
    pub fn get_err(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    /// A back-reference to the registry that owns this connection, if it is still alive.
    pub fn get_server(&self) -> Option<Arc<Server>> {
        self.server.upgrade()
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), Error> {
        // `write_all` itself loops on short writes; no further retry escalation is needed.
        self.write_half.lock().await.write_all(bytes).await?;
        Ok(())
    }
}

/// Drives one accepted transport through the handshake and then the message loop until
/// exactly one transition to `Closed` occurs. Registry removal and transport shutdown
/// happen exactly once, regardless of which exit path is taken.
pub(crate) async fn run(stream: TcpStream, server: Arc<Server>) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(err) => {
            warn!("could not read peer address, dropping connection: {err}");
            return;
        }
    };

    let (read_half, write_half): (ReadHalf<TcpStream>, WriteHalf<TcpStream>) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let conn = Arc::new(Connection::new(peer_addr.clone(), write_half, Arc::downgrade(&server)));
    server.add_conn(peer_addr.clone(), Arc::clone(&conn));

    let handshake_result = {
        let mut writer = conn.write_half.lock().await;
        handshake::perform_handshake(&mut reader, &mut *writer).await
    };

    if let Err(err) = handshake_result {
        debug!("handshake failed for {peer_addr}: {err}");
        server.remove_conn(&peer_addr);
        return;
    }

    conn.set_state(ConnState::Open);
    server.handlers().fire_connection(Arc::clone(&conn));

    let config = server.web_socket_config();
    let closed_cleanly = run_message_loop(&mut reader, &server, &conn, &config).await;
    conn.set_state(ConnState::Closed);

    server.remove_conn(&peer_addr);
    let mut writer = conn.write_half.lock().await;
    let _ = writer.shutdown().await;
    drop(writer);

    if !closed_cleanly {
        error!("connection {peer_addr} torn down after a protocol/transport error");
    }
}

/// Returns `true` if the loop ended because of a peer Close frame, `false` if it ended
/// because of a decode/transport error.
async fn run_message_loop<R>(
    reader: &mut BufReader<R>,
    server: &Arc<Server>,
    conn: &Arc<Connection>,
    config: &crate::config::WebSocketConfig,
) -> bool
where
    R: tokio::io::AsyncRead + Unpin,
{
    let max_frame_size = config.max_frame_size.unwrap_or(16 << 20);
    let max_message_size = config.max_message_size.unwrap_or(64 << 20);

    loop {
        match codec::decode_message(reader, max_frame_size, max_message_size).await {
            Ok((OpCode::Close, _)) => {
                let _ = conn.write_raw(&codec::encode_close(&[])).await;
                server.handlers().fire_close(Arc::clone(conn));
                return true;
            }
            Ok((OpCode::Ping, payload)) => {
                if let Err(err) = conn.write_raw(&codec::encode_pong(&payload)).await {
                    *conn.last_error.lock().unwrap() = Some(err.to_string());
                    server.handlers().fire_error(Arc::clone(conn));
                    return false;
                }
            }
            Ok((OpCode::Pong, _)) => {
                // Unsolicited pongs are absorbed silently; this core never sends pings.
            }
            Ok((OpCode::Text, payload)) | Ok((OpCode::Binary, payload)) => {
                *conn.last_message.lock().unwrap() = payload;
                server.handlers().fire_message(Arc::clone(conn));
            }
            Ok((OpCode::Continuation, _)) => {
                unreachable!("decode_message never returns a bare Continuation opcode")
            }
            Err(err) => {
                *conn.last_error.lock().unwrap() = Some(err.to_string());
                server.handlers().fire_error(Arc::clone(conn));
                return false;
            }
        }
    }
}
