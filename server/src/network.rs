//! Server network layer: TCP acceptor, per-connection pumps and the main loop
//!
//! Every socket gets two pumps. The inbound pump forwards raw bytes to the
//! main loop as [`ServerMessage::Received`]; the outbound pump drains the
//! session's [`Outbox`] onto the socket. The main loop is the only task that
//! touches [`Game`], so handlers never lock anything.

use crate::client_manager::{Outbox, Outgoing, SlotPool};
use crate::config::ServerConfig;
use crate::game::Game;
use crate::handlers::build_registry;
use crate::protocol::PacketRegistry;
use log::{debug, error, info, warn};
use shared::SessionId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Bytes read from a socket per call
const READ_BUFFER_SIZE: usize = 4096;

/// How long shutdown waits for connections to flush their goodbyes
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        session: SessionId,
        addr: SocketAddr,
        outbox: Outbox,
    },
    Received {
        session: SessionId,
        data: Vec<u8>,
    },
    Disconnected {
        session: SessionId,
    },
    Shutdown,
}

/// Main server coordinating connections and the world tick
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    game: Game,
    registry: PacketRegistry<Game>,
    slots: Arc<Mutex<SlotPool>>,
    tick_duration: Duration,
    acceptor: Option<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.address).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let slots = Arc::new(Mutex::new(SlotPool::new(config.max_connections)));
        let tick_duration = config.tick_duration();
        let game = Game::new(config)?;

        Ok(Server {
            listener: Some(listener),
            local_addr,
            game,
            registry: build_registry(),
            slots,
            tick_duration,
            acceptor: None,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender that lets another task stop the server with [`ServerMessage::Shutdown`]
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Spawns task that accepts sockets and hands each one a slot
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let slots = Arc::clone(&self.slots);
        let server_tx = self.server_tx.clone();

        self.acceptor = Some(tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };

                let Some(session) = slots.lock().await.acquire() else {
                    warn!("Server full, dropping connection from {}", addr);
                    continue;
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not disable Nagle for {}: {}", addr, e);
                }

                let (outbox, outbox_rx) = mpsc::unbounded_channel();
                if server_tx
                    .send(ServerMessage::Connected {
                        session,
                        addr,
                        outbox,
                    })
                    .is_err()
                {
                    break;
                }
                tokio::spawn(run_connection(stream, session, outbox_rx, server_tx.clone()));
            }
        }));
    }

    /// Main server loop: applies network events and advances the world
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => break,
                        Some(message) => self.handle_message(message).await,
                    }
                }

                _ = tick_interval.tick() => {
                    self.game.tick();
                    ticks += 1;
                    if ticks % 600 == 0 {
                        debug!(
                            "Tick {}: {} sessions, {} players",
                            ticks,
                            self.game.clients.len(),
                            self.game.world.player_count()
                        );
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected {
                session,
                addr,
                outbox,
            } => {
                self.game.connect(session, addr, outbox);
            }
            ServerMessage::Received { session, data } => {
                self.game.receive(&self.registry, session, &data);
            }
            ServerMessage::Disconnected { session } => {
                self.game.disconnect(session);
                self.slots.lock().await.release(session);
            }
            ServerMessage::Shutdown => {}
        }
    }

    /// Saves everyone, says goodbye and waits briefly for the pumps to finish
    async fn shutdown(&mut self) {
        info!("Shutting down");
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        self.game.shutdown().await;

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while !self.game.clients.is_empty() {
                match self.server_rx.recv().await {
                    Some(ServerMessage::Disconnected { session }) => {
                        self.game.disconnect(session);
                        self.slots.lock().await.release(session);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} connections did not close in time",
                self.game.clients.len()
            );
        }
        info!("Server stopped");
    }
}

/// Pumps one socket until either side closes, then reports the disconnect
async fn run_connection(
    stream: TcpStream,
    session: SessionId,
    mut outbox_rx: mpsc::UnboundedReceiver<Outgoing>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let (mut reader, mut writer) = stream.into_split();

    let inbound = async {
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(len) => {
                    let data = buffer[..len].to_vec();
                    if server_tx
                        .send(ServerMessage::Received { session, data })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Read error on session {}: {}", session, e);
                    break;
                }
            }
        }
    };

    let outbound = async {
        while let Some(item) = outbox_rx.recv().await {
            match item {
                Outgoing::Frame(frame) => {
                    if let Err(e) = writer.write_all(&frame).await {
                        debug!("Write error on session {}: {}", session, e);
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    };

    tokio::select! {
        _ = inbound => {}
        _ = outbound => {}
    }

    if let Err(e) = server_tx.send(ServerMessage::Disconnected { session }) {
        error!("Failed to report disconnect of session {}: {}", session, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::packets::{encode_frame, unescape, PingRequest, PongCommand};
    use shared::{Packet, PacketReader, DELIMITER};
    use tokio_test::assert_ok;

    fn test_config() -> ServerConfig {
        ServerConfig {
            address: "127.0.0.1:0".to_string(),
            max_connections: 1,
            seed: Some(1),
            ..ServerConfig::default()
        }
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut frame = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == DELIMITER {
                return unescape(&frame).unwrap();
            }
            frame.push(byte[0]);
        }
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = assert_ok!(Server::new(test_config()).await);
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.game().clients.is_empty());
    }

    #[tokio::test]
    async fn test_ping_round_trip_and_shutdown() {
        let mut server = assert_ok!(Server::new(test_config()).await);
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let running = tokio::spawn(async move { server.run().await.map_err(|e| e.to_string()) });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&encode_frame(&PingRequest { timestamp: 77 }))
            .await
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut stream))
            .await
            .unwrap();
        let mut reader = PacketReader::new(&body);
        assert_eq!(reader.read_string().unwrap(), PongCommand::ID);
        assert_eq!(PongCommand::read(&mut reader).unwrap().timestamp, 77);

        assert_ok!(shutdown.send(ServerMessage::Shutdown));
        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_full_server_drops_extra_connection() {
        let mut server = assert_ok!(Server::new(test_config()).await);
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let running = tokio::spawn(async move { server.run().await.map_err(|e| e.to_string()) });

        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(&encode_frame(&PingRequest { timestamp: 1 }))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), read_frame(&mut first))
            .await
            .unwrap();

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buffer = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buffer))
            .await
            .unwrap();
        // Dropped without a slot: end of stream or a reset
        assert!(matches!(read, Ok(0) | Err(_)));

        shutdown.send(ServerMessage::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
