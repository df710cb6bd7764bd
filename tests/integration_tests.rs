//! Integration tests for the server over real TCP connections
//!
//! Each test starts a server on an ephemeral port and drives it with plain
//! sockets speaking the framed protocol.

use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
use shared::packets::{
    decode_body, drain_frames, encode_frame, AlertCommand, CharacterListCommand, ChatCommand,
    ChatRequest, CreateCharacterRequest, JoinMapCommand, LoginOkCommand, LoginRequest,
    LogoutRequest, PingRequest, PlayerDataCommand, PongCommand, RegisterRequest,
    SpawnPlayerCommand, UseCharacterRequest,
};
use shared::{ChatChannel, Job, Packet, PROTOCOL_VERSION};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(5);

struct TestClient {
    stream: TcpStream,
    buffer: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = assert_ok!(TcpStream::connect(addr).await);
        Self {
            stream,
            buffer: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    async fn send<P: Packet>(&mut self, packet: &P) {
        assert_ok!(self.stream.write_all(&encode_frame(packet)).await);
    }

    /// Next frame body, or `None` once the server closed the socket
    async fn next_body(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(body) = self.pending.pop_front() {
                return Some(body);
            }
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return None,
                Ok(len) => {
                    self.buffer.extend_from_slice(&chunk[..len]);
                    for body in drain_frames(&mut self.buffer) {
                        self.pending.push_back(body.unwrap());
                    }
                }
            }
        }
    }

    /// Skips frames until a `P` matching `accept` arrives
    async fn expect_where<P: Packet>(&mut self, accept: impl Fn(&P) -> bool) -> P {
        let wait = async {
            loop {
                let body = self
                    .next_body()
                    .await
                    .unwrap_or_else(|| panic!("connection closed before {}", P::ID));
                if let Some(packet) = decode_body::<P>(&body).unwrap() {
                    if accept(&packet) {
                        return packet;
                    }
                }
            }
        };
        timeout(WAIT, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", P::ID))
    }

    async fn expect<P: Packet>(&mut self) -> P {
        self.expect_where(|_: &P| true).await
    }

    /// Registers, logs in, creates `character` and enters the game with it
    async fn play(&mut self, account: &str, character: &str) -> PlayerDataCommand {
        self.send(&RegisterRequest {
            name: account.to_string(),
            password: "hunter22".to_string(),
        })
        .await;
        self.login(account).await;
        self.expect::<CharacterListCommand>().await;
        self.send(&CreateCharacterRequest {
            name: character.to_string(),
            job: Job::Mage,
            sprite: 4,
        })
        .await;
        self.expect_where(|list: &CharacterListCommand| {
            list.characters.iter().any(|c| c.name == character)
        })
        .await;
        self.send(&UseCharacterRequest {
            name: character.to_string(),
        })
        .await;
        self.expect::<JoinMapCommand>().await;
        self.expect::<PlayerDataCommand>().await
    }

    async fn login(&mut self, account: &str) -> LoginOkCommand {
        self.send(&LoginRequest {
            name: account.to_string(),
            password: "hunter22".to_string(),
            version: PROTOCOL_VERSION,
        })
        .await;
        self.expect::<LoginOkCommand>().await
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: UnboundedSender<ServerMessage>,
    task: JoinHandle<Result<(), String>>,
}

impl RunningServer {
    async fn start(config: ServerConfig) -> Self {
        let mut server = assert_ok!(
            Server::new(ServerConfig {
                address: "127.0.0.1:0".to_string(),
                seed: Some(11),
                ..config
            })
            .await
            .map_err(|e| e.to_string())
        );
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move { server.run().await.map_err(|e| e.to_string()) });
        Self {
            addr,
            shutdown,
            task,
        }
    }

    async fn stop(self) {
        assert_ok!(self.shutdown.send(ServerMessage::Shutdown));
        let result = assert_ok!(timeout(WAIT, self.task).await);
        assert_ok!(assert_ok!(result));
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rpg-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn ping_before_login() {
        let server = RunningServer::start(ServerConfig::default()).await;
        let mut client = TestClient::connect(server.addr).await;

        client.send(&PingRequest { timestamp: 123 }).await;
        let pong = client.expect::<PongCommand>().await;
        assert_eq!(pong.timestamp, 123);

        server.stop().await;
    }

    #[tokio::test]
    async fn frames_split_across_writes() {
        let server = RunningServer::start(ServerConfig::default()).await;
        let mut client = TestClient::connect(server.addr).await;

        let mut bytes = encode_frame(&PingRequest { timestamp: 0x7e7d });
        bytes.extend_from_slice(&encode_frame(&PingRequest { timestamp: 2 }));
        for byte in bytes {
            assert_ok!(client.stream.write_all(&[byte]).await);
            assert_ok!(client.stream.flush().await);
        }

        assert_eq!(client.expect::<PongCommand>().await.timestamp, 0x7e7d);
        assert_eq!(client.expect::<PongCommand>().await.timestamp, 2);

        server.stop().await;
    }

    #[tokio::test]
    async fn outdated_client_is_disconnected() {
        let server = RunningServer::start(ServerConfig::default()).await;
        let mut client = TestClient::connect(server.addr).await;

        client
            .send(&LoginRequest {
                name: "nobody".to_string(),
                password: "hunter22".to_string(),
                version: PROTOCOL_VERSION.wrapping_add(1),
            })
            .await;
        client.expect::<AlertCommand>().await;
        let closed = timeout(WAIT, async {
            while client.next_body().await.is_some() {}
        })
        .await;
        assert_ok!(closed);

        server.stop().await;
    }

    #[tokio::test]
    async fn shutdown_alerts_connected_clients() {
        let server = RunningServer::start(ServerConfig::default()).await;
        let mut client = TestClient::connect(server.addr).await;
        client.send(&PingRequest { timestamp: 1 }).await;
        client.expect::<PongCommand>().await;

        server.stop().await;
        let alert = client.expect::<AlertCommand>().await;
        assert!(alert.message.contains("shutting down"));
    }
}

/// GAMEPLAY TESTS
mod gameplay_tests {
    use super::*;

    #[tokio::test]
    async fn players_on_same_map_see_each_other_and_chat() {
        let server = RunningServer::start(ServerConfig::default()).await;
        let mut alice = TestClient::connect(server.addr).await;
        let mut bruno = TestClient::connect(server.addr).await;

        let alice_data = alice.play("alice", "Alice").await;
        assert_eq!(alice_data.snapshot.name, "Alice");
        let bruno_data = bruno.play("bruno", "Bruno").await;

        let spawned = alice
            .expect_where(|spawn: &SpawnPlayerCommand| spawn.snapshot.name == "Bruno")
            .await;
        assert_eq!(spawned.snapshot.session, bruno_data.snapshot.session);

        bruno
            .send(&ChatRequest {
                channel: ChatChannel::Map,
                message: "  hello there  ".to_string(),
            })
            .await;
        let chat = alice
            .expect_where(|chat: &ChatCommand| chat.from == "Bruno")
            .await;
        assert_eq!(chat.message, "hello there");
        assert_eq!(chat.channel, ChatChannel::Map);

        server.stop().await;
    }

    #[tokio::test]
    async fn duplicate_login_is_rejected() {
        let server = RunningServer::start(ServerConfig::default()).await;
        let mut first = TestClient::connect(server.addr).await;
        let mut second = TestClient::connect(server.addr).await;

        first.play("carol", "Carol").await;
        second
            .send(&LoginRequest {
                name: "carol".to_string(),
                password: "hunter22".to_string(),
                version: PROTOCOL_VERSION,
            })
            .await;
        let alert = second.expect::<AlertCommand>().await;
        assert!(alert.message.contains("already logged in"));

        server.stop().await;
    }
}

/// PERSISTENCE TESTS
mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn characters_survive_restart() {
        let dir = temp_dir("restart");
        let config = ServerConfig {
            data_dir: Some(dir.clone()),
            ..ServerConfig::default()
        };

        let server = RunningServer::start(config.clone()).await;
        let mut client = TestClient::connect(server.addr).await;
        client.play("dana", "Dana").await;
        client.send(&LogoutRequest {}).await;
        client
            .expect_where(|list: &CharacterListCommand| !list.characters.is_empty())
            .await;
        server.stop().await;

        let server = RunningServer::start(config).await;
        let mut client = TestClient::connect(server.addr).await;
        client.login("dana").await;
        let list = client.expect::<CharacterListCommand>().await;
        assert_eq!(list.characters.len(), 1);
        assert_eq!(list.characters[0].name, "Dana");
        assert_eq!(list.characters[0].job, Job::Mage);
        server.stop().await;

        let _ = std::fs::remove_dir_all(&dir);
    }
}
