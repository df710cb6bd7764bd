use clap::Parser;
use shared::packets::{
    decode_body, drain_frames, encode_frame, AlertCommand, CharacterListCommand, ChatCommand,
    ChatRequest, CreateCharacterRequest, LoginOkCommand, LoginRequest, LogoutRequest, MoveRequest,
    PingRequest, PlayerDataCommand, PlayerPositionCommand, PongCommand, RegisterRequest,
    UseCharacterRequest,
};
use shared::{ChatChannel, Direction, Job, MovementType, Packet, PROTOCOL_VERSION};
use std::collections::VecDeque;
use std::error::Error;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Headless client that logs in and walks around
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short = 'H', long, default_value = "127.0.0.1:7001")]
    server: String,
    #[clap(short, long, default_value = "tester")]
    account: String,
    #[clap(short, long, default_value = "secret")]
    password: String,
    /// Character to create if missing, then play
    #[clap(short, long, default_value = "Walker")]
    character: String,
    /// Number of steps to walk
    #[clap(short, long, default_value = "12")]
    steps: usize,
}

/// How long to wait for an expected reply
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A framed connection that keeps frames it was not waiting for
struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
}

impl Connection {
    async fn connect(addr: &str) -> Result<Self, Box<dyn Error>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buffer: Vec::new(),
            pending: VecDeque::new(),
        })
    }

    async fn send<P: Packet>(&mut self, packet: &P) -> Result<(), Box<dyn Error>> {
        self.stream.write_all(&encode_frame(packet)).await?;
        Ok(())
    }

    /// Next frame body from the server
    async fn next_body(&mut self) -> Result<Vec<u8>, Box<dyn Error>> {
        loop {
            if let Some(body) = self.pending.pop_front() {
                return Ok(body);
            }
            let mut chunk = [0u8; 4096];
            let len = self.stream.read(&mut chunk).await?;
            if len == 0 {
                return Err("server closed the connection".into());
            }
            self.buffer.extend_from_slice(&chunk[..len]);
            for body in drain_frames(&mut self.buffer) {
                self.pending.push_back(body?);
            }
        }
    }

    /// Skips frames until one of type `P` arrives, printing alerts and chat on the way
    async fn wait_for<P: Packet>(&mut self) -> Result<P, Box<dyn Error>> {
        let deadline = Instant::now() + REPLY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let body = timeout(remaining, self.next_body())
                .await
                .map_err(|_| format!("timed out waiting for {}", P::ID))??;
            if let Some(packet) = decode_body::<P>(&body)? {
                return Ok(packet);
            }
            print_notice(&body);
        }
    }

    /// Frames that arrive within `window`
    async fn drain(&mut self, window: Duration) -> Result<Vec<Vec<u8>>, Box<dyn Error>> {
        let deadline = Instant::now() + window;
        let mut bodies = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.next_body()).await {
                Ok(body) => bodies.push(body?),
                Err(_) => return Ok(bodies),
            }
        }
    }
}

fn print_notice(body: &[u8]) {
    if let Ok(Some(alert)) = decode_body::<AlertCommand>(body) {
        println!("Alert: {}", alert.message);
    } else if let Ok(Some(chat)) = decode_body::<ChatCommand>(body) {
        println!("[{:?}] {}: {}", chat.channel, chat.from, chat.message);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let mut connection = Connection::connect(&args.server).await?;

    // Registering an existing account only produces an alert
    connection
        .send(&RegisterRequest {
            name: args.account.clone(),
            password: args.password.clone(),
        })
        .await?;
    connection
        .send(&LoginRequest {
            name: args.account.clone(),
            password: args.password.clone(),
            version: PROTOCOL_VERSION,
        })
        .await?;
    let login = connection.wait_for::<LoginOkCommand>().await?;
    println!("Logged in as session {}", login.session);

    let list = connection.wait_for::<CharacterListCommand>().await?;
    println!("Account has {} characters", list.characters.len());
    if !list
        .characters
        .iter()
        .any(|c| c.name.eq_ignore_ascii_case(&args.character))
    {
        println!("Creating {}", args.character);
        connection
            .send(&CreateCharacterRequest {
                name: args.character.clone(),
                job: Job::Warrior,
                sprite: 1,
            })
            .await?;
        connection.wait_for::<CharacterListCommand>().await?;
    }

    connection
        .send(&UseCharacterRequest {
            name: args.character.clone(),
        })
        .await?;
    let data = connection.wait_for::<PlayerDataCommand>().await?;
    let (mut x, mut y) = (data.snapshot.x, data.snapshot.y);
    println!(
        "Playing {} (level {}) at ({}, {})",
        data.snapshot.name, data.snapshot.level, x, y
    );

    connection
        .send(&ChatRequest {
            channel: ChatChannel::Map,
            message: "Hello from the test client".to_string(),
        })
        .await?;

    // Walk a square, trusting corrections from the server
    let route = [Direction::Right, Direction::Down, Direction::Left, Direction::Up];
    for step in 0..args.steps {
        let direction = route[(step / 3) % route.len()];
        connection
            .send(&MoveRequest {
                direction,
                movement: MovementType::Walk,
                x,
                y,
            })
            .await?;
        let (dx, dy) = direction.offset();
        x = (x as i32 + dx).max(0) as u16;
        y = (y as i32 + dy).max(0) as u16;

        for body in connection.drain(Duration::from_millis(300)).await? {
            if let Ok(Some(position)) = decode_body::<PlayerPositionCommand>(&body) {
                println!("Server corrected position to ({}, {})", position.x, position.y);
                x = position.x;
                y = position.y;
            } else {
                print_notice(&body);
            }
        }
        println!("Step {}: {:?} to ({}, {})", step + 1, direction, x, y);
    }

    let sent = Instant::now();
    connection
        .send(&PingRequest {
            timestamp: sent.elapsed().as_millis() as u64,
        })
        .await?;
    connection.wait_for::<PongCommand>().await?;
    println!("Round trip: {:?}", sent.elapsed());

    connection.send(&LogoutRequest {}).await?;
    let list = connection.wait_for::<CharacterListCommand>().await?;
    for character in &list.characters {
        println!("  {} ({:?}, level {})", character.name, character.job, character.level);
    }

    println!("Test client finished");
    Ok(())
}
