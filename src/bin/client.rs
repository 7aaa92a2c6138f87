use broadside::frame::{self, Frame, Tag};
use broadside::logger::Logger;
use clap::{ArgAction, Parser};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name    = "client",
    version,
    about   = "Broadside - terminal Battleship client",
    long_about = "Connects to a Broadside server and plays interactively.\n\
                  Type coordinates when prompted; `chat <msg>` talks to the\n\
                  room, `quit` forfeits and disconnects."
)]
struct Args {
    /// Server address to connect to
    #[arg(default_value = "127.0.0.2:5000")]
    addr: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

// ── CLIENT EVENTS (operational logging to stderr) ─────────────────────────────

enum ClientEvent<'a> {
    Connecting { addr: &'a str },
    Connected { addr: &'a str },
    Sent { line: &'a str },
    Received { raw: &'a str },
    BadFrame { raw: &'a str },
    Disconnected,
}

impl fmt::Display for ClientEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Connecting { addr } => write!(f, "Connecting to {addr}…"),
            ClientEvent::Connected { addr } => write!(f, "Connected to {addr}"),
            ClientEvent::Sent { line } => write!(f, "→ {line}"),
            ClientEvent::Received { raw } => write!(f, "← {raw}"),
            ClientEvent::BadFrame { raw } => write!(f, "corrupt frame, NACKing: {raw:?}"),
            ClientEvent::Disconnected => write!(f, "Connection closed by server"),
        }
    }
}

// ── CLIENT STATE ──────────────────────────────────────────────────────────────

/// Limit on a single input line; anything longer never leaves the client.
const MAX_INPUT: usize = 100;

/// How long the chat throttle holds after the server echoes a chat.
const CHAT_MUTE: Duration = Duration::from_secs(2);

/// Presentation state, driven entirely by the frame tags the server sends.
struct ClientState {
    /// Player role gates game commands; spectators forward everything.
    playing: bool,
    /// Set by prompts, cleared when a command is sent or a status lands.
    input_enabled: bool,
    /// Chat is refused until this instant passes.
    chat_muted_until: Option<Instant>,
}

fn apply_tag(tag: Tag, state: &mut ClientState) {
    match tag {
        Tag::Prompt => state.input_enabled = true,
        Tag::Status => state.input_enabled = false,
        Tag::ChatEcho => state.chat_muted_until = Some(Instant::now() + CHAT_MUTE),
        Tag::RolePlayer => {
            state.input_enabled = false;
            state.playing = true;
        }
        Tag::RoleSpectator => {
            state.input_enabled = false;
            state.playing = false;
        }
        Tag::Info | Tag::ChatPeer => {}
    }
}

// ── SERVER STREAM ─────────────────────────────────────────────────────────────

/// React to one line from the server. Returns false when the session is
/// over.
async fn handle_server_line(
    raw: &str,
    server_lines: &mut Lines<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    state: &mut ClientState,
    log: &Logger,
) -> bool {
    match frame::decode(raw) {
        Ok(Frame::Ack) => {
            // Liveness probe during matchmaking; echo it straight back.
            writer.write_all(b"ACK\n").await.is_ok()
        }
        Ok(Frame::Nack) => true,
        Ok(Frame::Grid) => print_grid(server_lines).await,
        Ok(Frame::Terminate) => {
            println!("You have been detected idle, and have been disconnected from the server, press ENTER to end session");
            false
        }
        Ok(Frame::Payload { tag, body }) => {
            if writer.write_all(b"ACK\n").await.is_err() {
                return false;
            }
            apply_tag(tag, state);
            println!("\n{body}");
            if tag == Tag::ChatPeer {
                // Extra spacing so chat doesn't clump into game output.
                println!();
            }
            true
        }
        Err(_) => {
            log.debug(ClientEvent::BadFrame { raw });
            writer.write_all(b"NACK\n").await.is_ok()
        }
    }
}

/// Print a board block through its blank terminator line.
async fn print_grid(server_lines: &mut Lines<BufReader<OwnedReadHalf>>) -> bool {
    loop {
        match server_lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    return true;
                }
                println!("{line}");
            }
            _ => return false,
        }
    }
}

// ── USER INPUT ────────────────────────────────────────────────────────────────

fn is_chat(line: &str) -> bool {
    line.get(..5).is_some_and(|keyword| keyword.eq_ignore_ascii_case("chat "))
}

/// Forward one typed line, subject to the role and gating rules. Returns
/// false when the session should close.
async fn handle_input(
    line: &str,
    writer: &mut OwnedWriteHalf,
    state: &mut ClientState,
    log: &Logger,
) -> bool {
    if line.chars().count() > MAX_INPUT {
        println!("[NOTICE] Input cant be longer than 100 characters, please try again.");
        return true;
    }

    // Spectators forward everything; the server treats their lines as chat.
    if !state.playing {
        return send_line(writer, line, log).await;
    }

    if line.eq_ignore_ascii_case("quit") {
        let _ = send_line(writer, line, log).await;
        return false;
    }
    if is_chat(line) {
        if state.chat_muted_until.is_some_and(|until| Instant::now() < until) {
            println!("[NOTICE] Your message is not sent, You are sending too much message, please do not spam");
            return true;
        }
        return send_line(writer, line, log).await;
    }
    if state.input_enabled {
        // One command per prompt; the server re-enables input when ready.
        state.input_enabled = false;
        return send_line(writer, line, log).await;
    }
    println!("[NOTICE] Wait for server prompt before sending commands");
    true
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str, log: &Logger) -> bool {
    log.verbose(ClientEvent::Sent { line });
    writer.write_all(format!("{line}\n").as_bytes()).await.is_ok()
}

// ── MAIN ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let log = Logger::new(args.verbose);

    log.info(ClientEvent::Connecting { addr: &args.addr });

    let stream = match TcpStream::connect(&args.addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Failed to connect to {}: {e}", args.addr);
            std::process::exit(1);
        }
    };

    log.info(ClientEvent::Connected { addr: &args.addr });

    let (reader, mut writer) = stream.into_split();
    let mut server_lines = BufReader::new(reader).lines();
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    let mut state = ClientState {
        playing: true,
        input_enabled: false,
        chat_muted_until: None,
    };

    loop {
        tokio::select! {
            result = server_lines.next_line() => {
                let raw = match result {
                    Ok(Some(line)) => line,
                    _ => {
                        log.info(ClientEvent::Disconnected);
                        break;
                    }
                };
                log.trace(ClientEvent::Received { raw: &raw });
                if !handle_server_line(raw.trim_end(), &mut server_lines, &mut writer, &mut state, &log).await {
                    break;
                }
            }
            result = stdin_lines.next_line() => {
                let raw = match result {
                    Ok(Some(line)) => line,
                    _ => break,
                };
                if !handle_input(raw.trim(), &mut writer, &mut state, &log).await {
                    break;
                }
            }
        }
    }

    println!("\n[NOTICE] You are disconnected, closing connection...");
}
