// End-to-end tests: a real server on an ephemeral localhost port, driven
// by scripted clients that speak the wire protocol. Each client runs a
// background pump that decodes frames, auto-ACKs payloads, answers
// liveness probes, and swallows board blocks, so the server never stalls
// on an unacknowledged frame no matter which client the test is looking
// at. Nothing here waits out the 30 s / 180 s game timers; every read is
// bounded by a short harness timeout instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broadside::frame::{self, Frame, Tag};
use broadside::lobby::Lobby;
use broadside::logger::Logger;
use broadside::server;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

/// Upper bound on any single read; generous enough for the 1 s
/// reconnect-poll cadence, far below the game timers.
const STEP: Duration = Duration::from_secs(10);

async fn start_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let lobby = Lobby::new();
    let log = Arc::new(Logger::new(0));
    tokio::spawn(server::serve(listener, lobby, log));
    addr
}

/// A scripted player. The pump task owns the read half; payload bodies
/// arrive on a channel in order.
struct TestClient {
    name: String,
    bodies: UnboundedReceiver<(Tag, String)>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

/// Decode everything the server sends: echo probes, ACK payloads, NACK
/// corruption, swallow board blocks, forward payload bodies.
async fn pump(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    bodies: UnboundedSender<(Tag, String)>,
) {
    while let Ok(Some(line)) = lines.next_line().await {
        match frame::decode(line.trim_end()) {
            Ok(Frame::Ack) => {
                let _ = writer.lock().await.write_all(b"ACK\n").await;
            }
            Ok(Frame::Nack) => {}
            Ok(Frame::Grid) => {
                while let Ok(Some(row)) = lines.next_line().await {
                    if row.trim().is_empty() {
                        break;
                    }
                }
            }
            Ok(Frame::Terminate) => break,
            Ok(Frame::Payload { tag, body }) => {
                let _ = writer.lock().await.write_all(b"ACK\n").await;
                if bodies.send((tag, body)).is_err() {
                    break;
                }
            }
            Err(_) => {
                let _ = writer.lock().await.write_all(b"NACK\n").await;
            }
        }
    }
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        let writer = Arc::new(Mutex::new(write));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(BufReader::new(read).lines(), Arc::clone(&writer), tx));
        Self { name: String::new(), bodies: rx, writer }
    }

    /// Connect and answer the username prompt.
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.expect_body("Please enter your username:").await;
        client.send_line(name).await;
        client.name = name.to_string();
        client
    }

    async fn send_line(&self, line: &str) {
        self.writer
            .lock()
            .await
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn next_body(&mut self) -> (Tag, String) {
        timeout(STEP, self.bodies.recv())
            .await
            .expect("timed out waiting for the server")
            .expect("server closed the stream")
    }

    /// Drain payload bodies until one contains `needle`.
    async fn expect_body(&mut self, needle: &str) -> String {
        for _ in 0..200 {
            let (_, body) = self.next_body().await;
            if body.contains(needle) {
                return body;
            }
        }
        panic!("never saw {needle:?}");
    }

    /// Lay the fleet along the top rows: Carrier across A, Battleship
    /// across B, and so on.
    async fn place_fleet(&mut self) {
        for row in ["A", "B", "C", "D", "E"] {
            self.expect_body("Enter starting coordinate and orientation").await;
            self.send_line(&format!("{row}1 H")).await;
        }
        self.expect_body("Placement finished").await;
    }
}

/// Walk two fresh clients through joining, matchmaking, and placement.
/// Returns `(active, waiting)` for the opening turn, whichever way the
/// coin landed.
async fn start_match(addr: SocketAddr, first: &str, second: &str) -> (TestClient, TestClient) {
    let mut a = TestClient::join(addr, first).await;
    a.expect_body("You're in queue").await;
    let mut b = TestClient::join(addr, second).await;
    b.expect_body("You're in queue").await;

    a.expect_body("Welcome to Battleship Multiplayer").await;
    b.expect_body("Welcome to Battleship Multiplayer").await;

    a.place_fleet().await;
    b.place_fleet().await;

    let a_active = loop {
        let (_, body) = a.next_body().await;
        if body.contains("[Your turn!]") {
            break true;
        }
        if body.contains("Waiting for opponent to fire") {
            break false;
        }
    };
    if a_active { (a, b) } else { (b, a) }
}

#[tokio::test]
async fn username_prompt_is_framed_and_nack_retransmits() {
    let addr = start_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let original = timeout(STEP, lines.next_line()).await.unwrap().unwrap().unwrap();
    match frame::decode(original.trim_end()) {
        Ok(Frame::Payload { tag, body }) => {
            assert_eq!(tag, Tag::Prompt);
            assert_eq!(body, "Please enter your username:");
        }
        other => panic!("expected the username prompt, got {other:?}"),
    }

    // Reject the frame; the server must retransmit it verbatim.
    write.write_all(b"NACK\n").await.unwrap();
    let retransmit = timeout(STEP, lines.next_line()).await.unwrap().unwrap().unwrap();
    assert_eq!(original, retransmit);

    write.write_all(b"ACK\n").await.unwrap();
    write.write_all(b"eve\n").await.unwrap();

    let queued = timeout(STEP, lines.next_line()).await.unwrap().unwrap().unwrap();
    match frame::decode(queued.trim_end()) {
        Ok(Frame::Payload { tag, body }) => {
            assert_eq!(tag, Tag::Status);
            assert_eq!(body, "You're in queue. Waiting for match...");
        }
        other => panic!("expected the queue notice, got {other:?}"),
    }
    write.write_all(b"ACK\n").await.unwrap();
}

#[tokio::test]
async fn full_match_runs_to_game_over() {
    let addr = start_server().await;
    let (mut shooter, mut waiter) = start_match(addr, "alice", "bob").await;

    let hits = [
        "A1", "A2", "A3", "A4", "A5", "B1", "B2", "B3", "B4", "C1", "C2", "C3", "D1", "D2",
        "D3", "E1", "E2",
    ];
    let misses = [
        "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "G1", "G2", "G3", "G4",
        "G5", "G6",
    ];

    for (i, hit) in hits.iter().enumerate() {
        shooter.expect_body("Enter coordinate to fire").await;
        shooter.send_line(hit).await;

        if i == hits.len() - 1 {
            shooter.expect_body("GAME_OVER All enemy ships sunk! You win!").await;
            waiter.expect_body("GAME_OVER You lost! All your ships are sunk.").await;
            // Both survivors head back to the queue.
            shooter.expect_body("You're back in the queue").await;
            waiter.expect_body("You're back in the queue").await;
            return;
        }

        shooter.expect_body("HIT").await;
        waiter.expect_body("Enter coordinate to fire").await;
        waiter.send_line(misses[i]).await;
        waiter.expect_body("MISS!").await;
    }
}

#[tokio::test]
async fn invalid_and_repeated_shots_are_rejected() {
    let addr = start_server().await;
    let (mut shooter, mut waiter) = start_match(addr, "alice", "bob").await;

    shooter.expect_body("Enter coordinate to fire").await;
    shooter.send_line("Z9").await;
    shooter.expect_body("Invalid coordinate").await;
    shooter.send_line("A11").await;
    shooter.expect_body("Invalid coordinate").await;
    // Lenient case: a1 lands on (0, 0), a hit on this fleet layout.
    shooter.send_line("a1").await;
    shooter.expect_body("HIT").await;

    // Turn passes; the waiter burns its turn on a miss.
    waiter.expect_body("Enter coordinate to fire").await;
    waiter.send_line("J10").await;
    waiter.expect_body("MISS!").await;

    // Back to the shooter: the same cell is now refused.
    shooter.expect_body("Enter coordinate to fire").await;
    shooter.send_line("A1").await;
    shooter.expect_body("You already fired at this location").await;
    shooter.send_line("A2").await;
    shooter.expect_body("HIT").await;
}

#[tokio::test]
async fn chat_flows_during_the_opponents_turn() {
    let addr = start_server().await;
    let (mut shooter, mut waiter) = start_match(addr, "alice", "bob").await;

    waiter.send_line("chat hi there").await;
    waiter.expect_body("[CHAT] You: hi there").await;
    shooter.expect_body("[CHAT] Opponent: hi there").await;

    // The chat did not consume the shooter's turn.
    shooter.send_line("A1").await;
    shooter.expect_body("HIT").await;
}

#[tokio::test]
async fn mid_turn_leaver_can_reconnect_and_keep_the_turn() {
    let addr = start_server().await;
    let (shooter, mut waiter) = start_match(addr, "alice", "bob").await;
    let name = shooter.name.clone();

    shooter.send_line("quit").await;
    drop(shooter);
    waiter.expect_body("Attempting to reconnect opponent").await;

    let mut returned = TestClient::join(addr, &name).await;
    returned.expect_body(&format!("Welcome back, {name}")).await;

    // Same turn, same shooter; the fleet layout makes A1 a hit.
    returned.expect_body("[Your turn!]").await;
    returned.expect_body("Enter coordinate to fire").await;
    returned.send_line("A1").await;
    returned.expect_body("HIT").await;
    waiter.expect_body("Opponent fired an attack on (A1)").await;
}

#[tokio::test]
async fn spectators_chat_while_a_match_runs() {
    let addr = start_server().await;
    let mut p1 = TestClient::join(addr, "p1").await;
    p1.expect_body("You're in queue").await;
    let mut p2 = TestClient::join(addr, "p2").await;
    p2.expect_body("You're in queue").await;

    // Hold both players at the placement prompt so the match stays open.
    p1.expect_body("[Ship Placement]").await;
    p2.expect_body("[Ship Placement]").await;

    let mut watcher = TestClient::join(addr, "watcher").await;
    watcher.expect_body("You're in queue").await;
    watcher.expect_body("chat room").await;
    let mut lurker = TestClient::join(addr, "lurker").await;
    lurker.expect_body("You're in queue").await;
    lurker.expect_body("chat room").await;

    watcher.send_line("hello all").await;
    watcher.expect_body("You: hello all").await;
    lurker.expect_body("watcher: hello all").await;
}

#[tokio::test]
async fn queue_full_notice_for_the_eleventh_client() {
    let addr = start_server().await;
    let mut p1 = TestClient::join(addr, "p1").await;
    p1.expect_body("You're in queue").await;
    let mut p2 = TestClient::join(addr, "p2").await;
    p2.expect_body("You're in queue").await;

    // Both players leave the queue for the match and stall in placement,
    // freeing all ten seats.
    p1.expect_body("[Ship Placement]").await;
    p2.expect_body("[Ship Placement]").await;

    let mut spectators = Vec::new();
    for i in 0..10 {
        let mut s = TestClient::join(addr, &format!("s{i}")).await;
        s.expect_body("You're in queue").await;
        s.expect_body("chat room").await;
        spectators.push(s);
    }

    let mut extra = TestClient::join(addr, "extra").await;
    extra.expect_body("Queue is full, please try again later.").await;
}
