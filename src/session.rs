// One connected client: the socket halves, the username it registered,
// and the reliable-send state machine. A session has exactly one owner at
// any time (connection handler, lobby, spectator task, match driver, or
// the reconnect slot); the owner is the only task touching the socket.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::frame::{self, Tag};

/// How long each transmission attempt waits for an `ACK`.
pub const ACK_WINDOW: Duration = Duration::from_secs(30);

/// Transmission attempts per reliable send before the peer is declared
/// gone.
pub const SEND_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("peer did not acknowledge within the retry budget")]
    PeerGone,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct Session {
    pub username: String,
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// Whole payload lines consumed while an acknowledgement was pending.
    pending: VecDeque<String>,
}

impl Session {
    pub fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            username: String::new(),
            reader: BufReader::new(read).lines(),
            writer: write,
            pending: VecDeque::new(),
        }
    }

    /// Reliable send: frame the message, then wait for the client's
    /// acknowledgement. `NACK` retransmits immediately and a silent window
    /// retransmits too, up to the attempt budget. Payload lines arriving
    /// while the acknowledgement is pending are not replies; they are
    /// buffered whole for the next [`recv_line`](Self::recv_line).
    pub async fn send(&mut self, tag: Tag, body: &str) -> Result<(), NetError> {
        let wire = frame::encode(tag, body);
        for _ in 0..SEND_ATTEMPTS {
            self.writer.write_all(wire.as_bytes()).await?;
            let window = tokio::time::sleep(ACK_WINDOW);
            tokio::pin!(window);
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    line = self.reader.next_line() => match line? {
                        Some(line) => match line.trim() {
                            "ACK" => return Ok(()),
                            "NACK" => break,
                            "" => {}
                            payload => self.pending.push_back(payload.to_string()),
                        },
                        None => return Err(NetError::PeerGone),
                    },
                }
            }
        }
        Err(NetError::PeerGone)
    }

    /// Next whole line from the peer, trimmed. Lines buffered during an
    /// acknowledgement wait drain first. Cancellation-safe: a dropped call
    /// never splits a line.
    pub async fn recv_line(&mut self) -> Result<String, NetError> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(line);
        }
        match self.reader.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(NetError::PeerGone),
        }
    }

    /// Put a consumed line back; it becomes the next `recv_line` result.
    pub fn unread_line(&mut self, line: String) {
        self.pending.push_front(line);
    }

    /// Stream a board render block: `GRID`, the header and rows, then a
    /// blank terminator line. Blocks are not acknowledged.
    pub async fn send_grid(&mut self, block: &str) -> Result<(), NetError> {
        let mut out = String::with_capacity(block.len() + 6);
        out.push_str("GRID\n");
        out.push_str(block);
        out.push('\n');
        self.writer.write_all(out.as_bytes()).await?;
        Ok(())
    }

    /// Liveness probe used during matchmaking: a bare `ACK` line the
    /// client must echo within one acknowledgement window. Payload lines
    /// are skipped rather than failing the probe.
    pub async fn probe(&mut self) -> bool {
        if self.writer.write_all(b"ACK\n").await.is_err() {
            return false;
        }
        let window = tokio::time::sleep(ACK_WINDOW);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => return false,
                line = self.reader.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim() == "ACK" {
                            return true;
                        }
                    }
                    _ => return false,
                },
            }
        }
    }

    /// Best-effort termination notice (`X`); the socket itself closes when
    /// the session drops.
    pub async fn terminate(&mut self) {
        let _ = self.writer.write_all(b"X\n").await;
    }
}
