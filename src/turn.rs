// One turn of the gameplay loop. The engine listens to BOTH peers at
// once: the active player's lines drive the shot, while either player
// may chat or forfeit out of turn. A 30 second window bounds the whole
// turn; priority goes deadline, then the waiting peer, then the active
// peer, matching the select order below.

use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout};

use crate::board::{self, Board, Shot};
use crate::frame::Tag;
use crate::session::Session;

/// How long the active player has to land a valid shot.
pub const TURN_WINDOW: Duration = Duration::from_secs(30);

/// Grace period for spotting a simultaneous quit from the other peer.
const JOINT_QUIT_WINDOW: Duration = Duration::from_millis(500);

/// How a single turn resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A shot landed and the game continues.
    Completed { coord: String, shot: Shot },
    /// The shot sank the last ship; GAME_OVER has been delivered to both.
    GameFinished,
    /// The turn window lapsed without a valid shot.
    Timeout,
    ActiveGone,
    WaitingGone,
    BothGone,
}

/// Consecutive-skip ledger: a player who times out twice in a row, with
/// no completed turn of their own in between, forfeits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipLedger([bool; 2]);

impl SkipLedger {
    /// Record a timed-out turn; `true` means this was the second
    /// consecutive skip and the player forfeits.
    pub fn record_skip(&mut self, player: usize) -> bool {
        if self.0[player] {
            return true;
        }
        self.0[player] = true;
        false
    }

    /// A completed turn wipes the player's slate.
    pub fn clear(&mut self, player: usize) {
        self.0[player] = false;
    }
}

/// Run one turn. `board` is the waiting player's board, the one being
/// fired upon. Reliable-send failures towards a peer resolve as that
/// peer's disconnect outcome.
pub async fn run_turn(
    active: &mut Session,
    waiting: &mut Session,
    board: &mut Board,
) -> TurnOutcome {
    if waiting.send(Tag::Status, "Waiting for opponent to fire...").await.is_err() {
        return TurnOutcome::WaitingGone;
    }
    if active.send(Tag::Info, "[Opponent's Board]").await.is_err()
        || active.send_grid(&board.render(false)).await.is_err()
        || active.send(Tag::Info, "[Your turn!]").await.is_err()
        || active
            .send(Tag::Prompt, "Enter coordinate to fire (e.g. B5) or type \"quit\" to disconnect:")
            .await
            .is_err()
    {
        return TurnOutcome::ActiveGone;
    }

    let deadline = Instant::now() + TURN_WINDOW;
    let (row, col, shot) = loop {
        tokio::select! {
            biased;
            _ = sleep_until(deadline) => {
                let _ = active.send(Tag::Status, "Timeout occurred: Turn Skipped").await;
                let _ = waiting.send(Tag::Info, "Enemy has timed out their turn is skipped").await;
                return TurnOutcome::Timeout;
            }
            line = waiting.recv_line() => match line {
                Err(_) => {
                    if peer_also_quit(active).await {
                        return TurnOutcome::BothGone;
                    }
                    let _ = active.send(Tag::Status, "Attempting to reconnect opponent, please wait...").await;
                    return TurnOutcome::WaitingGone;
                }
                Ok(line) => {
                    if line.eq_ignore_ascii_case("quit") {
                        if peer_also_quit(active).await {
                            return TurnOutcome::BothGone;
                        }
                        let _ = active.send(Tag::Status, "Attempting to reconnect opponent, please wait...").await;
                        return TurnOutcome::WaitingGone;
                    }
                    if let Some(text) = chat_body(&line) {
                        if active.send(Tag::ChatPeer, &format!("[CHAT] Opponent: {text}")).await.is_err() {
                            return TurnOutcome::ActiveGone;
                        }
                        if waiting.send(Tag::ChatEcho, &format!("[CHAT] You: {text}")).await.is_err() {
                            return TurnOutcome::WaitingGone;
                        }
                    }
                    // Anything else from the waiting player is dropped.
                }
            },
            line = active.recv_line() => match line {
                Err(_) => {
                    if peer_also_quit(waiting).await {
                        return TurnOutcome::BothGone;
                    }
                    let _ = waiting.send(Tag::Status, "Attempting to reconnect opponent, please wait...").await;
                    return TurnOutcome::ActiveGone;
                }
                Ok(line) if line.is_empty() => {}
                Ok(line) if line.eq_ignore_ascii_case("quit") => {
                    if peer_also_quit(waiting).await {
                        return TurnOutcome::BothGone;
                    }
                    let _ = waiting.send(Tag::Status, "Attempting to reconnect opponent, please wait...").await;
                    return TurnOutcome::ActiveGone;
                }
                Ok(line) => {
                    if let Some(text) = chat_body(&line) {
                        if waiting.send(Tag::ChatPeer, &format!("[CHAT] Opponent: {text}")).await.is_err() {
                            return TurnOutcome::WaitingGone;
                        }
                        if active.send(Tag::ChatEcho, &format!("[CHAT] You: {text}")).await.is_err() {
                            return TurnOutcome::ActiveGone;
                        }
                        continue;
                    }
                    match board::parse_coordinate(&line) {
                        None => {
                            let notice = "Invalid coordinate. Must be A-J followed by 1-10 (e.g. B5). Try again:";
                            if active.send(Tag::Prompt, notice).await.is_err() {
                                return TurnOutcome::ActiveGone;
                            }
                        }
                        Some((row, col)) => match board.fire_at(row, col) {
                            Shot::AlreadyShot => {
                                let notice = "You already fired at this location. Try another target.";
                                if active.send(Tag::Prompt, notice).await.is_err() {
                                    return TurnOutcome::ActiveGone;
                                }
                            }
                            shot => break (row, col, shot),
                        },
                    }
                }
            },
        }
    };

    resolve_shot(active, waiting, board, row, col, shot).await
}

/// Deliver the boards and outcome messages for an accepted shot.
async fn resolve_shot(
    active: &mut Session,
    waiting: &mut Session,
    board: &Board,
    row: usize,
    col: usize,
    shot: Shot,
) -> TurnOutcome {
    if active.send(Tag::Info, "[Opponent's Board]").await.is_err()
        || active.send_grid(&board.render(false)).await.is_err()
    {
        return TurnOutcome::ActiveGone;
    }
    if waiting.send(Tag::Info, "[Your Board]").await.is_err()
        || waiting.send_grid(&board.render(true)).await.is_err()
    {
        return TurnOutcome::WaitingGone;
    }

    let coord = board::coordinate_label(row, col);
    if waiting.send(Tag::Info, &format!("Opponent fired an attack on ({coord})")).await.is_err() {
        return TurnOutcome::WaitingGone;
    }

    match shot {
        Shot::Hit { sunk: Some(name) } => {
            if active.send(Tag::Status, &format!("HIT! You sank the {name}!")).await.is_err() {
                return TurnOutcome::ActiveGone;
            }
            if waiting.send(Tag::Info, &format!("HIT! Opponent sunk your {name}!")).await.is_err() {
                return TurnOutcome::WaitingGone;
            }
            if board.all_sunk() {
                if active.send(Tag::Info, "GAME_OVER All enemy ships sunk! You win!").await.is_err() {
                    return TurnOutcome::ActiveGone;
                }
                if waiting.send(Tag::Info, "GAME_OVER You lost! All your ships are sunk.").await.is_err() {
                    return TurnOutcome::WaitingGone;
                }
                return TurnOutcome::GameFinished;
            }
        }
        Shot::Hit { sunk: None } => {
            if waiting.send(Tag::Info, "HIT! Opponent hit your ship!").await.is_err() {
                return TurnOutcome::WaitingGone;
            }
            if active.send(Tag::Status, "HIT!").await.is_err() {
                return TurnOutcome::ActiveGone;
            }
        }
        Shot::Miss => {
            if waiting.send(Tag::Info, "MISS! Opponent missed!").await.is_err() {
                return TurnOutcome::WaitingGone;
            }
            if active.send(Tag::Status, "MISS!").await.is_err() {
                return TurnOutcome::ActiveGone;
            }
        }
        // Already-shot cells are re-prompted before a shot is accepted.
        Shot::AlreadyShot => {}
    }

    TurnOutcome::Completed { coord, shot }
}

/// One peer quit; give the other a short window to show a simultaneous
/// quit before settling on a single disconnect. A non-quit line caught
/// here is pushed back for the caller.
async fn peer_also_quit(peer: &mut Session) -> bool {
    match timeout(JOINT_QUIT_WINDOW, peer.recv_line()).await {
        Ok(Err(_)) => true,
        Ok(Ok(line)) if line.eq_ignore_ascii_case("quit") => true,
        Ok(Ok(line)) => {
            if !line.is_empty() {
                peer.unread_line(line);
            }
            false
        }
        Err(_) => false,
    }
}

/// Body of a `chat ` line, if this is one (case-insensitive keyword).
fn chat_body(line: &str) -> Option<&str> {
    let keyword = line.get(..5)?;
    if keyword.eq_ignore_ascii_case("chat ") {
        line.get(5..)
    } else {
        None
    }
}
