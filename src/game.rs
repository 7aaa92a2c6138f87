// Match driver: chaperones one two-player match from placement through
// the turn loop to its end, keeps the spectator room informed, and
// decides what goes back into the queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::frame::Tag;
use crate::lobby::Lobby;
use crate::logger::Logger;
use crate::placement::{self, PlacementEnd};
use crate::session::Session;
use crate::spectate::SERVER_ORIGIN;
use crate::turn::{self, SkipLedger, TurnOutcome};

/// How long a disconnected player's seat is held open.
pub const RECONNECT_WINDOW: Duration = Duration::from_secs(60);

/// Cadence of reconnect-slot polling.
const RECONNECT_POLL: Duration = Duration::from_secs(1);

/// Sessions to put back in the queue when a match ends. All user-facing
/// goodbyes have been sent by the time this is returned.
#[derive(Default)]
pub struct MatchEnd {
    /// Survivors of an opponent disconnect; they go to the front.
    pub requeue_front: Vec<Session>,
    /// Players finishing a completed game; they go to the back.
    pub requeue_back: Vec<Session>,
}

enum MatchEvent<'a> {
    Started { first: &'a str, second: &'a str },
    Cancelled,
    OpeningTurn { username: &'a str },
    TurnResolved { username: &'a str, outcome: &'a TurnOutcome },
    ReconnectWait { username: &'a str },
    Reconnected { username: &'a str },
    ReconnectFailed { username: &'a str },
    AfkForfeit { username: &'a str },
    Finished { winner: &'a str },
    Ended,
}

impl fmt::Display for MatchEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchEvent::Started { first, second } =>
                write!(f, "match started: {first} vs {second}"),
            MatchEvent::Cancelled =>
                write!(f, "match cancelled before gameplay"),
            MatchEvent::OpeningTurn { username } =>
                write!(f, "{username} fires first"),
            MatchEvent::TurnResolved { username, outcome } =>
                write!(f, "{username}'s turn resolved: {outcome:?}"),
            MatchEvent::ReconnectWait { username } =>
                write!(f, "{username} dropped; holding their seat"),
            MatchEvent::Reconnected { username } =>
                write!(f, "{username} reconnected"),
            MatchEvent::ReconnectFailed { username } =>
                write!(f, "{username} did not come back in time"),
            MatchEvent::AfkForfeit { username } =>
                write!(f, "{username} skipped twice in a row and forfeits"),
            MatchEvent::Finished { winner } =>
                write!(f, "all ships sunk; {winner} wins"),
            MatchEvent::Ended =>
                write!(f, "match over"),
        }
    }
}

enum Exit {
    /// All ships sunk; both players survive.
    Finished,
    /// Both players quit in the same breath.
    AllForfeit,
    /// One player is gone for good; the other survives.
    Dropped { survivor: usize },
}

/// Drive one match to completion.
pub async fn run_match(
    lobby: &Arc<Lobby>,
    log: &Arc<Logger>,
    first: Session,
    second: Session,
) -> MatchEnd {
    lobby.broadcast_chat(SERVER_ORIGIN, "New game started between two players.");
    log.info(MatchEvent::Started { first: &first.username, second: &second.username });

    let mut first = first;
    let mut second = second;
    let first_ok = first.send(Tag::RolePlayer, "Welcome to Battleship Multiplayer").await.is_ok();
    let second_ok = second.send(Tag::RolePlayer, "Welcome to Battleship Multiplayer").await.is_ok();
    if !first_ok || !second_ok {
        let survivor = match (first_ok, second_ok) {
            (true, false) => Some(first),
            (false, true) => Some(second),
            _ => None,
        };
        return cancel_match(lobby, log, survivor).await;
    }

    let (mut players, mut boards) =
        match placement::run_placement_phase(first, second, log).await {
            (
                PlacementEnd::Ready { session: s0, board: b0 },
                PlacementEnd::Ready { session: s1, board: b1 },
            ) => ([s0, s1], [b0, b1]),
            (PlacementEnd::Ready { session, .. }, _) | (_, PlacementEnd::Ready { session, .. }) => {
                return cancel_match(lobby, log, Some(session)).await;
            }
            _ => return cancel_match(lobby, log, None).await,
        };

    let mut active = rand::thread_rng().gen_range(0..2usize);
    let mut skips = SkipLedger::default();
    log.info(MatchEvent::OpeningTurn { username: &players[active].username });

    let exit = loop {
        lobby.broadcast_chat(SERVER_ORIGIN, &format!("{}'s turn.", players[active].username));

        let waiting = 1 - active;
        let (active_session, waiting_session) = split_players(&mut players, active);
        let outcome = turn::run_turn(active_session, waiting_session, &mut boards[waiting]).await;
        log.verbose(MatchEvent::TurnResolved { username: &players[active].username, outcome: &outcome });

        match outcome {
            TurnOutcome::Completed { coord, shot } => {
                let mut line = format!(
                    "{} fired at {coord}: {}",
                    players[active].username,
                    shot.label()
                );
                if let Some(name) = shot.sunk() {
                    line.push_str(&format!(" (Sank {name})"));
                }
                lobby.broadcast_chat(SERVER_ORIGIN, &line);
                lobby.broadcast_chat(
                    SERVER_ORIGIN,
                    &format!("{}'s board state:", players[waiting].username),
                );
                lobby.broadcast_board(boards[waiting].render(false));
                skips.clear(active);
                active = waiting;
            }
            TurnOutcome::GameFinished => {
                lobby.broadcast_chat(
                    SERVER_ORIGIN,
                    &format!("Game over! All ships sunk. {} wins!", players[active].username),
                );
                for idx in [active, waiting] {
                    lobby.broadcast_chat(
                        SERVER_ORIGIN,
                        &format!("{}'s board state:", players[idx].username),
                    );
                    lobby.broadcast_board(boards[idx].render(false));
                }
                log.info(MatchEvent::Finished { winner: &players[active].username });
                break Exit::Finished;
            }
            TurnOutcome::Timeout => {
                lobby.broadcast_chat(
                    SERVER_ORIGIN,
                    &format!("{} has timed out, their turn will be skipped", players[active].username),
                );
                if skips.record_skip(active) {
                    let afk = players[active].username.clone();
                    log.info(MatchEvent::AfkForfeit { username: &afk });
                    let _ = players[waiting]
                        .send(Tag::Info, &format!("GAME_OVER {afk} is AFK, immediate forfeit, You Win!"))
                        .await;
                    players[active].terminate().await;
                    break Exit::Dropped { survivor: waiting };
                }
                active = waiting;
            }
            TurnOutcome::ActiveGone | TurnOutcome::WaitingGone => {
                let leaver = if outcome == TurnOutcome::ActiveGone { active } else { waiting };
                let name = players[leaver].username.clone();
                lobby.grant_reconnect(&name);
                log.info(MatchEvent::ReconnectWait { username: &name });
                let replacement = await_reconnect(lobby).await;
                match replacement {
                    Some(mut fresh) => {
                        if fresh.send(Tag::RolePlayer, &format!("Welcome back, {name}")).await.is_ok() {
                            log.info(MatchEvent::Reconnected { username: &name });
                            players[leaver] = fresh;
                            // The same player keeps the turn; active does
                            // not swap on a reconnect.
                            continue;
                        }
                        log.info(MatchEvent::ReconnectFailed { username: &name });
                        break Exit::Dropped { survivor: 1 - leaver };
                    }
                    None => {
                        log.info(MatchEvent::ReconnectFailed { username: &name });
                        break Exit::Dropped { survivor: 1 - leaver };
                    }
                }
            }
            TurnOutcome::BothGone => break Exit::AllForfeit,
        }
    };

    lobby.broadcast_chat(SERVER_ORIGIN, "Game ended. Waiting for next match.");
    log.info(MatchEvent::Ended);

    let [s0, s1] = players;
    let mut ended = MatchEnd::default();
    match exit {
        Exit::AllForfeit => {}
        Exit::Finished => {
            for mut session in [s0, s1] {
                if session
                    .send(Tag::Status, "You're back in the queue, waiting for match..")
                    .await
                    .is_ok()
                {
                    ended.requeue_back.push(session);
                }
            }
        }
        Exit::Dropped { survivor } => {
            let mut session = if survivor == 0 { s0 } else { s1 };
            if session.send(Tag::Status, "[Opponent disconnected] You win!").await.is_ok()
                && session
                    .send(Tag::Status, "You're back in the queue, waiting for match..")
                    .await
                    .is_ok()
            {
                ended.requeue_front.push(session);
            }
        }
    }
    ended
}

/// Abandon a match before the gameplay loop: tell the spectators, hand any
/// survivor back for front-of-queue seating.
async fn cancel_match(
    lobby: &Arc<Lobby>,
    log: &Arc<Logger>,
    survivor: Option<Session>,
) -> MatchEnd {
    lobby.broadcast_chat(SERVER_ORIGIN, "player(s) timed out or disconnected match cancelled");
    lobby.broadcast_chat(SERVER_ORIGIN, "picking new players to start a match...");
    log.info(MatchEvent::Cancelled);
    let mut ended = MatchEnd::default();
    if let Some(mut session) = survivor {
        if session
            .send(Tag::Status, "Other Player disconnected, looking for new opponent..")
            .await
            .is_ok()
        {
            ended.requeue_front.push(session);
        }
    }
    ended
}

/// Mutable borrows of both players, active first.
fn split_players(players: &mut [Session; 2], active: usize) -> (&mut Session, &mut Session) {
    let (left, right) = players.split_at_mut(1);
    if active == 0 {
        (&mut left[0], &mut right[0])
    } else {
        (&mut right[0], &mut left[0])
    }
}

/// Poll the reconnect slot once a second for up to the reconnect window,
/// then close the window for good.
async fn await_reconnect(lobby: &Arc<Lobby>) -> Option<Session> {
    for _ in 0..RECONNECT_WINDOW.as_secs() {
        if let Some(session) = lobby.claim_reconnected() {
            return Some(session);
        }
        tokio::time::sleep(RECONNECT_POLL).await;
    }
    let last_chance = lobby.claim_reconnected();
    lobby.revoke_reconnect();
    last_chance
}
