// Spectator chat plane. While a match runs, each queued client's session
// is owned by one chat task that relays the client's lines into the room
// and writes out whatever the room produces: other spectators' chat,
// match announcements, and board renders. Send failures to one spectator
// never disturb the rest; a dead spectator is reaped by its own task.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::frame::Tag;
use crate::lobby::{Lobby, SpectatorSeat};
use crate::logger::Logger;
use crate::session::Session;

/// Origin label for server-side match announcements.
pub const SERVER_ORIGIN: &str = "BROADCAST";

/// Event delivered to a spectator's chat task.
pub enum ChatEvent {
    /// A chat line from `origin` (a username, or [`SERVER_ORIGIN`]).
    Chat { origin: String, text: String },
    /// A rendered board block.
    Board(String),
    /// The match is over; say goodbye and hand the session back.
    Close,
}

/// Hand a session to a fresh chat task and return the seat handle the
/// lobby keeps for it.
pub fn spawn(session: Session, lobby: Arc<Lobby>, log: Arc<Logger>) -> SpectatorSeat {
    let (events, inbox) = mpsc::unbounded_channel();
    let username = session.username.clone();
    let task = tokio::spawn(chat_room(session, lobby, log, inbox));
    SpectatorSeat { username, events, task }
}

/// Owns one spectator's connection for the duration of a match. Returns
/// the session when the room closes, or `None` if the spectator is gone.
async fn chat_room(
    mut session: Session,
    lobby: Arc<Lobby>,
    log: Arc<Logger>,
    mut inbox: UnboundedReceiver<ChatEvent>,
) -> Option<Session> {
    let me = session.username.clone();
    let intro = [
        (Tag::RoleSpectator, "You are now in the queue's chat room"),
        (Tag::Info, "You can send and read other people's messages"),
        (Tag::Info, "Match status will also be broadcasted here"),
    ];
    for (tag, line) in intro {
        if session.send(tag, line).await.is_err() {
            return None;
        }
    }

    loop {
        tokio::select! {
            line = session.recv_line() => match line {
                Ok(line) if !line.is_empty() => {
                    log.debug(format!("spectator {me}: {line}"));
                    lobby.broadcast_chat(&me, &line);
                }
                Ok(_) => {}
                Err(_) => {
                    log.verbose(format!("spectator {me} disconnected"));
                    return None;
                }
            },
            event = inbox.recv() => match event {
                Some(ChatEvent::Chat { origin, text }) => {
                    let sent = if origin == me {
                        session.send(Tag::ChatEcho, &format!("You: {text}")).await
                    } else {
                        session.send(Tag::ChatPeer, &format!("{origin}: {text}")).await
                    };
                    if sent.is_err() {
                        return None;
                    }
                }
                Some(ChatEvent::Board(block)) => {
                    if session.send_grid(&block).await.is_err() {
                        return None;
                    }
                }
                Some(ChatEvent::Close) | None => {
                    let _ = session
                        .send(Tag::RolePlayer, "Temporarily closing chat room, you might play next!")
                        .await;
                    return Some(session);
                }
            },
        }
    }
}

/// Close the chat room: each spectator gets the goodbye line and its
/// session returns to the queue in seat order. Spectators that vanished
/// mid-match are simply gone.
pub async fn close_chat_room(lobby: &Arc<Lobby>, log: &Arc<Logger>) {
    let seats = lobby.drain_spectators();
    if seats.is_empty() {
        return;
    }
    // Tell every task first so the goodbyes run concurrently, then reap.
    for seat in &seats {
        let _ = seat.events.send(ChatEvent::Close);
    }
    let mut returned = Vec::with_capacity(seats.len());
    for seat in seats {
        match seat.task.await {
            Ok(Some(session)) => returned.push(session),
            Ok(None) => log.verbose(format!("spectator {} left during the match", seat.username)),
            Err(err) => log.warn(format!("spectator task for {} failed: {err}", seat.username)),
        }
    }
    lobby.restore_spectators(returned);
}
