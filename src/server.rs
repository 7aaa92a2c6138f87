// Accept loop and per-connection routing: greet, learn the username, and
// hand the session to whichever subsystem owns it next.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::frame::Tag;
use crate::lobby::{self, Admitted, Lobby};
use crate::logger::Logger;
use crate::session::Session;

/// Accept loop: one handler task per connection. Accept errors are logged
/// and never fatal.
pub async fn serve(listener: TcpListener, lobby: Arc<Lobby>, log: Arc<Logger>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log.warn(format!("accept error: {err}"));
                continue;
            }
        };
        log.verbose(format!("client connected from {addr}"));
        let lobby = Arc::clone(&lobby);
        let log = Arc::clone(&log);
        tokio::spawn(handle_client(stream, lobby, log));
    }
}

/// Greet a new connection and route it: the reconnect slot, the spectator
/// chat room, the waiting queue, or a queue-full rejection.
pub async fn handle_client(stream: TcpStream, lobby: Arc<Lobby>, log: Arc<Logger>) {
    let mut session = Session::new(stream);
    if session.send(Tag::Prompt, "Please enter your username:").await.is_err() {
        return;
    }
    let username = match session.recv_line().await {
        Ok(line) => line,
        Err(_) => return,
    };
    session.username = username;
    log.verbose(format!("client registered as {:?}", session.username));

    // A username matching the open reconnect window belongs to the match
    // that granted it, not to the queue.
    session = match lobby.offer_reconnect(session) {
        Ok(()) => {
            log.info("a dropped player is back; parking the session for its match");
            return;
        }
        Err(session) => session,
    };

    if lobby.is_full() {
        let _ = session.send(Tag::Status, "[NOTICE] Queue is full, please try again later.").await;
        return;
    }
    if session.send(Tag::Status, "You're in queue. Waiting for match...").await.is_err() {
        return;
    }
    match lobby::admit(&lobby, session, &log) {
        Admitted::Full(mut session) => {
            // The queue filled between the check and the seating.
            let _ = session.send(Tag::Status, "[NOTICE] Queue is full, please try again later.").await;
        }
        Admitted::Spectating => {
            log.verbose("newcomer joined the spectator chat room");
        }
        Admitted::Waiting => {}
        Admitted::StartMatch => {
            tokio::spawn(lobby::run_matchmaker(Arc::clone(&lobby), Arc::clone(&log)));
        }
    }
}
