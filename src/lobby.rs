// Shared lobby state: the bounded seat queue, the single-flight
// `game_running` flag, and the two reconnect slots. Everything sits
// behind one mutex that is only ever held for collection mutation and
// channel sends; socket I/O always happens on owned sessions outside
// the lock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::game;
use crate::logger::Logger;
use crate::session::Session;
use crate::spectate::{self, ChatEvent};

/// Maximum clients the lobby will seat, waiting and spectating combined.
pub const MAX_QUEUE: usize = 10;

/// Pause between one match ending and the next being arranged.
pub const REMATCH_PAUSE: Duration = Duration::from_secs(5);

/// One queue position. A waiting client's session is owned by the lobby;
/// a spectating client's session is owned by its chat task, which holds
/// the seat through this handle until the room closes.
pub enum Seat {
    Waiting(Session),
    Spectating(SpectatorSeat),
}

pub struct SpectatorSeat {
    pub username: String,
    pub events: UnboundedSender<ChatEvent>,
    pub task: JoinHandle<Option<Session>>,
}

#[derive(Default)]
struct LobbyState {
    seats: VecDeque<Seat>,
    game_running: bool,
    /// Username currently granted a reconnect window.
    disconnected: Option<String>,
    /// Freshly arrived session whose username matched the window.
    reconnected: Option<Session>,
}

/// Where a new arrival ended up.
pub enum Admitted {
    /// Seated as a spectator; a chat task now owns the session.
    Spectating,
    /// Seated in the waiting queue.
    Waiting,
    /// Seated, and this arrival should drive matchmaking.
    StartMatch,
    /// No room; the session comes back for the rejection notice.
    Full(Session),
}

pub struct Lobby {
    state: Mutex<LobbyState>,
}

impl Lobby {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(LobbyState::default()) })
    }

    fn locked(&self) -> MutexGuard<'_, LobbyState> {
        self.state.lock().unwrap()
    }

    pub fn is_full(&self) -> bool {
        self.locked().seats.len() >= MAX_QUEUE
    }

    pub fn game_running(&self) -> bool {
        self.locked().game_running
    }

    /// Re-arm matchmaking after the inter-match pause: true when the queue
    /// still holds two clients and no other driver claimed the flight.
    pub fn try_begin_match(&self) -> bool {
        let mut state = self.locked();
        if !state.game_running && state.seats.len() >= 2 {
            state.game_running = true;
            true
        } else {
            false
        }
    }

    /// Park a reconnecting session if its username matches the granted
    /// window; hands the session back otherwise.
    pub fn offer_reconnect(&self, session: Session) -> Result<(), Session> {
        let mut state = self.locked();
        match &state.disconnected {
            Some(name) if *name == session.username => {
                state.reconnected = Some(session);
                Ok(())
            }
            _ => Err(session),
        }
    }

    /// Open a reconnect window for a player who just dropped mid-match.
    pub fn grant_reconnect(&self, username: &str) {
        let mut state = self.locked();
        state.disconnected = Some(username.to_string());
        state.reconnected = None;
    }

    /// Claim the parked session if it matches the open window, clearing
    /// both slots.
    pub fn claim_reconnected(&self) -> Option<Session> {
        let mut state = self.locked();
        let matched = match (&state.disconnected, &state.reconnected) {
            (Some(name), Some(session)) => *name == session.username,
            _ => false,
        };
        if matched {
            state.disconnected = None;
            state.reconnected.take()
        } else {
            None
        }
    }

    /// Close the reconnect window, discarding any unclaimed session.
    pub fn revoke_reconnect(&self) {
        let mut state = self.locked();
        state.disconnected = None;
        state.reconnected = None;
    }

    /// Pull two live clients off the head of the queue, probing each with
    /// an `ACK` echo. Clients that fail the probe are dropped. `None` when
    /// the queue runs dry; any extracted client goes back to the front.
    pub async fn extract_live_pair(&self, log: &Arc<Logger>) -> Option<(Session, Session)> {
        let mut first: Option<Session> = None;
        loop {
            let head = self.locked().seats.pop_front();
            let mut session = match head {
                Some(Seat::Waiting(session)) => session,
                Some(other) => {
                    // Still owned by a winding-down chat task; leave it be.
                    self.locked().seats.push_front(other);
                    return self.abort_extraction(first);
                }
                None => return self.abort_extraction(first),
            };
            if !session.probe().await {
                log.info(format!(
                    "dropping unresponsive client {:?} from the queue",
                    session.username
                ));
                continue;
            }
            match first.take() {
                None => first = Some(session),
                Some(live) => return Some((live, session)),
            }
        }
    }

    fn abort_extraction(&self, first: Option<Session>) -> Option<(Session, Session)> {
        if let Some(session) = first {
            self.locked().seats.push_front(Seat::Waiting(session));
        }
        None
    }

    /// Atomically end the match flight and pull every spectator seat out
    /// for closing. With `game_running` cleared in the same critical
    /// section, later arrivals can no longer join the closing room.
    pub(crate) fn drain_spectators(&self) -> Vec<SpectatorSeat> {
        let mut state = self.locked();
        state.game_running = false;
        let mut kept = VecDeque::with_capacity(state.seats.len());
        let mut drained = Vec::new();
        while let Some(seat) = state.seats.pop_front() {
            match seat {
                Seat::Spectating(spectator) => drained.push(spectator),
                waiting => kept.push_back(waiting),
            }
        }
        state.seats = kept;
        drained
    }

    /// Seat returning spectators at the front, oldest first.
    pub(crate) fn restore_spectators(&self, sessions: Vec<Session>) {
        let mut state = self.locked();
        for session in sessions.into_iter().rev() {
            state.seats.push_front(Seat::Waiting(session));
        }
    }

    pub fn requeue_front(&self, session: Session) {
        self.locked().seats.push_front(Seat::Waiting(session));
    }

    pub fn requeue_back(&self, session: Session) {
        self.locked().seats.push_back(Seat::Waiting(session));
    }

    /// Relay a chat line to every spectator. The origin sees its own echo;
    /// server-side match events use the `BROADCAST` origin.
    pub fn broadcast_chat(&self, origin: &str, text: &str) {
        let state = self.locked();
        for seat in &state.seats {
            if let Seat::Spectating(spectator) = seat {
                let _ = spectator.events.send(ChatEvent::Chat {
                    origin: origin.to_string(),
                    text: text.to_string(),
                });
            }
        }
    }

    /// Push a rendered board block to every spectator.
    pub fn broadcast_board(&self, block: String) {
        let state = self.locked();
        for seat in &state.seats {
            if let Seat::Spectating(spectator) = seat {
                let _ = spectator.events.send(ChatEvent::Board(block.clone()));
            }
        }
    }
}

/// Seat a newcomer: spectator chat while a match runs, the waiting queue
/// otherwise. Reaching two waiting clients with no match in flight claims
/// the matchmaking flight for this arrival.
pub fn admit(lobby: &Arc<Lobby>, session: Session, log: &Arc<Logger>) -> Admitted {
    let mut state = lobby.locked();
    if state.seats.len() >= MAX_QUEUE {
        return Admitted::Full(session);
    }
    if state.game_running {
        let seat = spectate::spawn(session, Arc::clone(lobby), Arc::clone(log));
        state.seats.push_back(Seat::Spectating(seat));
        return Admitted::Spectating;
    }
    state.seats.push_back(Seat::Waiting(session));
    if state.seats.len() >= 2 {
        state.game_running = true;
        Admitted::StartMatch
    } else {
        Admitted::Waiting
    }
}

/// Move every waiting client into the spectator chat room.
pub fn open_chat_room(lobby: &Arc<Lobby>, log: &Arc<Logger>) {
    let mut state = lobby.locked();
    let seats = std::mem::take(&mut state.seats);
    state.seats = seats
        .into_iter()
        .map(|seat| match seat {
            Seat::Waiting(session) => {
                Seat::Spectating(spectate::spawn(session, Arc::clone(lobby), Arc::clone(log)))
            }
            occupied => occupied,
        })
        .collect();
}

/// Drive matchmaking to exhaustion: extract a live pair, chaperone the
/// match, close the chat room, requeue the leftovers, and go again after
/// the inter-match pause while the queue can still seat a game.
pub async fn run_matchmaker(lobby: Arc<Lobby>, log: Arc<Logger>) {
    loop {
        let Some((p0, p1)) = lobby.extract_live_pair(&log).await else {
            log.verbose("not enough live clients; matchmaking stands down");
            spectate::close_chat_room(&lobby, &log).await;
            return;
        };
        open_chat_room(&lobby, &log);
        let ended = game::run_match(&lobby, &log, p0, p1).await;
        spectate::close_chat_room(&lobby, &log).await;
        for session in ended.requeue_front {
            lobby.requeue_front(session);
        }
        for session in ended.requeue_back {
            lobby.requeue_back(session);
        }
        tokio::time::sleep(REMATCH_PAUSE).await;
        if !lobby.try_begin_match() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    async fn session_pair() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Session::new(server), client)
    }

    async fn named_session(name: &str) -> (Session, TcpStream) {
        let (mut session, client) = session_pair().await;
        session.username = name.to_string();
        (session, client)
    }

    /// Keep the client half of a session answering liveness probes.
    fn echo_acks(stream: TcpStream) {
        tokio::spawn(async move {
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim() == "ACK" {
                    let _ = write.write_all(b"ACK\n").await;
                }
            }
        });
    }

    #[tokio::test]
    async fn queue_rejects_the_eleventh_client() {
        let lobby = Lobby::new();
        let log = Arc::new(Logger::new(0));
        let mut clients = Vec::new();
        for i in 0..MAX_QUEUE {
            let (session, client) = named_session(&format!("player{i}")).await;
            clients.push(client);
            assert!(!matches!(admit(&lobby, session, &log), Admitted::Full(_)));
        }
        let (session, client) = named_session("latecomer").await;
        clients.push(client);
        assert!(matches!(admit(&lobby, session, &log), Admitted::Full(_)));
    }

    #[tokio::test]
    async fn second_waiting_client_claims_the_matchmaking_flight() {
        let lobby = Lobby::new();
        let log = Arc::new(Logger::new(0));
        let (first, _c1) = named_session("one").await;
        let (second, _c2) = named_session("two").await;
        assert!(matches!(admit(&lobby, first, &log), Admitted::Waiting));
        assert!(matches!(admit(&lobby, second, &log), Admitted::StartMatch));
        assert!(lobby.game_running());
        // The flight is already claimed; nobody else can grab it.
        assert!(!lobby.try_begin_match());
    }

    #[tokio::test]
    async fn extraction_probes_and_keeps_queue_order() {
        let lobby = Lobby::new();
        let log = Arc::new(Logger::new(0));
        for name in ["first", "second"] {
            let (session, client) = named_session(name).await;
            echo_acks(client);
            lobby.requeue_back(session);
        }
        let (a, b) = lobby.extract_live_pair(&log).await.unwrap();
        assert_eq!(a.username, "first");
        assert_eq!(b.username, "second");
    }

    #[tokio::test]
    async fn extraction_drops_a_dead_head_and_moves_on() {
        let lobby = Lobby::new();
        let log = Arc::new(Logger::new(0));

        let (dead, dead_client) = named_session("dead").await;
        drop(dead_client);
        lobby.requeue_back(dead);
        for name in ["alive", "kicking"] {
            let (session, client) = named_session(name).await;
            echo_acks(client);
            lobby.requeue_back(session);
        }

        let (a, b) = lobby.extract_live_pair(&log).await.unwrap();
        assert_eq!(a.username, "alive");
        assert_eq!(b.username, "kicking");
    }

    #[tokio::test]
    async fn lone_survivor_of_extraction_returns_to_the_front() {
        let lobby = Lobby::new();
        let log = Arc::new(Logger::new(0));
        let (session, client) = named_session("patient").await;
        echo_acks(client);
        lobby.requeue_back(session);

        assert!(lobby.extract_live_pair(&log).await.is_none());
        // Still seated, still first in line.
        let (again, _c) = named_session("newcomer").await;
        lobby.requeue_back(again);
        let state = lobby.locked();
        match state.seats.front().unwrap() {
            Seat::Waiting(s) => assert_eq!(s.username, "patient"),
            Seat::Spectating(_) => panic!("expected a waiting seat"),
        }
    }

    #[tokio::test]
    async fn survivor_requeued_at_the_front_outranks_the_queue() {
        let lobby = Lobby::new();
        let (waiting, _c1) = named_session("waiting").await;
        lobby.requeue_back(waiting);
        let (survivor, _c2) = named_session("survivor").await;
        lobby.requeue_front(survivor);

        let state = lobby.locked();
        let order: Vec<&str> = state
            .seats
            .iter()
            .map(|seat| match seat {
                Seat::Waiting(s) => s.username.as_str(),
                Seat::Spectating(s) => s.username.as_str(),
            })
            .collect();
        assert_eq!(order, ["survivor", "waiting"]);
    }

    #[tokio::test]
    async fn reconnect_slot_matches_username_only() {
        let lobby = Lobby::new();
        lobby.grant_reconnect("bob");

        let (alice, _c1) = named_session("alice").await;
        assert!(lobby.offer_reconnect(alice).is_err());

        let (bob, _c2) = named_session("bob").await;
        assert!(lobby.offer_reconnect(bob).is_ok());

        let claimed = lobby.claim_reconnected().unwrap();
        assert_eq!(claimed.username, "bob");
        // Both slots cleared by the claim.
        assert!(lobby.claim_reconnected().is_none());
        let (bob2, _c3) = named_session("bob").await;
        assert!(lobby.offer_reconnect(bob2).is_err());
    }

    #[tokio::test]
    async fn revoked_window_discards_the_parked_session() {
        let lobby = Lobby::new();
        lobby.grant_reconnect("bob");
        let (bob, _c) = named_session("bob").await;
        lobby.offer_reconnect(bob).unwrap();

        lobby.revoke_reconnect();
        assert!(lobby.claim_reconnected().is_none());
    }
}
