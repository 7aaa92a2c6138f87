// Manual ship placement. Both players place in parallel, each walked
// through the fleet by its own worker task under a single wall-clock
// deadline covering the whole phase.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use crate::board::{self, Board, FLEET, Orientation};
use crate::frame::Tag;
use crate::logger::Logger;
use crate::session::{NetError, Session};

/// Wall-clock budget for a player's entire placement phase.
pub const PLACEMENT_WINDOW: Duration = Duration::from_secs(180);

/// How one player's placement phase ended.
pub enum PlacementEnd {
    Ready { session: Session, board: Board },
    /// The deadline lapsed; the client was told (`X`) and closed.
    TimedOut,
    Disconnected,
}

/// Run both players' manual placement in parallel.
pub async fn run_placement_phase(
    first: Session,
    second: Session,
    log: &Arc<Logger>,
) -> (PlacementEnd, PlacementEnd) {
    let a = tokio::spawn(place_ships(first, Arc::clone(log)));
    let b = tokio::spawn(place_ships(second, Arc::clone(log)));
    let (a, b) = tokio::join!(a, b);
    (
        a.unwrap_or(PlacementEnd::Disconnected),
        b.unwrap_or(PlacementEnd::Disconnected),
    )
}

/// Walk one player through placing the whole fleet. The deadline covers
/// the phase, not each ship.
pub async fn place_ships(mut session: Session, log: Arc<Logger>) -> PlacementEnd {
    let deadline = Instant::now() + PLACEMENT_WINDOW;
    let mut board = Board::new();

    if session.send(Tag::Info, "[Ship Placement] Enter coordinates as prompted:").await.is_err()
        || session.send(Tag::Info, "Please place your ships manually on the board.").await.is_err()
    {
        return PlacementEnd::Disconnected;
    }

    for (name, size) in FLEET {
        if session.send_grid(&board.render(true)).await.is_err()
            || session.send(Tag::Info, &format!("Placing your {name} (size {size}).")).await.is_err()
            || send_instructions(&mut session).await.is_err()
        {
            return PlacementEnd::Disconnected;
        }

        loop {
            let line = tokio::select! {
                biased;
                _ = sleep_until(deadline) => {
                    log.info(format!("{} timed out during ship placement", session.username));
                    session.terminate().await;
                    return PlacementEnd::TimedOut;
                }
                line = session.recv_line() => match line {
                    Ok(line) => line,
                    Err(_) => return PlacementEnd::Disconnected,
                },
            };
            if line.is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(coord), Some(orient), None) = (parts.next(), parts.next(), parts.next())
            else {
                if rebuke(&mut session, "[!] Invalid Input Format").await.is_err() {
                    return PlacementEnd::Disconnected;
                }
                continue;
            };
            let Some((row, col)) = board::parse_coordinate(coord) else {
                let notice = "[!] Invalid coordinate: must be A-J followed by 1-10";
                if rebuke(&mut session, notice).await.is_err() {
                    return PlacementEnd::Disconnected;
                }
                continue;
            };
            let Some(orientation) = Orientation::parse(orient) else {
                let notice = "[!] Invalid orientation. Please enter 'H' or 'V'.";
                if rebuke(&mut session, notice).await.is_err() {
                    return PlacementEnd::Disconnected;
                }
                continue;
            };
            if board.place(name, size, row, col, orientation).is_err() {
                let notice = format!(
                    "[!] Cannot place {name} at {coord} (orientation={}). Try again.",
                    orient.to_ascii_uppercase()
                );
                if rebuke(&mut session, &notice).await.is_err() {
                    return PlacementEnd::Disconnected;
                }
                continue;
            }
            break;
        }
    }

    if session.send_grid(&board.render(true)).await.is_err()
        || session
            .send(Tag::Status, "Placement finished. Here is your board. Waiting for opponent...")
            .await
            .is_err()
    {
        return PlacementEnd::Disconnected;
    }
    PlacementEnd::Ready { session, board }
}

/// A rejection notice followed by fresh instructions.
async fn rebuke(session: &mut Session, notice: &str) -> Result<(), NetError> {
    session.send(Tag::Info, notice).await?;
    send_instructions(session).await
}

async fn send_instructions(session: &mut Session) -> Result<(), NetError> {
    session.send(Tag::Info, "For Coordinate, enter row letter followed by number column").await?;
    session.send(Tag::Info, "For Orientation, enter 'H' (horizontal) or 'V' (vertical)").await?;
    session.send(Tag::Prompt, "Enter starting coordinate and orientation (e.g. A1 H):").await
}
