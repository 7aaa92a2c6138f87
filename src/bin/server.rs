use broadside::lobby::Lobby;
use broadside::logger::Logger;
use broadside::server;
use clap::{ArgAction, Parser};
use std::sync::Arc;
use tokio::net::TcpListener;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name    = "server",
    version,
    about   = "Broadside - dedicated Battleship server",
    long_about = "Accepts TCP clients into a shared lobby, pairs them into\n\
                  two-player Battleship matches, and keeps everyone else in a\n\
                  spectator chat room. Protocol is line-delimited UTF-8."
)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.2:5000")]
    bind: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

// ── PROTOCOL SPEC ─────────────────────────────────────────────────────────────
//
// Server → Client (one line per message):
//   HHHHHHHH;T;BODY   — payload frame; CRC-32 of "T;BODY", tag T in 0..=6
//   ACK / NACK        — transport acknowledgement, also the liveness probe
//   GRID              — a board block follows: header, 10 rows, blank line
//   X                 — your session has been terminated
//
// Client → Server (raw lines, unframed):
//   ACK / NACK        — acknowledging (or rejecting) the last payload frame
//   quit              — forfeit / disconnect
//   chat <msg>        — chat to the opponent or the spectator room
//   anything else     — the answer to whatever the server last prompted

// ── ENTRY POINT ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let log = Arc::new(Logger::new(args.verbose));

    let listener = TcpListener::bind(&args.bind).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {}: {e}", args.bind);
        std::process::exit(1);
    });

    log.info(format!("Server listening on {}", args.bind));

    let lobby = Lobby::new();
    server::serve(listener, lobby, log).await;
}
