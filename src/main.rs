fn main() {
    println!("Broadside - Multiplayer Network Battleship");
    println!();
    println!("Usage:");
    println!("  Start the server:   cargo run --bin server");
    println!("  Connect a client:   cargo run --bin client [host:port]");
    println!();
    println!("The server listens on 127.0.0.2:5000 by default.");
    println!("Two clients make a match; everyone else spectates with chat.");
}
