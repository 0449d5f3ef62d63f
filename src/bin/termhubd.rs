//! termhub daemon - long-lived PTY sessions behind a Unix socket.
//!
//! Thin wrapper so `cargo install termhub` ships the daemon; all logic
//! lives in [`termhubd::cli`].

fn main() -> anyhow::Result<()> {
    termhubd::cli::run()
}
