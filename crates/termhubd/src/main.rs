//! termhub daemon binary. See [`termhubd::cli`] for usage.

fn main() -> anyhow::Result<()> {
    termhubd::cli::run()
}
