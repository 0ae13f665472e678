use tracing::Level;

/// Initialize tracing/logging for the application.
///
/// `level` is one of `error`, `warn`, `info`, `debug` or `trace`; anything
/// unrecognised falls back to `info`.
pub fn init(level: &str) {
    let level = level.trim().parse::<Level>().unwrap_or(Level::INFO);

    // try_init so tests and repeated calls do not panic on an installed subscriber
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::init;

    #[test]
    fn init_accepts_levels_and_repeated_calls() {
        init("info");
        init("DEBUG");
        init("warn");
        init("not-a-level");
    }
}
