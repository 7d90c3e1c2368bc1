use tracing_subscriber::{fmt, EnvFilter};

/// Default filter directive for the CLI verbosity flags. `quiet` wins.
pub fn default_directive(quiet: bool, verbose: bool) -> &'static str {
    if quiet {
        "warn"
    } else if verbose {
        "img_fanout=debug,info"
    } else {
        "info"
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over the flags. A second call is a no-op.
pub fn init(quiet: bool, verbose: bool, json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(quiet, verbose)));

    let builder = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // Ignore the error from a subscriber that is already installed.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false, false), "info");
        assert_eq!(default_directive(false, true), "img_fanout=debug,info");
        assert_eq!(default_directive(true, true), "warn");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(true, false, false);
        init(false, true, true);
    }
}
