use tracing_subscriber::EnvFilter;

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(logging_enabled: bool) -> &'static str {
    if logging_enabled {
        "info"
    } else {
        "warn"
    }
}

/// Install the global fmt subscriber. `RUST_LOG` wins over the config flag.
pub fn init(logging_enabled: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(logging_enabled)));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_follows_flag() {
        assert_eq!(default_directive(true), "info");
        assert_eq!(default_directive(false), "warn");
    }
}
