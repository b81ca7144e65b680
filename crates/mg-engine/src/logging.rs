//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber. `RUST_LOG` takes precedence over
/// `default_filter`.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    #[test]
    fn second_init_is_a_no_op() {
        super::init("warn");
        assert!(!super::init("debug"));
    }
}
