//! Structured logging setup for programs embedding the rotation core.

use tracing_subscriber::EnvFilter;

/// Install a JSON `tracing` subscriber filtered by `RUST_LOG`.
///
/// `default_directive` (e.g. `ca_rotation=info`) is added on top of the
/// environment filter together with `kube=info`. Fails if a directive does not
/// parse or a global subscriber is already installed.
pub fn init_tracing(
    default_directive: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(default_directive.parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .try_init()?;
    Ok(())
}
