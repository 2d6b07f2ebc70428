use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber on stderr so stdout stays machine readable.
/// `RUST_LOG` wins over `configured`; `verbose` adds interpreter debug
/// output on top of either.
pub fn install_tracing(configured: &str, verbose: bool) {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    if verbose {
        if let Ok(directive) = "rigvm_core=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
