//! Log setup for binaries embedding the queue.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application unless the `tracing-basic` feature is enabled.

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` selects debug output for this
/// crate, mirroring `app.debug`. Returns `false` if a subscriber was already
/// installed.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(debug: bool) -> bool {
    use tracing_subscriber::EnvFilter;

    let default = if debug {
        "info,tether_queue=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
