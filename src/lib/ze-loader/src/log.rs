use once_cell::sync::OnceCell;
use tracing::Level;

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Install a debug-level fmt subscriber for the loader's diagnostics. Does nothing if the
/// application already installed a global subscriber, and runs at most once.
pub fn init_debug_trace() {
    INSTALLED.get_or_init(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            tracing::debug!("keeping the already-installed global subscriber");
        }
    });
}
