pub mod config;
pub mod conversation;
pub mod conversations;
pub mod error;
pub mod presenter;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

use tidings_shared::constants::APP_NAME;

pub use config::ClientConfig;
pub use conversation::{scroll_target, ConversationInteractor};
pub use conversations::ConversationsInteractor;
pub use error::ClientError;
pub use state::AppState;

/// Install the global subscriber.  `RUST_LOG` overrides the default filter.
/// Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("tidings_client=debug,tidings_sync=debug,tidings_view=info,tidings_store=info,warn")
    });

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Starting {APP_NAME} client");
    }
}
