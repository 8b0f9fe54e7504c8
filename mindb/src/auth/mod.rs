//! Authentication: the user/privilege store (C6's durable half) plus the
//! signed-session layer, wired together the way the request pipeline
//! (C7) needs them — see spec.md §4.6 "session-then-basic".

pub mod session;
pub mod user_store;

pub use session::SessionStore;
pub use user_store::{Principal, Privilege, UserStore};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Starts the session store's periodic `CleanupExpired` tick (spec.md
/// §4.5). Returned handle is aborted by the lifecycle sequencer on
/// shutdown.
pub fn spawn_session_sweeper(store: Arc<SessionStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            store.cleanup_expired();
        }
    })
}
