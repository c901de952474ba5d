// ============================================================================
// Refresh Coordination
// ============================================================================
//
// Refreshes are deduplicated per cache key inside a refresh scope: while one
// is in flight, every other caller for the key attaches to it. The scope is
// an ordinary value owned by a session, not a process global, so tests and
// concurrent sessions stay isolated.
//
// ============================================================================

pub mod cache_key;
pub mod refresher;
pub mod scope;
pub mod session;

pub use cache_key::CacheKey;
pub use refresher::{RefreshOutcome, RefreshStatus, Refresher};
pub use scope::RefreshScope;
pub use session::Session;
