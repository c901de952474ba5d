// ============================================================================
// Live Collections
// ============================================================================
//
// A live collection presents a store query as sections of rows and keeps
// them current. Each committed store batch that touches the query becomes
// one batch of collection updates whose index paths are applied in order,
// each against the state left by the previous one.
//
// ============================================================================

pub mod diff;
pub mod live;
pub mod snapshot;

pub use diff::{CollectionUpdate, diff};
pub use live::{Collection, CollectionSubscription, LiveCollection, UpdateCallback};
pub use snapshot::{IndexPath, Section, Sections};
