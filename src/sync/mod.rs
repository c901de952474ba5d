// ============================================================================
// Synchronization
// ============================================================================
//
// A remote listing arrives as a stream of pages of raw JSON records. The
// decoder turns each record into an entity plus the predicate that finds
// its local copy; the synchronizer merges every page into the store as one
// batch and, for authoritative listings, removes what the server no longer
// lists.
//
// ============================================================================

pub mod decoder;
pub mod remote;
pub mod report;
pub mod synchronizer;

pub use decoder::{FieldKind, JsonDecoder, RecordDecoder, id_string};
pub use remote::{Page, PageStream, RawRecord, RemoteFetch, from_pages};
pub use report::SyncReport;
pub use synchronizer::{SyncJob, SyncMode, SyncOperation, Synchronizer};
