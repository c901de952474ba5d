pub mod change;
pub mod engine;
pub mod memory;
pub mod notify;
pub mod table;

pub use change::{ChangeBatch, EntityChange};
pub use engine::{BatchOutcome, EntityStore, Observation, WriteBatch, WriteOp};
pub use memory::InMemoryStore;
pub use notify::{ChangeStream, StoreEvent, StoreSubscription};
pub use table::{EntitySchema, EntityTable};
