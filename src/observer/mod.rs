pub mod keyed;

pub use keyed::KeyedObserver;
