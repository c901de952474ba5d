pub mod list;

pub use list::ListController;
