pub mod engine;
pub mod index;

pub use index::{sanitize_filename, unique_stored_name, DeleteMode, StorageIndex, StoredFile};
