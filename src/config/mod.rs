pub mod loader;
pub mod schema;
pub mod watcher;

pub use loader::{ValidationReport, load_from_path, parse, validate};
pub use schema::ConfigSnapshot;
pub use watcher::ConfigWatcher;
