pub mod backend;
pub mod elasticsearch;
pub mod memory;
pub mod searchable;
pub mod sync;

pub use backend::{SearchBackend, SearchError, SearchHits};
pub use elasticsearch::ElasticsearchBackend;
pub use memory::MemoryIndex;
pub use searchable::Searchable;
pub use sync::{IndexSync, PendingChanges, ReindexReport};
