pub mod ids;
pub mod ctx;
pub mod message;
pub mod record;
pub mod priority;
pub mod counts;
pub mod events;

pub use ids::ItemId;
pub use ctx::ProcessContext;
pub use message::EnqueueOptions;
pub use record::{ItemMetadata, ItemStatus, QueueItem};
pub use priority::Priority;
pub use counts::ProcessingCounts;
pub use events::{QueueEvent, RetryCause};
