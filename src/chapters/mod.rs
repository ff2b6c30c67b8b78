pub mod prune;
pub mod split;
pub mod store;

pub use store::{Chapter, ChapterStore};
