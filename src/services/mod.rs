pub mod assessments;
pub mod identity;
pub mod lifecycle;
pub mod page_cache;
pub mod partitioner;
pub mod questions;
pub mod reconciliation;
pub mod renderer;
pub mod storage;
pub mod submissions;
