pub mod api;
pub mod document;
pub mod job;
pub mod summary;
