pub mod client;
pub mod models;

pub use client::{HttpPageSource, PageRequest, PageSource, SourceError};
pub use models::Page;
