//! Service layer module

pub mod index_service;
pub mod types;

pub use index_service::IndexService;
pub use types::*;
