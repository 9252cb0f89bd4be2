//! Persistent storage for point mappings.
//!
//! [`RedbMappingStore`] implements [`pointmap_core::MappingStore`] on top of
//! a single redb file holding device groups, device instances and mapping
//! records.

pub mod error;
pub mod mapping_store;

pub use error::{Error, Result};
pub use mapping_store::RedbMappingStore;
