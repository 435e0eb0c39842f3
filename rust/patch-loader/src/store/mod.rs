// rust/patch-loader/src/store/mod.rs

//! Backing-store boundary.
//!
//! The loader never owns the store connection. Callers construct a client
//! that implements [`RowStore`] and hand it to every component as an
//! `Arc<dyn RowStore>`; there is no process-wide session.
//!
//! # Example
//!
//! ```no_run
//! use patch_loader::store::{MemoryStore, RowStore};
//! use patch_loader::{ClassLabel, RowKey, SampleId};
//! use bytes::Bytes;
//!
//! # async fn example() -> patch_loader::Result<()> {
//! let store = MemoryStore::new();
//! let key = RowKey::new(SampleId::new("case-1"), ClassLabel::new(0), 0, 0, 0);
//! store.insert(key.clone(), Bytes::from_static(b"patch"));
//!
//! let record = store.resolve(&key).await?;
//! assert_eq!(record.label, 1);
//! # Ok(())
//! # }
//! ```

mod memory;
mod traits;

pub use memory::MemoryStore;
pub use traits::RowStore;
