//! Storage adapter traits.

mod adapter;

pub use adapter::StorageAdapter;
pub(crate) use adapter::InitFlag;
