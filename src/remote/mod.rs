//! Remote document store seam.

pub mod traits;
pub mod memory;

pub use traits::{
    ChangeEvent, ChangeType, Document, QueryFilter, RemoteError, RemoteStore, TransactionWrite,
    WriteAction,
};
pub use memory::MemoryRemote;
