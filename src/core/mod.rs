//! Core indexing pipeline: shared context, event decoding, leader lease,
//! block synchronisation and orchestration.

pub mod context;
pub mod decoder;
pub mod indexer;
pub mod lease;
pub mod sync;
