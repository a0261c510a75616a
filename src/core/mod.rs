// Core modules implementing identity, caching, storage, locking, and error modeling.
pub mod cache;
pub mod error;
pub mod identity;
pub mod key_lock;
pub mod label;
pub mod lock;
pub mod store;
pub mod timestamp;
