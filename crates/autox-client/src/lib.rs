pub mod collection;
pub mod transport;

pub use collection::CollectionCache;
pub use transport::ReqwestTransport;
