pub mod authenticator;
pub mod dispatcher;
pub mod key_store;
pub mod lambda;
pub mod memory_store;
pub mod orm_store;
pub mod records;
pub mod registry;
pub mod result_writer;
pub mod signer;
pub mod storage;
pub mod worker;
