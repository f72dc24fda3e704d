pub mod database;
pub mod lambda;
pub mod storage;
