pub mod error;
pub mod unit;
pub mod worker;

pub use error::WorkerErr;
pub use unit::WorkerUnit;
pub use worker::Worker;
