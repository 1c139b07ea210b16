pub mod timestamp;

pub use timestamp::Timestamp;
