pub mod blobs;
pub mod fixture;
pub mod log;
pub mod memory;
