pub mod cache;
pub mod device;
