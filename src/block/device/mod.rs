pub mod driver;
pub mod file;
pub mod memory;

pub use driver::{BlockDevice, DeviceError, Direction};
pub use file::FileDisk;
pub use memory::MemDisk;
