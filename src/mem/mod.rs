pub mod cow;
pub mod frame;

pub use cow::{handle_write_fault, FaultError};
pub use frame::{AllocError, CoreHandle, FrameAllocator};
