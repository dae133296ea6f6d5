use thiserror::Error;

use crate::block::device::DeviceError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("device transfer failed: {0}")]
    Device(#[from] DeviceError),
}
