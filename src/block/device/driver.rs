use std::io;

use thiserror::Error;

use crate::common::types::{BlockData, BlockNo, DeviceId};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("not a volume image: bad header")]
    BadImage,
}

/// Transfer direction of a single block operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// A device that moves whole blocks between memory and backing storage.
///
/// Transfers are synchronous and may block the calling context; the cache
/// never holds a bucket lock across a call.
pub trait BlockDevice: Send + Sync {
    fn transfer(
        &self,
        dev: DeviceId,
        blockno: BlockNo,
        data: &mut BlockData,
        dir: Direction,
    ) -> Result<(), DeviceError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for std::sync::Arc<D> {
    fn transfer(
        &self,
        dev: DeviceId,
        blockno: BlockNo,
        data: &mut BlockData,
        dir: Direction,
    ) -> Result<(), DeviceError> {
        (**self).transfer(dev, blockno, data, dir)
    }
}
