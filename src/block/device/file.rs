use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use crate::block::device::driver::{BlockDevice, DeviceError, Direction};
use crate::common::types::{BlockData, BlockNo, DeviceId, BLOCK_SIZE};

const IMAGE_MAGIC: u32 = 0x474d_564c; // "GMVL"
const IMAGE_VERSION: u16 = 1;
const HEADER_SIZE: u64 = 16;

/// File-backed single-volume block device.
///
/// The image starts with a fixed header recording the block size, followed
/// by blocks at fixed offsets. Blocks that were never written read as
/// zeroes.
pub struct FileDisk {
    file: Mutex<File>,
}

impl FileDisk {
    /// Open a volume image at `path`, creating and formatting it if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if file.metadata()?.len() == 0 {
            Self::write_header(&mut file)?;
        } else {
            Self::check_header(&mut file)?;
        }

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn write_header(file: &mut File) -> Result<(), DeviceError> {
        file.seek(SeekFrom::Start(0))?;
        file.write_u32::<LittleEndian>(IMAGE_MAGIC)?;
        file.write_u16::<LittleEndian>(IMAGE_VERSION)?;
        file.write_u16::<LittleEndian>(0)?; // reserved
        file.write_u64::<LittleEndian>(BLOCK_SIZE as u64)?;
        file.flush()?;
        Ok(())
    }

    fn check_header(file: &mut File) -> Result<(), DeviceError> {
        file.seek(SeekFrom::Start(0))?;
        let magic = file.read_u32::<LittleEndian>()?;
        let version = file.read_u16::<LittleEndian>()?;
        let _reserved = file.read_u16::<LittleEndian>()?;
        let block_size = file.read_u64::<LittleEndian>()?;
        if magic != IMAGE_MAGIC || version != IMAGE_VERSION || block_size != BLOCK_SIZE as u64 {
            return Err(DeviceError::BadImage);
        }
        Ok(())
    }

    fn block_offset(blockno: BlockNo) -> u64 {
        HEADER_SIZE + blockno as u64 * BLOCK_SIZE as u64
    }
}

impl BlockDevice for FileDisk {
    fn transfer(
        &self,
        _dev: DeviceId,
        blockno: BlockNo,
        data: &mut BlockData,
        dir: Direction,
    ) -> Result<(), DeviceError> {
        let offset = Self::block_offset(blockno);
        let mut file = self.file.lock();

        match dir {
            Direction::Read => {
                let file_size = file.metadata()?.len();
                if offset >= file_size {
                    data.fill(0);
                    return Ok(());
                }
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(data)?;
            }
            Direction::Write => {
                let file_size = file.metadata()?.len();
                if offset > file_size {
                    // Pad the gap so blocks stay at fixed offsets.
                    file.seek(SeekFrom::Start(file_size))?;
                    let zeroes = vec![0u8; (offset - file_size) as usize];
                    file.write_all(&zeroes)?;
                }
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(data)?;
                file.flush()?;
            }
        }

        Ok(())
    }
}
