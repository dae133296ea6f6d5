use log::debug;
use thiserror::Error;

use crate::common::types::VirtAddr;
use crate::mem::frame::{AllocError, CoreHandle};
use crate::vm::{AddressSpace, PteFlags};

/// Why a write fault could not be resolved. Fatal to the faulting context,
/// not to the kernel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    #[error("write fault on an unmapped address {0:#x}")]
    NotMapped(VirtAddr),
    #[error("write fault on a non-copy-on-write mapping at {0:#x}")]
    NotCopyOnWrite(VirtAddr),
    #[error("out of memory resolving a copy-on-write fault at {0:#x}")]
    OutOfMemory(VirtAddr),
}

/// Resolve a write fault on a copy-on-write mapping.
///
/// A frame with a single reference is upgraded in place. A shared frame is
/// copied into a freshly allocated one and the entry retargeted; the old
/// frame's reference is then dropped, which reclaims it if the faulting
/// mapping was the last holder.
pub fn handle_write_fault(
    core: &CoreHandle<'_>,
    space: &mut dyn AddressSpace,
    va: VirtAddr,
) -> Result<(), FaultError> {
    let pte = space.translate(va).ok_or(FaultError::NotMapped(va))?;
    if !pte.is_valid() {
        return Err(FaultError::NotMapped(va));
    }
    if !pte.is_cow() {
        return Err(FaultError::NotCopyOnWrite(va));
    }

    let pool = core.pool();
    let old = pte.frame;

    if pool.reference_count(old) == 1 {
        // Sole owner: no copy, just make the mapping writable.
        pte.flags.remove(PteFlags::COW);
        pte.flags.insert(PteFlags::WRITE);
        return Ok(());
    }

    let new = match core.allocate() {
        Ok(frame) => frame,
        Err(AllocError::Exhausted) => return Err(FaultError::OutOfMemory(va)),
    };
    {
        let src = pool.page(old).read();
        let mut dst = pool.page(new).write();
        dst.copy_from_slice(&src[..]);
    }
    pte.frame = new;
    pte.flags.remove(PteFlags::COW);
    pte.flags.insert(PteFlags::WRITE);
    core.free(old);

    debug!("cow: copied frame {} to {} for va {:#x}", old, new, va);
    Ok(())
}
