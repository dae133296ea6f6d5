pub mod pte;

pub use pte::{AddressSpace, PageTableEntry, PteFlags};
