use super::{event::Event, Error};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

pub type address = u64;

/// Allocation byte alignment in the device address space.
pub const ALIGNMENT_BYTES: u64 = 256;

/// First device address handed out by the allocator.
pub const BASE_ADDR: address = 0xC000_0000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub id: usize,
    pub name: Option<String>,
    pub start_addr: address,
    pub end_addr: address,
    /// Bytes requested by the caller, excluding alignment padding.
    pub num_bytes: u64,
}

impl Allocation {
    /// Bytes reserved in the address space, including padding.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        self.end_addr - self.start_addr
    }
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start_addr", &format_args!("{:#x}", self.start_addr))
            .field("size", &human_bytes::human_bytes(self.num_bytes as f64))
            .finish()
    }
}

/// Live allocations keyed by their address range.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Allocations(rangemap::RangeMap<address, Allocation>);

impl std::ops::Deref for Allocations {
    type Target = rangemap::RangeMap<address, Allocation>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Bump allocator over the device address space with capacity accounting.
///
/// Freed address ranges are not reused, which keeps stale buffer handles
/// from ever aliasing a newer allocation.
#[derive(Debug)]
pub(crate) struct Allocator {
    allocations: Allocations,
    next_addr: address,
    next_id: usize,
    reserved_bytes: u64,
    capacity_bytes: u64,
}

impl Allocator {
    pub(crate) fn new(capacity_bytes: u64) -> Self {
        Self {
            allocations: Allocations::default(),
            next_addr: BASE_ADDR,
            next_id: 1,
            reserved_bytes: 0,
            capacity_bytes,
        }
    }

    pub(crate) fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes
    }

    pub(crate) fn allocations(&self) -> &Allocations {
        &self.allocations
    }

    pub(crate) fn allocate(
        &mut self,
        num_bytes: u64,
        name: Option<String>,
    ) -> Result<Allocation, Error> {
        let available = self.capacity_bytes.saturating_sub(self.reserved_bytes);
        let too_large = Error::Allocation {
            requested: num_bytes,
            available,
        };
        // zero sized allocations still occupy one aligned slot
        let reserved = match utils::next_multiple(num_bytes, ALIGNMENT_BYTES) {
            Some(reserved) => reserved.max(ALIGNMENT_BYTES),
            None => return Err(too_large),
        };
        if reserved > available {
            return Err(too_large);
        }
        let start_addr = self.next_addr;
        let end_addr = start_addr.checked_add(reserved).ok_or(too_large)?;
        let allocation = Allocation {
            id: self.next_id,
            name,
            start_addr,
            end_addr,
            num_bytes,
        };
        assert!(
            !self.allocations.0.overlaps(&(start_addr..end_addr)),
            "overlapping memory allocation {allocation}"
        );
        self.allocations
            .0
            .insert(start_addr..end_addr, allocation.clone());
        self.next_id += 1;
        self.next_addr = end_addr;
        self.reserved_bytes += reserved;
        Ok(allocation)
    }

    pub(crate) fn deallocate(&mut self, id: usize, start_addr: address) -> Result<Allocation, Error> {
        let allocation = match self.allocations.0.get(&start_addr) {
            Some(allocation) if allocation.id == id => allocation.clone(),
            _ => return Err(Error::InvalidBuffer { id }),
        };
        self.allocations
            .0
            .remove(allocation.start_addr..allocation.end_addr);
        self.reserved_bytes -= allocation.reserved_bytes();
        Ok(allocation)
    }
}

/// Typed region of device memory.
///
/// Cloning a buffer (or creating a [`DeviceBuffer::view`]) yields another
/// handle to the same backing allocation.
pub struct DeviceBuffer<T> {
    pub(crate) allocation: Arc<Allocation>,
    pub(crate) storage: Arc<RwLock<Vec<T>>>,
    /// Element offset into the backing allocation.
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl<T> Clone for DeviceBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            allocation: Arc::clone(&self.allocation),
            storage: Arc::clone(&self.storage),
            offset: self.offset,
            len: self.len,
        }
    }
}

impl<T> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("allocation", &self.allocation.id)
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl<T> DeviceBuffer<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    /// Size of this buffer (or view) in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }

    /// Byte offset of this view relative to its backing allocation.
    #[must_use]
    pub fn byte_offset(&self) -> isize {
        (self.offset * std::mem::size_of::<T>()) as isize
    }

    /// Device address of the first element.
    #[must_use]
    pub fn addr(&self) -> address {
        self.allocation.start_addr + self.byte_offset() as u64
    }

    /// Sub-buffer of `len` elements starting `offset` elements into this one.
    pub fn view(&self, offset: usize, len: usize) -> Result<Self, Error> {
        let end = offset.checked_add(len);
        match end {
            Some(end) if end <= self.len => Ok(Self {
                allocation: Arc::clone(&self.allocation),
                storage: Arc::clone(&self.storage),
                offset: self.offset + offset,
                len,
            }),
            _ => Err(Error::OutOfBounds {
                offset,
                len,
                capacity: self.len,
            }),
        }
    }

    /// Whether both handles refer to the same backing allocation.
    #[must_use]
    pub fn same_allocation<U>(&self, other: &DeviceBuffer<U>) -> bool {
        self.allocation.id == other.allocation.id
    }

    /// Map the elements of this view for reading.
    ///
    /// Meant to be called from inside device commands.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [T]> {
        let (start, end) = (self.offset, self.offset + self.len);
        RwLockReadGuard::map(self.storage.read(), |data| &data[start..end])
    }

    /// Map the elements of this view for writing.
    ///
    /// Meant to be called from inside device commands.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [T]> {
        let (start, end) = (self.offset, self.offset + self.len);
        RwLockWriteGuard::map(self.storage.write(), |data| &mut data[start..end])
    }
}

/// Pending device to host copy.
#[derive(Debug)]
pub struct Readback<T> {
    pub(crate) event: Event,
    pub(crate) data: Arc<Mutex<Option<Vec<T>>>>,
}

impl<T> Readback<T> {
    /// Block until the copy completed and take the host data.
    pub fn wait(self) -> Result<Vec<T>, Error> {
        self.event.wait();
        self.event.result()?;
        let data = self.data.lock().take();
        data.ok_or_else(|| Error::DeviceFault {
            command: self.event.command().to_string(),
            message: "copy produced no data".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Allocator, ALIGNMENT_BYTES, BASE_ADDR};
    use crate::Error;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut allocator = Allocator::new(1 << 20);
        let a = allocator.allocate(100, Some("a".to_string())).unwrap();
        let b = allocator.allocate(0, None).unwrap();
        let c = allocator.allocate(300, None).unwrap();
        assert_eq!(a.start_addr, BASE_ADDR);
        assert_eq!(b.start_addr, BASE_ADDR + ALIGNMENT_BYTES);
        assert_eq!(c.start_addr, BASE_ADDR + 2 * ALIGNMENT_BYTES);
        assert_eq!(c.reserved_bytes(), 2 * ALIGNMENT_BYTES);
        assert_eq!(allocator.reserved_bytes(), 4 * ALIGNMENT_BYTES);
        assert_eq!(allocator.allocations().len(), 3);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut allocator = Allocator::new(1024);
        allocator.allocate(512, None).unwrap();
        let err = allocator.allocate(1024, None).unwrap_err();
        assert_eq!(
            err,
            Error::Allocation {
                requested: 1024,
                available: 512
            }
        );
    }

    #[test]
    fn request_near_address_space_limit_is_rejected() {
        let mut allocator = Allocator::new(1 << 20);
        for num_bytes in [u64::MAX, u64::MAX - 100] {
            assert_eq!(
                allocator.allocate(num_bytes, None),
                Err(Error::Allocation {
                    requested: num_bytes,
                    available: 1 << 20
                })
            );
        }
        assert_eq!(allocator.reserved_bytes(), 0);
        assert!(allocator.allocate(16, None).is_ok());
    }

    #[test]
    fn double_free_is_reported() {
        let mut allocator = Allocator::new(1024);
        let a = allocator.allocate(16, None).unwrap();
        allocator.deallocate(a.id, a.start_addr).unwrap();
        assert_eq!(allocator.reserved_bytes(), 0);
        assert_eq!(
            allocator.deallocate(a.id, a.start_addr),
            Err(Error::InvalidBuffer { id: a.id })
        );
    }
}
