use crate::util::bit_util;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt::{Debug, Formatter};
use std::ptr::{self, copy_nonoverlapping};
use std::slice;
use thiserror::Error;

const ALIGNMENT: usize = 64;

/// A contiguous, aligned array of fixed-capacity slots.
///
/// Slot `i` occupies bytes `[i * slot_size, (i + 1) * slot_size)`. The whole
/// region is a single allocation so a native call interface can address it as
/// a fixed-stride array of elements.
pub struct SlotBuffer {
    data: *mut u8,
    num_slots: usize,
    slot_size: usize,
    capacity: usize,
}

impl SlotBuffer {
    /// Allocates a zero-initialized buffer of `num_slots` slots of
    /// `slot_size` bytes each.
    pub fn new(num_slots: usize, slot_size: usize) -> Result<Self, AllocationError> {
        let len = num_slots
            .checked_mul(slot_size)
            .filter(|len| *len <= usize::max_value() - 63)
            .ok_or(AllocationError::TooLarge)?;
        let capacity = bit_util::round_upto_multiple_of_64(len);
        let data = if capacity == 0 {
            ptr::null_mut()
        } else {
            let data = unsafe { alloc_zeroed(Layout::from_size_align_unchecked(capacity, ALIGNMENT)) };
            if data.is_null() {
                return Err(AllocationError::Other);
            }
            data
        };
        Ok(Self {
            data,
            num_slots,
            slot_size,
            capacity,
        })
    }

    /// A zero-slot placeholder that owns no memory.
    pub(crate) const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            num_slots: 0,
            slot_size: 0,
            capacity: 0,
        }
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Returns the capacity of a single slot in bytes.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Returns the number of addressable bytes, `num_slots * slot_size`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_slots * self.slot_size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns slot `i` as a slice.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bound.
    pub fn slot(&self, i: usize) -> &[u8] {
        if i >= self.num_slots {
            panic!("slot index out of bound");
        }
        unsafe { slice::from_raw_parts(self.data.add(i * self.slot_size), self.slot_size) }
    }

    /// Returns slot `i` as a mutable slice.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bound.
    pub fn slot_mut(&mut self, i: usize) -> &mut [u8] {
        if i >= self.num_slots {
            panic!("slot index out of bound");
        }
        unsafe { slice::from_raw_parts_mut(self.data.add(i * self.slot_size), self.slot_size) }
    }

    /// Returns the raw pointer to the beginning of this buffer.
    #[must_use]
    pub fn raw_data(&self) -> *const u8 {
        self.data
    }

    /// Returns the raw mutable pointer to the beginning of this buffer.
    pub fn raw_data_mut(&mut self) -> *mut u8 {
        self.data
    }

    /// Grows every slot to `new_slot_size` bytes, moving each slot's current
    /// bytes to its new offset.
    ///
    /// The old buffer stays in place until the new one is fully populated, so
    /// a failed reallocation leaves the previous state observable. The new
    /// stride must not be smaller than the current one.
    pub fn restride(&mut self, new_slot_size: usize) -> Result<(), AllocationError> {
        debug_assert!(new_slot_size >= self.slot_size);
        let len = self
            .num_slots
            .checked_mul(new_slot_size)
            .filter(|len| *len <= usize::max_value() - 63)
            .ok_or(AllocationError::TooLarge)?;
        let capacity = bit_util::round_upto_multiple_of_64(len);
        let data = unsafe { alloc_zeroed(Layout::from_size_align_unchecked(capacity, ALIGNMENT)) };
        if data.is_null() {
            return Err(AllocationError::Other);
        }
        if !self.data.is_null() {
            for i in 0..self.num_slots {
                unsafe {
                    copy_nonoverlapping(
                        self.data.add(i * self.slot_size),
                        data.add(i * new_slot_size),
                        self.slot_size,
                    );
                }
            }
            unsafe {
                dealloc(
                    self.data,
                    Layout::from_size_align_unchecked(self.capacity, ALIGNMENT),
                );
            }
        }
        self.data = data;
        self.slot_size = new_slot_size;
        self.capacity = capacity;
        Ok(())
    }
}

impl Drop for SlotBuffer {
    fn drop(&mut self) {
        if !self.data.is_null() {
            unsafe {
                dealloc(
                    self.data,
                    Layout::from_size_align_unchecked(self.capacity, ALIGNMENT),
                );
            }
        }
    }
}

impl Debug for SlotBuffer {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "SlotBuffer {{ num_slots: {}, slot_size: {}, data: ",
            self.num_slots, self.slot_size
        )?;
        f.debug_list()
            .entries((0..self.num_slots).map(|i| self.slot(i)))
            .finish()?;
        write!(f, " }}")
    }
}

unsafe impl Send for SlotBuffer {}
unsafe impl Sync for SlotBuffer {}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("cannot allocate memory larger than usize::max_value() - 63 bytes")]
    TooLarge,
    #[error("allocation failed")]
    Other,
}

#[cfg(test)]
mod tests {
    use super::{AllocationError, SlotBuffer};

    #[test]
    fn new_zero_initialized() {
        let buf = SlotBuffer::new(3, 8).unwrap();
        assert_eq!(3, buf.num_slots());
        assert_eq!(8, buf.slot_size());
        assert_eq!(24, buf.len());
        assert!(!buf.is_empty());
        assert_eq!(&[0; 8], buf.slot(2));
    }

    #[test]
    fn slot_write_and_read() {
        let mut buf = SlotBuffer::new(2, 4).unwrap();
        buf.slot_mut(1)[..3].copy_from_slice(b"abc");
        assert_eq!(b"abc\0", buf.slot(1));
        assert_eq!(&[0; 4], buf.slot(0));
    }

    #[test]
    fn restride_preserves_slots() {
        let mut buf = SlotBuffer::new(3, 4).unwrap();
        buf.slot_mut(0).copy_from_slice(b"aaaa");
        buf.slot_mut(1)[..2].copy_from_slice(b"bb");
        buf.restride(8).unwrap();
        assert_eq!(8, buf.slot_size());
        assert_eq!(24, buf.len());
        assert_eq!(b"aaaa\0\0\0\0", buf.slot(0));
        assert_eq!(b"bb\0\0\0\0\0\0", buf.slot(1));
        assert_eq!(&[0; 8], buf.slot(2));
    }

    #[test]
    fn new_too_large() {
        assert!(matches!(
            SlotBuffer::new(usize::max_value(), 2),
            Err(AllocationError::TooLarge)
        ));
    }

    #[test]
    #[should_panic(expected = "slot index out of bound")]
    fn slot_out_of_bound() {
        let buf = SlotBuffer::new(1, 4).unwrap();
        let _ = buf.slot(1);
    }
}
