// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A growable, contiguous byte buffer backing the framed I/O layer's partial reads and pending
//! writes.

use std::{
    alloc::{self, Layout},
    borrow::{Borrow, BorrowMut},
    io::Write,
    ops::{Deref, DerefMut},
    ptr::{copy, copy_nonoverlapping, NonNull},
};

/// A growable, contiguous byte buffer.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    cap: usize,
    read_offset: usize,
    write_offset: usize,
    desired_capacity: usize,
}

// Safety: `Buffer` owns its allocation exclusively; no aliasing raw pointers escape it.
unsafe impl Send for Buffer {}

impl Buffer {
    /// Creates a new `Buffer`, eagerly allocating towards `desired_capacity`.
    pub fn new(desired_capacity: usize) -> Self {
        let mut result = Self {
            ptr: NonNull::dangling(),
            cap: 0, // `grow_to_capacity` will set this
            read_offset: 0,
            write_offset: 0,
            desired_capacity: desired_capacity.next_power_of_two(),
        };

        if desired_capacity > 0 {
            result.desired_capacity = 2;
            result.grow();
        }
        result
    }

    /// Reserves at least `capacity` additional bytes of write space.
    pub fn reserve(&mut self, capacity: usize) {
        self.grow_to_capacity(self.cap + capacity);
    }

    /// The number of unread bytes currently available.
    pub fn remaining(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// The capacity available for writing before the buffer must grow.
    pub fn remaining_mut(&self) -> usize {
        self.cap - self.write_offset
    }

    /// Pointer to the first unread byte. Valid for `remaining()` bytes.
    fn read_ptr(&self) -> *mut u8 {
        // Safety: `read_offset <= write_offset <= cap`, maintained by `mark_read`/`mark_written`,
        // so the resulting pointer stays within the allocated object.
        unsafe { self.ptr.as_ptr().add(self.read_offset) }
    }

    /// Pointer to the first writable byte. Valid for `remaining_mut()` bytes.
    fn write_ptr(&self) -> *mut u8 {
        // Safety: `write_offset <= cap`, maintained by `mark_written`/`grow_to_capacity`.
        unsafe { self.ptr.as_ptr().add(self.write_offset) }
    }

    /// Marks `amount` bytes as consumed, freeing them for later compaction.
    pub fn mark_read(&mut self, amount: usize) {
        self.read_offset = self.write_offset.min(self.read_offset + amount);
        self.compact();
    }

    /// Marks `amount` bytes as written. The next write will begin after them.
    pub fn mark_written(&mut self, amount: usize) {
        self.write_offset = self.cap.min(self.write_offset + amount);
    }

    fn grow(&mut self) {
        let new_cap = if self.cap == 0 {
            self.desired_capacity
        } else {
            2 * self.cap
        };

        self.grow_to_capacity(new_cap);
    }

    /// Grows to at least `capacity`, rounded up to the next power of two.
    fn grow_to_capacity(&mut self, capacity: usize) {
        assert!(capacity <= isize::MAX as usize);

        let new_cap = capacity.next_power_of_two().min(isize::MAX as usize);

        let new_layout = Layout::array::<u8>(new_cap).unwrap();
        let new_ptr = if self.cap == 0 {
            // Safety: allocation failure is handled below; layout is not zero-sized.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::array::<u8>(self.cap).unwrap();
            let old_ptr = self.ptr.as_ptr();

            // Safety: `old_ptr` was allocated with `old_layout`; allocation failure handled below.
            unsafe { alloc::realloc(old_ptr, old_layout, new_layout.size()) }
        };

        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }

    /// Resets to an empty buffer, freeing excess capacity above `desired_capacity`.
    fn clear(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;

        if self.cap > self.desired_capacity {
            let layout = Layout::array::<u8>(self.cap).unwrap();

            // Safety: `self.ptr` was allocated with `layout`; allocation failure handled below.
            let new_ptr = unsafe { alloc::realloc(self.ptr.as_ptr(), layout, self.desired_capacity) };

            self.ptr = match NonNull::new(new_ptr) {
                Some(p) => p,
                None => alloc::handle_alloc_error(layout),
            };
            self.cap = self.desired_capacity;
        }
    }

    /// Shifts unread bytes to the front of the buffer once enough has been consumed, avoiding an
    /// unbounded drift of `read_offset`/`write_offset` towards `cap`.
    fn compact(&mut self) {
        if self.remaining() == 0 {
            self.clear();
            return;
        }

        if self.cap == self.desired_capacity {
            return;
        }

        if self.read_offset > self.desired_capacity {
            if self.remaining() < self.read_offset {
                // Safety: the source and destination ranges do not overlap, since `remaining()`
                // bytes starting at `read_ptr()` is strictly smaller than `read_offset`.
                unsafe { copy_nonoverlapping(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            } else {
                // Safety: both ranges lie within the single allocation backing `self.ptr`.
                unsafe { copy(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            }

            self.write_offset = self.remaining();
            self.read_offset = 0;
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // Safety: `self.ptr` was allocated with `layout` and is not used after this point.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

impl Borrow<[u8]> for Buffer {
    fn borrow(&self) -> &[u8] {
        // Safety: `read_ptr()` is valid for `remaining()` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.read_ptr(), self.remaining()) }
    }
}

impl BorrowMut<[u8]> for Buffer {
    fn borrow_mut(&mut self) -> &mut [u8] {
        // Safety: `write_ptr()` is valid for `remaining_mut()` bytes, exclusively borrowed here.
        unsafe { std::slice::from_raw_parts_mut(self.write_ptr(), self.remaining_mut()) }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.borrow()
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.borrow_mut()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.remaining_mut() < buf.len() {
            self.reserve(buf.len());
        }
        self.deref_mut()[0..buf.len()].clone_from_slice(buf);
        self.mark_written(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = Buffer::new(16);
        buf.write_all(b"hello world").unwrap();
        assert_eq!(buf.remaining(), 11);
        assert_eq!(&buf[..], b"hello world");
        buf.mark_read(5);
        assert_eq!(&buf[..], b" world");
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = Buffer::new(4);
        let data = vec![7u8; 1000];
        buf.write_all(&data).unwrap();
        assert_eq!(buf.remaining(), 1000);
        assert_eq!(&buf[..], &data[..]);
    }

    #[test]
    fn compacts_once_drained() {
        let mut buf = Buffer::new(8);
        buf.write_all(&[1, 2, 3, 4]).unwrap();
        buf.mark_read(4);
        assert_eq!(buf.remaining(), 0);
        buf.write_all(&[9, 9]).unwrap();
        assert_eq!(&buf[..], &[9, 9]);
    }
}
