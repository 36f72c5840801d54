//! See [`MsgBuffer`].

use std::ptr::NonNull;

/// Where a [`MsgBuffer`]'s memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOrigin {
    /// Carved from a [`crate::HugeAllocator`] arena; must be returned via
    /// [`crate::HugeAllocator::free`].
    Arena,
    /// Supplied by the caller (e.g. a response written directly into
    /// caller-owned memory). Never touches an allocator's freelists.
    External,
}

/// A zero-copy message handle: one contiguous region holding reserved
/// header space (`headroom`) immediately followed by the user-visible
/// payload.
///
/// Header and payload bytes of a single `MsgBuffer` always live in the same
/// registered memory region — the transport never needs scatter/gather to
/// send one.
pub struct MsgBuffer {
    /// Points at the first payload byte the user sees. `headroom` bytes
    /// immediately precede this address and belong to the same allocation.
    pub(crate) ptr: NonNull<u8>,
    pub(crate) headroom: usize,
    pub(crate) cap: usize,
    pub(crate) len: usize,
    pub(crate) origin: BufferOrigin,
    /// Size class index within the owning [`crate::HugeAllocator`].
    /// Meaningless for [`BufferOrigin::External`] buffers.
    pub(crate) class: usize,
    /// Slot index within that size class, used by `free` to return the
    /// buffer to the right freelist.
    pub(crate) slot: u32,
    #[cfg(debug_assertions)]
    pub(crate) generation: u32,
    complete: bool,
}

impl MsgBuffer {
    pub(crate) fn from_arena(
        ptr: NonNull<u8>,
        headroom: usize,
        cap: usize,
        class: usize,
        slot: u32,
        generation: u32,
    ) -> Self {
        #[cfg(not(debug_assertions))]
        let _ = generation;
        Self {
            ptr,
            headroom,
            cap,
            len: 0,
            origin: BufferOrigin::Arena,
            class,
            slot,
            #[cfg(debug_assertions)]
            generation,
            complete: false,
        }
    }

    /// Wraps caller-owned memory as a [`MsgBuffer`] without involving an
    /// allocator. Used for responses the handler writes directly into its
    /// own buffer rather than one carved from the arena.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `cap` bytes for as long
    /// as the returned `MsgBuffer` is alive.
    #[must_use]
    pub unsafe fn from_external(ptr: NonNull<u8>, cap: usize) -> Self {
        Self {
            ptr,
            headroom: 0,
            cap,
            len: 0,
            origin: BufferOrigin::External,
            class: usize::MAX,
            slot: u32::MAX,
            #[cfg(debug_assertions)]
            generation: 0,
            complete: false,
        }
    }

    /// Where this buffer came from.
    #[must_use]
    pub const fn origin(&self) -> BufferOrigin {
        self.origin
    }

    /// Whether this buffer must be returned to a [`crate::HugeAllocator`]'s
    /// freelist, as opposed to simply being dropped.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self.origin, BufferOrigin::External)
    }

    /// Payload capacity: the most bytes this buffer can ever hold.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.cap
    }

    /// Current valid payload length. Starts at `0` after allocation.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether `len() == 0`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The full writable capacity, for filling in a payload before calling
    /// [`MsgBuffer::set_len`].
    pub fn write_area(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is valid for `cap` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.cap) }
    }

    /// Marks `len` bytes (out of [`MsgBuffer::capacity`]) as valid payload.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`MsgBuffer::capacity`].
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.cap, "len exceeds buffer capacity");
        self.len = len;
    }

    /// Shrinks the valid payload length, e.g. when a response is smaller
    /// than the request buffer reserved for it.
    ///
    /// # Panics
    ///
    /// Panics if `new_len` is greater than the current length: this method
    /// only ever shrinks, matching `spec.md`'s "response that is smaller
    /// than reserved" use case.
    pub fn shrink(&mut self, new_len: usize) {
        assert!(new_len <= self.len, "shrink must not grow the buffer");
        self.len = new_len;
    }

    /// Valid payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len <= cap` bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Valid payload bytes, mutable.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is valid for `len <= cap` bytes.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// The reserved header region immediately preceding the payload, for
    /// the transport to write a packet header into without copying the
    /// payload.
    pub fn headroom_mut(&mut self) -> &mut [u8] {
        if self.headroom == 0 {
            return &mut [];
        }
        // SAFETY: `headroom` bytes immediately precede `ptr` within the
        // same allocation, by construction in `HugeAllocator::alloc`.
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().sub(self.headroom), self.headroom)
        }
    }

    /// Contiguous `headroom + len` view: the literal bytes to hand a
    /// [`erpc_io::Transport::post_send`] for a single-packet message, since
    /// a header written into [`MsgBuffer::headroom_mut`] sits immediately
    /// before the valid payload in the same allocation.
    pub fn wire_view(&mut self) -> &mut [u8] {
        // SAFETY: `headroom` bytes precede `ptr` and `len <= cap` bytes
        // follow it, all within the same allocation.
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().sub(self.headroom), self.headroom + self.len)
        }
    }

    /// Contiguous `headroom + capacity` view: the literal bytes to post as
    /// a raw [`erpc_io::Transport::post_recv`] target, before any header or
    /// length is known.
    pub fn wire_view_capacity(&mut self) -> &mut [u8] {
        // SAFETY: as `wire_view`, but spanning the buffer's full capacity
        // rather than only its currently valid payload length.
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().sub(self.headroom), self.headroom + self.cap)
        }
    }

    /// Marks this buffer's in-flight transfer (request or response) as
    /// complete. Purely a bookkeeping flag for the owning session slot;
    /// does not affect payload bytes.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Whether [`MsgBuffer::mark_complete`] has been called since the last
    /// [`MsgBuffer::reset`].
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Resets the buffer for reuse without returning it to the allocator:
    /// clears the length and completion flag.
    pub fn reset(&mut self) {
        self.len = 0;
        self.complete = false;
    }
}
