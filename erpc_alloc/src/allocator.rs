//! See [`HugeAllocator`].

use std::ptr::NonNull;

use erpc_io::{IoError, Mr, Transport};
use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, munmap};
use tracing::{debug, error, trace};

use crate::{AllocError, BufferOrigin, HEADROOM, MIN_CLASS_BYTES, MsgBuffer};

/// Construction-time parameters for a [`HugeAllocator`].
#[derive(Debug, Clone)]
pub struct HugeAllocatorConfig {
    /// Capacity of the largest size class, i.e. the biggest single-packet
    /// jumbo payload this arena must hold. Rounded up to the next power of
    /// two.
    pub max_class_bytes: usize,
    /// Number of buffers reserved per size class. The arena's total size is
    /// fixed at construction: `buffers_per_class` buffers per class, across
    /// every class from one cache line up to `max_class_bytes`.
    pub buffers_per_class: usize,
    /// NUMA node to bind the arena to. `None` skips binding (e.g. on a
    /// single-node machine, or in tests without `CAP_SYS_NICE`).
    pub numa_node: Option<u32>,
}

impl Default for HugeAllocatorConfig {
    fn default() -> Self {
        Self {
            max_class_bytes: 8192,
            buffers_per_class: 64,
            numa_node: None,
        }
    }
}

struct SizeClass {
    /// Payload bytes available to the user in a buffer of this class.
    capacity: usize,
    /// Byte distance between consecutive buffers of this class:
    /// `HEADROOM + capacity`.
    stride: usize,
    /// Offset of this class's region within the arena.
    base_offset: usize,
    /// Stack of free buffer indices (LIFO, so recently-freed hot buffers
    /// are reused first).
    free: Vec<u32>,
    /// Generation tag per buffer index, bumped on every `alloc`. Used to
    /// detect double frees. Debug builds only.
    #[cfg(debug_assertions)]
    generations: Vec<u32>,
}

/// Hugepage-backed arena allocator. Carves one contiguous `mmap`'d,
/// NUMA-bound region into power-of-two size classes, each with its own
/// O(1) freelist. There is no buddy coalescing: fragmentation is bounded by
/// rounding up to the next class instead.
///
/// The arena's size is fixed at construction (see
/// [`HugeAllocatorConfig::buffers_per_class`]) and never grows or shrinks
/// until [`HugeAllocator::teardown`]; [`HugeAllocator::alloc`] returns
/// [`AllocError::OutOfMemory`] rather than growing mid-flight.
pub struct HugeAllocator {
    base: NonNull<u8>,
    arena_len: usize,
    mr: Option<Mr>,
    classes: Vec<SizeClass>,
}

// SAFETY: the arena is raw mmap'd memory with no thread-affinity of its
// own; the single-thread-per-endpoint invariant is enforced by the caller,
// not by this type.
unsafe impl Send for HugeAllocator {}

impl HugeAllocator {
    /// Reserves the arena: `mmap`s hugepages for every size class and binds
    /// them to `config.numa_node` if set.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::HugepagesUnavailable`] if `mmap` with
    /// `MAP_HUGETLB` fails — this allocator never silently falls back to
    /// regular 4&nbsp;KiB pages, since doing so would violate the NUMA
    /// binding invariant below. Returns [`AllocError::NumaBindingFailed`] if
    /// `numa_node` is set but `mbind` fails.
    pub fn new(config: &HugeAllocatorConfig) -> Result<Self, AllocError> {
        let mut capacity = MIN_CLASS_BYTES;
        let mut capacities = Vec::new();
        loop {
            capacities.push(capacity);
            if capacity >= config.max_class_bytes {
                break;
            }
            capacity *= 2;
        }

        let mut classes = Vec::with_capacity(capacities.len());
        let mut offset = 0usize;
        for capacity in capacities {
            let stride = HEADROOM + capacity;
            classes.push(SizeClass {
                capacity,
                stride,
                base_offset: offset,
                free: (0..u32::try_from(config.buffers_per_class).expect("pool depth too large"))
                    .collect(),
                #[cfg(debug_assertions)]
                generations: vec![0; config.buffers_per_class],
            });
            offset += stride * config.buffers_per_class;
        }
        let arena_len = offset;

        let base = Self::mmap_hugepages(arena_len)?;
        if let Some(node) = config.numa_node {
            if let Err(err) = bind_numa_node(base, arena_len, node) {
                // SAFETY: `base`/`arena_len` came from the `mmap` above.
                unsafe {
                    let _ = munmap(base, arena_len);
                }
                return Err(err);
            }
        }

        debug!(
            arena_bytes = arena_len,
            classes = classes.len(),
            numa_node = ?config.numa_node,
            "hugepage arena reserved",
        );

        Ok(Self {
            base,
            arena_len,
            mr: None,
            classes,
        })
    }

    fn mmap_hugepages(len: usize) -> Result<NonNull<u8>, AllocError> {
        let flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS | MapFlags::MAP_HUGETLB;
        let len_nz = len
            .try_into()
            .map_err(|_| AllocError::HugepagesUnavailable {
                reason: "arena size overflowed NonZeroUsize".to_owned(),
            })?;
        // SAFETY: anonymous mapping, no file descriptor involved.
        unsafe {
            mmap_anonymous(
                None,
                len_nz,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                flags,
            )
            .map_err(|errno| AllocError::HugepagesUnavailable {
                reason: errno.to_string(),
            })
        }
    }

    /// Registers the whole arena as one DMA-able region with `transport`.
    /// Must be called before any buffer from this allocator is posted to
    /// the transport.
    ///
    /// # Errors
    ///
    /// Propagates [`IoError::RegistrationFailed`] from the transport.
    pub fn register_with(&mut self, transport: &mut dyn Transport) -> Result<(), IoError> {
        // SAFETY: `base`/`arena_len` describe the live mmap'd arena, which
        // outlives the returned `Mr` (deregistered in `teardown` before the
        // arena is unmapped).
        let mr = unsafe { transport.register_region(self.base.as_ptr(), self.arena_len)? };
        self.mr = Some(mr);
        Ok(())
    }

    /// Allocates the smallest size class whose capacity is at least
    /// `n_bytes`. `n_bytes == 0` returns a buffer from the smallest class.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::TooLarge`] if `n_bytes` exceeds every size
    /// class, or [`AllocError::OutOfMemory`] if the matching class's
    /// freelist is empty.
    pub fn alloc(&mut self, n_bytes: usize) -> Result<MsgBuffer, AllocError> {
        let class_idx = self
            .classes
            .iter()
            .position(|class| class.capacity >= n_bytes)
            .ok_or_else(|| AllocError::TooLarge {
                requested: n_bytes,
                largest: self.classes.last().map_or(0, |c| c.capacity),
            })?;

        let class = &mut self.classes[class_idx];
        let slot = class
            .free
            .pop()
            .ok_or(AllocError::OutOfMemory { requested: n_bytes })?;

        #[cfg(debug_assertions)]
        let generation = {
            class.generations[slot as usize] = class.generations[slot as usize].wrapping_add(1);
            class.generations[slot as usize]
        };
        #[cfg(not(debug_assertions))]
        let generation = 0u32;

        let buf_offset = class.base_offset + slot as usize * class.stride;
        // SAFETY: `buf_offset + stride <= arena_len` by the layout computed
        // in `new`, and `slot` was just popped from this class's freelist,
        // so no other live `MsgBuffer` aliases this range.
        let payload_ptr = unsafe {
            NonNull::new_unchecked(self.base.as_ptr().add(buf_offset + HEADROOM))
        };

        trace!(class = class_idx, slot, n_bytes, "allocated buffer");

        Ok(MsgBuffer::from_arena(
            payload_ptr,
            HEADROOM,
            class.capacity,
            class_idx,
            slot,
            generation,
        ))
    }

    /// Returns `buf` to its size class's freelist.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ForeignBuffer`] if `buf` was not carved from
    /// this allocator, or [`AllocError::DoubleFree`] (debug builds only) if
    /// its generation tag no longer matches the live one for its slot.
    pub fn free(&mut self, buf: MsgBuffer) -> Result<(), AllocError> {
        if matches!(buf.origin(), BufferOrigin::External) {
            return Err(AllocError::ForeignBuffer);
        }
        let class = self
            .classes
            .get_mut(buf.class)
            .ok_or(AllocError::ForeignBuffer)?;

        #[cfg(debug_assertions)]
        if class.generations[buf.slot as usize] != buf.generation {
            error!(class = buf.class, slot = buf.slot, "double free detected");
            return Err(AllocError::DoubleFree);
        }

        trace!(class = buf.class, slot = buf.slot, "freed buffer");
        class.free.push(buf.slot);
        Ok(())
    }

    /// Total arena size in bytes, across every size class.
    #[must_use]
    pub const fn arena_bytes(&self) -> usize {
        self.arena_len
    }

    /// Deregisters the arena from `transport` and unmaps its memory.
    /// Consumes `self`: no further use of this allocator is possible.
    pub fn teardown(mut self, transport: &mut dyn Transport) {
        if let Some(mr) = self.mr.take() {
            transport.deregister_region(mr);
        }
        // `Drop` handles the actual `munmap`.
    }
}

impl Drop for HugeAllocator {
    fn drop(&mut self) {
        if self.mr.is_some() {
            error!("HugeAllocator dropped with a live NIC registration; call teardown() first");
        }
        // SAFETY: `base`/`arena_len` describe the arena mmap'd in `new`,
        // which is only ever unmapped here.
        unsafe {
            let _ = munmap(self.base, self.arena_len);
        }
    }
}

/// Binds `len` bytes starting at `base` to NUMA node `node` via `mbind(2)`
/// with `MPOL_BIND`. Mis-binding halves effective bandwidth to a remote
/// NIC, so a failure here is fatal rather than silently ignored.
fn bind_numa_node(base: NonNull<u8>, len: usize, node: u32) -> Result<(), AllocError> {
    const MPOL_BIND: libc::c_int = 2;
    const MPOL_MF_STRICT: libc::c_ulong = 1 << 0;
    const MPOL_MF_MOVE: libc::c_ulong = 1 << 1;

    let nodemask: libc::c_ulong = 1u64.checked_shl(node).unwrap_or(0) as libc::c_ulong;
    let maxnode = libc::c_ulong::from(node) + 1;

    // SAFETY: `base` is valid for `len` bytes (the caller's freshly-mmap'd
    // arena), and `nodemask` is a single in-scope local.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            base.as_ptr().cast::<libc::c_void>(),
            len as libc::c_ulong,
            MPOL_BIND,
            std::ptr::from_ref(&nodemask),
            maxnode,
            MPOL_MF_STRICT | MPOL_MF_MOVE,
        )
    };
    if ret != 0 {
        return Err(AllocError::NumaBindingFailed { node });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HugeAllocatorConfig {
        HugeAllocatorConfig {
            max_class_bytes: 256,
            buffers_per_class: 4,
            numa_node: None,
        }
    }

    #[test]
    fn zero_byte_request_returns_smallest_class() {
        let mut alloc = HugeAllocator::new(&test_config()).expect("arena reservation");
        let buf = alloc.alloc(0).expect("alloc");
        assert_eq!(buf.capacity(), MIN_CLASS_BYTES);
    }

    #[test]
    fn request_larger_than_every_class_fails() {
        let mut alloc = HugeAllocator::new(&test_config()).expect("arena reservation");
        let err = alloc.alloc(1_000_000).unwrap_err();
        assert!(matches!(err, AllocError::TooLarge { .. }));
    }

    #[test]
    fn exhausting_a_class_returns_out_of_memory() {
        let mut alloc = HugeAllocator::new(&test_config()).expect("arena reservation");
        let mut bufs = Vec::new();
        for _ in 0..4 {
            bufs.push(alloc.alloc(256).expect("alloc"));
        }
        let err = alloc.alloc(256).unwrap_err();
        assert!(matches!(err, AllocError::OutOfMemory { .. }));
    }

    #[test]
    fn freed_buffer_is_reusable() {
        let mut alloc = HugeAllocator::new(&test_config()).expect("arena reservation");
        let buf = alloc.alloc(64).expect("alloc");
        alloc.free(buf).expect("free");
        let _again = alloc.alloc(64).expect("alloc after free");
    }

    #[cfg(debug_assertions)]
    #[test]
    fn double_free_is_detected() {
        let mut alloc = HugeAllocator::new(&test_config()).expect("arena reservation");
        let buf = alloc.alloc(64).expect("alloc");
        // Reconstruct a stale handle to the same slot/class with an old
        // generation tag, simulating a corrupted or duplicated free.
        let stale = MsgBuffer::from_arena(buf.ptr, buf.headroom, buf.cap, buf.class, buf.slot, 0);
        alloc.free(buf).expect("first free succeeds");
        let err = alloc.free(stale).unwrap_err();
        assert!(matches!(err, AllocError::DoubleFree));
    }

    #[test]
    fn headroom_and_payload_share_one_allocation() {
        let mut alloc = HugeAllocator::new(&test_config()).expect("arena reservation");
        let mut buf = alloc.alloc(64).expect("alloc");
        buf.write_area()[0..4].copy_from_slice(b"data");
        buf.set_len(4);
        buf.headroom_mut().fill(0xAB);
        assert_eq!(buf.payload(), b"data");
        assert!(buf.headroom_mut().iter().all(|&b| b == 0xAB));
    }
}
