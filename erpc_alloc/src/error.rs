//! See [`AllocError`].

/// Errors returned by [`crate::HugeAllocator`].
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum AllocError {
    /// The requested size exceeds every configured size class.
    #[display("requested {requested} bytes exceeds the largest size class ({largest} bytes)")]
    TooLarge {
        /// Bytes requested by the caller.
        requested: usize,
        /// Capacity of the largest configured size class.
        largest: usize,
    },
    /// The size class that fits the request has no free buffers.
    #[display("no free buffer available for a {requested}-byte request")]
    OutOfMemory {
        /// Bytes requested by the caller.
        requested: usize,
    },
    /// `mmap` with `MAP_HUGETLB` failed; the allocator refuses to silently
    /// fall back to regular pages, since a mis-sized page breaks the NUMA
    /// binding invariant.
    #[display("hugepages unavailable: {reason}")]
    HugepagesUnavailable {
        /// Reason reported by the kernel (as `std::io::Error`'s `Display`).
        reason: String,
    },
    /// `mbind` failed to pin the arena to the requested NUMA node.
    #[display("failed to bind arena to NUMA node {node}")]
    NumaBindingFailed {
        /// The node that could not be bound.
        node: u32,
    },
    /// A buffer was freed twice, or a corrupted/foreign generation tag was
    /// observed. Debug builds only; release builds skip the check.
    #[display("double free detected")]
    DoubleFree,
    /// A buffer was freed against an allocator (or size class) that did not
    /// originate it, or an externally-supplied buffer was passed to
    /// [`crate::HugeAllocator::free`].
    #[display("buffer does not belong to this allocator")]
    ForeignBuffer,
}
