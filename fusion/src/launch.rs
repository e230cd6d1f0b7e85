use rayon::prelude::*;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};

/// Run `op` once for every workload index in `[0, n)` on the thread pool.
///
/// Workloads execute in no particular order. A workload may communicate with
/// its peers only through [`SyncSlice`] disjoint writes, idempotent relaxed
/// stores, or [`ReservationCounter`] slot reservation; everything else is a
/// data race. The call returns once every workload has finished, which is
/// the host-side synchronization point between kernels.
pub fn launch<F>(n: usize, op: F)
where
	F: Fn(usize) + Sync,
{
	(0..n).into_par_iter().for_each(|workload_idx| op(workload_idx));
}

/// Atomic slot reservation for output buffers grown from many workloads.
#[derive(Debug, Default)]
pub struct ReservationCounter(AtomicI32);

impl ReservationCounter {
	pub fn new() -> Self {
		Self(AtomicI32::new(0))
	}

	/// Reserve `slots` contiguous rows and return the first reserved index.
	///
	/// The returned index may exceed the buffer capacity once the output
	/// saturates; callers bound-check before writing.
	pub fn reserve(&self, slots: i32) -> i32 {
		self.0.fetch_add(slots, Ordering::Relaxed)
	}

	/// Total slots reserved so far. Only meaningful after `launch` returns.
	pub fn value(&self) -> i32 {
		self.0.load(Ordering::Relaxed)
	}
}

/// A shared view over a slice that many workloads write concurrently.
///
/// `get`/`set` skip the borrow checker, so the usual exclusive-access rules
/// become a caller contract: within one launch, a cell may be written by at
/// most one workload, and a cell being written must not be read by others.
/// Cells that genuinely have several writers must go through the relaxed
/// atomic accessors instead, and every such writer must store the same value.
pub struct SyncSlice<'a, T> {
	ptr: *mut T,
	len: usize,
	_lifetime: PhantomData<&'a mut [T]>,
}

// SAFETY: the view hands out plain copies and the write discipline above
// keeps cells single-writer; the wrapped slice outlives the view.
unsafe impl<T: Send> Send for SyncSlice<'_, T> {}
unsafe impl<T: Send> Sync for SyncSlice<'_, T> {}

impl<'a, T: Copy> SyncSlice<'a, T> {
	pub fn new(slice: &'a mut [T]) -> Self {
		Self { ptr: slice.as_mut_ptr(), len: slice.len(), _lifetime: PhantomData }
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Read a cell that no concurrent workload writes.
	pub fn get(&self, index: usize) -> T {
		debug_assert!(index < self.len, "read past shared view ({} >= {})", index, self.len);
		// SAFETY: in bounds per the debug assert; no concurrent writer per
		// the caller contract.
		unsafe { *self.ptr.add(index) }
	}

	/// Write a cell owned by the calling workload.
	pub fn set(&self, index: usize, value: T) {
		debug_assert!(index < self.len, "write past shared view ({} >= {})", index, self.len);
		// SAFETY: in bounds per the debug assert; single writer per the
		// caller contract.
		unsafe { *self.ptr.add(index) = value };
	}
}

impl SyncSlice<'_, i32> {
	fn atomic(&self, index: usize) -> &AtomicI32 {
		debug_assert!(index < self.len, "access past shared view ({} >= {})", index, self.len);
		// SAFETY: AtomicI32 has the same size and layout as i32, and the
		// cell stays inside the wrapped slice.
		unsafe { &*self.ptr.add(index).cast::<AtomicI32>() }
	}

	pub fn load_relaxed(&self, index: usize) -> i32 {
		self.atomic(index).load(Ordering::Relaxed)
	}

	/// Store into a cell that several workloads may write concurrently.
	/// All writers must store the same value.
	pub fn store_relaxed(&self, index: usize, value: i32) {
		self.atomic(index).store(value, Ordering::Relaxed);
	}
}
