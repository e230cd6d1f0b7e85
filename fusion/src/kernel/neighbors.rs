/// The 27-neighborhood tables of one block selection, flattened `[27][K]`.
///
/// Voxel coordinates that step off a block resolve to the matching cell of
/// the neighboring block through these tables; a zero mask means that
/// neighbor was never allocated and the step falls off the observed volume.
pub(crate) struct NeighborTables<'a> {
	nb_indices: &'a [i64],
	nb_masks: &'a [u8],
	selection_len: usize,
	resolution: i64,
}

impl<'a> NeighborTables<'a> {
	pub fn new(
		nb_indices: &'a [i64],
		nb_masks: &'a [u8],
		selection_len: usize,
		resolution: i64,
	) -> Self {
		debug_assert_eq!(nb_indices.len(), 27 * selection_len);
		debug_assert_eq!(nb_masks.len(), 27 * selection_len);
		Self { nb_indices, nb_masks, selection_len, resolution }
	}

	pub fn resolution(&self) -> i64 {
		self.resolution
	}

	/// Flatten a block offset in `{-1,0,1}³` to its neighbor table row;
	/// the centered block is row 13.
	pub fn neighbor_slot(offset: [i64; 3]) -> usize {
		debug_assert!(offset.iter().all(|d| (-1..=1).contains(d)));
		((offset[0] + 1) + 3 * (offset[1] + 1) + 9 * (offset[2] + 1)) as usize
	}

	/// Pool id of the block at `offset` from selection slot `k`, if
	/// allocated.
	pub fn lookup(&self, k: usize, offset: [i64; 3]) -> Option<i64> {
		let at = Self::neighbor_slot(offset) * self.selection_len + k;
		(self.nb_masks[at] != 0).then(|| self.nb_indices[at])
	}

	/// Resolve voxel coordinates that may step outside the block of
	/// selection slot `k` into (pool block id, in-block coordinates).
	pub fn resolve(&self, k: usize, coords: [i64; 3]) -> Option<(i64, [i64; 3])> {
		let r = self.resolution;
		let offset = [
			coords[0].div_euclid(r),
			coords[1].div_euclid(r),
			coords[2].div_euclid(r),
		];
		let local = [
			coords[0].rem_euclid(r),
			coords[1].rem_euclid(r),
			coords[2].rem_euclid(r),
		];
		self.lookup(k, offset).map(|block_idx| (block_idx, local))
	}
}

/// Read-only view of the voxel block pool, `[B][R][R][R][2]` with the tsdf
/// and weight channels innermost.
pub(crate) struct BlockPool<'a> {
	values: &'a [f32],
	resolution: i64,
}

impl<'a> BlockPool<'a> {
	pub fn new(values: &'a [f32], resolution: i64) -> Self {
		Self { values, resolution }
	}

	fn voxel_base(&self, block_idx: i64, local: [i64; 3]) -> i64 {
		let r = self.resolution;
		(((block_idx * r + local[2]) * r + local[1]) * r + local[0]) * 2
	}

	/// (tsdf, weight) of an in-block voxel.
	pub fn tsdf_weight(&self, block_idx: i64, local: [i64; 3]) -> (f32, f32) {
		let base = self.voxel_base(block_idx, local) as usize;
		(self.values[base], self.values[base + 1])
	}

	/// tsdf under the raw linear addressing, zero when the computed cell
	/// falls outside the pool. The legacy seam-gradient path can wander off
	/// a block row; clamping those reads to zero keeps its behavior without
	/// its memory hazards.
	pub fn tsdf_or_zero(&self, block_idx: i64, local: [i64; 3]) -> f32 {
		let base = self.voxel_base(block_idx, local);
		if base < 0 {
			return 0.0;
		}
		self.values.get(base as usize).copied().unwrap_or(0.0)
	}
}
