use crate::error::{expect_dtype, expect_rank, expect_shape, Result};
use crate::indexer::ArrayIndexer;
use crate::kernel::neighbors::{BlockPool, NeighborTables};
use crate::launch::{launch, ReservationCounter, SyncSlice};
use tensor::{Dtype, Tensor};

const OP: &str = "surface_extraction";

pub struct SurfaceExtractionArgs<'a> {
	/// Pool ids of the selected blocks, `[K]` i64.
	pub indices: &'a Tensor,
	/// 27-neighborhood pool ids, `[27][K]` i64.
	pub nb_indices: &'a Tensor,
	/// 27-neighborhood allocation masks, `[27][K]` u8.
	pub nb_masks: &'a Tensor,
	/// Block coordinates of the whole pool, `[B][3]` i64.
	pub block_keys: &'a Tensor,
	/// The voxel block pool, `[B][R][R][R][2]` f32.
	pub block_values: &'a Tensor,
	pub voxel_size: f32,
	pub resolution: i64,
	/// Upper bound on emitted points; the buffer is sized
	/// `min(K·R³·3, point_capacity)`.
	pub point_capacity: usize,
}

/// Emit one metric-space point per zero crossing along the +x/+y/+z edges
/// of every observed voxel, spanning block seams through the neighbor
/// tables.
///
/// Points come out in nondeterministic order; once the buffer saturates,
/// further crossings are dropped.
pub fn extract_surface_points(args: &SurfaceExtractionArgs<'_>) -> Result<Tensor> {
	expect_rank(OP, "indices", args.indices, 1)?;
	expect_dtype(OP, "indices", args.indices, Dtype::I64)?;
	let selection_len = args.indices.shape()[0];
	expect_dtype(OP, "nb_indices", args.nb_indices, Dtype::I64)?;
	expect_shape(OP, "nb_indices", args.nb_indices, &[27, selection_len])?;
	expect_dtype(OP, "nb_masks", args.nb_masks, Dtype::U8)?;
	expect_shape(OP, "nb_masks", args.nb_masks, &[27, selection_len])?;
	expect_rank(OP, "block_keys", args.block_keys, 2)?;
	expect_dtype(OP, "block_keys", args.block_keys, Dtype::I64)?;
	expect_dtype(OP, "block_values", args.block_values, Dtype::F32)?;

	let r = args.resolution;
	let voxel = ArrayIndexer::new(&[r as usize, r as usize, r as usize]);
	let voxels_per_block = (r * r * r) as usize;
	let capacity = (selection_len * voxels_per_block * 3).min(args.point_capacity);

	let indices = args.indices.as_slice::<i64>()?;
	let block_keys = args.block_keys.as_slice::<i64>()?;
	let pool = BlockPool::new(args.block_values.as_slice::<f32>()?, r);
	let tables = NeighborTables::new(
		args.nb_indices.as_slice::<i64>()?,
		args.nb_masks.as_slice::<u8>()?,
		selection_len,
		r,
	);
	let voxel_size = args.voxel_size;

	let mut points = Tensor::zeros(&[capacity, 3], Dtype::F32);
	let counter = ReservationCounter::new();
	{
		let out = SyncSlice::new(points.as_slice_mut::<f32>()?);
		launch(selection_len * voxels_per_block, |workload_idx| {
			let k = workload_idx / voxels_per_block;
			let voxel_idx = (workload_idx % voxels_per_block) as i64;
			let block_idx = indices[k];
			let (xv, yv, zv) = voxel.workload_to_coord_3d(voxel_idx);

			let (tsdf_o, weight_o) = pool.tsdf_weight(block_idx, [xv, yv, zv]);
			if weight_o == 0.0 {
				return;
			}

			let key = &block_keys[(block_idx * 3) as usize..][..3];
			for axis in 0..3usize {
				let mut coords = [xv, yv, zv];
				coords[axis] += 1;
				let Some((nb_block, local)) = tables.resolve(k, coords) else {
					continue;
				};
				let (tsdf_i, weight_i) = pool.tsdf_weight(nb_block, local);
				if weight_i > 0.0 && tsdf_o * tsdf_i < 0.0 {
					let ratio = tsdf_i / (tsdf_i - tsdf_o);
					let slot = counter.reserve(1) as usize;
					if slot >= capacity {
						continue;
					}
					let mut world = [
						(key[0] * r + xv) as f32,
						(key[1] * r + yv) as f32,
						(key[2] * r + zv) as f32,
					];
					world[axis] += ratio;
					out.set(slot * 3, voxel_size * world[0]);
					out.set(slot * 3 + 1, voxel_size * world[1]);
					out.set(slot * 3 + 2, voxel_size * world[2]);
				}
			}
		});
	}

	let reserved = counter.value() as usize;
	if reserved > capacity {
		log::warn!("surface point buffer saturated: {} crossings, {} slots", reserved, capacity);
	}
	let realized = reserved.min(capacity);
	log::debug!("extracted {} surface points from {} blocks", realized, selection_len);
	Ok(points.sliced_rows(realized))
}
