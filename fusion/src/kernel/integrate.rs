use crate::error::{expect_dtype, expect_rank, KernelError, Result};
use crate::indexer::ArrayIndexer;
use crate::launch::{launch, SyncSlice};
use crate::transform::FrameTransform;
use glam::Vec3;
use tensor::{Dtype, Tensor};

const OP: &str = "integrate";

pub struct IntegrateArgs<'a> {
	/// Depth image `[H][W]`, any numeric dtype.
	pub depth: &'a Tensor,
	/// Pool ids of the blocks to fuse into, `[K]` i64, duplicate-free.
	pub indices: &'a Tensor,
	/// Block coordinates of the whole pool, `[B][3]` i64.
	pub block_keys: &'a Tensor,
	/// The voxel block pool, `[B][R][R][R][2]` f32, updated in place.
	pub block_values: &'a mut Tensor,
	pub intrinsics: &'a Tensor,
	pub extrinsics: &'a Tensor,
	pub resolution: i64,
	pub voxel_size: f32,
	pub sdf_trunc: f32,
	pub depth_scale: f32,
}

/// Fuse one depth frame into the selected blocks.
///
/// One workload per voxel of the selection; each owns a unique
/// `(block, voxel)` cell, so the read-modify-write below needs no atomics as
/// long as `indices` carries no duplicates.
pub fn integrate(args: &mut IntegrateArgs<'_>) -> Result<()> {
	expect_rank(OP, "depth", args.depth, 2)?;
	expect_rank(OP, "indices", args.indices, 1)?;
	expect_dtype(OP, "indices", args.indices, Dtype::I64)?;
	expect_rank(OP, "block_keys", args.block_keys, 2)?;
	expect_dtype(OP, "block_keys", args.block_keys, Dtype::I64)?;
	expect_dtype(OP, "block_values", args.block_values, Dtype::F32)?;
	let r = args.resolution;
	let pool_blocks = args.block_keys.shape()[0];
	let pool_shape = [pool_blocks, r as usize, r as usize, r as usize, 2];
	if args.block_values.shape() != pool_shape {
		return Err(KernelError::Shape {
			op: OP,
			arg: "block_values",
			expected: format!("shape {:?}", pool_shape),
			got: args.block_values.shape().to_vec(),
		});
	}

	let transform =
		FrameTransform::new(OP, args.intrinsics, args.extrinsics, args.voxel_size)?;

	let depth_f32;
	let depth = if args.depth.dtype() == Dtype::F32 {
		args.depth.as_slice::<f32>()?
	} else {
		depth_f32 = args.depth.cast_f32();
		depth_f32.as_slice::<f32>()?
	};

	let (height, width) = (args.depth.shape()[0], args.depth.shape()[1]);
	let image = ArrayIndexer::new(&[height, width]);
	let voxel = ArrayIndexer::new(&[r as usize, r as usize, r as usize]);
	let indices = args.indices.as_slice::<i64>()?;
	let block_keys = args.block_keys.as_slice::<i64>()?;
	let (sdf_trunc, depth_scale) = (args.sdf_trunc, args.depth_scale);

	let voxels_per_block = (r * r * r) as usize;
	let values = SyncSlice::new(args.block_values.as_slice_mut::<f32>()?);
	launch(indices.len() * voxels_per_block, |workload_idx| {
		let k = workload_idx / voxels_per_block;
		let voxel_idx = (workload_idx % voxels_per_block) as i64;
		let block_idx = indices[k];
		let key = &block_keys[(block_idx * 3) as usize..][..3];
		let (xv, yv, zv) = voxel.workload_to_coord_3d(voxel_idx);

		// world voxel coordinate, in voxel units; the transform scales
		let world = Vec3::new(
			(key[0] * r + xv) as f32,
			(key[1] * r + yv) as f32,
			(key[2] * r + zv) as f32,
		);
		let cam = transform.rigid_transform(world);
		if cam.z <= 0.0 {
			return;
		}
		let (u, v) = transform.project(cam);
		if !image.in_boundary(u, v) {
			return;
		}
		let depth_sample =
			depth[image.coord_2d_to_workload(u as i64, v as i64) as usize] / depth_scale;

		let sdf = depth_sample - cam.z;
		if depth_sample <= 0.0 || sdf < -sdf_trunc {
			return;
		}
		let sdf = sdf.min(sdf_trunc) / sdf_trunc;

		let base = (((block_idx * r + zv) * r + yv) * r + xv) as usize * 2;
		let tsdf = values.get(base);
		let weight = values.get(base + 1);
		values.set(base, (weight * tsdf + sdf) / (weight + 1.0));
		values.set(base + 1, weight + 1.0);
	});
	log::debug!("integrated frame into {} blocks", indices.len());
	Ok(())
}
