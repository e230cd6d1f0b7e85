use crate::error::{expect_rank, Result};
use crate::indexer::ArrayIndexer;
use crate::launch::{launch, SyncSlice};
use crate::transform::FrameTransform;
use tensor::{Dtype, Tensor};

const OP: &str = "unproject";

pub struct UnprojectArgs<'a> {
	/// Depth image `[H][W]`, any numeric dtype.
	pub depth: &'a Tensor,
	/// Pinhole intrinsics, 3×3 f32.
	pub intrinsics: &'a Tensor,
	/// Raw depth units per meter.
	pub depth_scale: f32,
	/// Depths at or beyond this range (meters) are treated as unobserved.
	pub depth_max: f32,
}

/// Lift a depth image to a per-pixel camera-frame vertex map `[H][W][3]`.
///
/// Unobserved pixels (zero or clipped depth) map to the origin.
pub fn unproject(args: &UnprojectArgs<'_>) -> Result<Tensor> {
	expect_rank(OP, "depth", args.depth, 2)?;
	let transform = FrameTransform::without_extrinsics(OP, args.intrinsics)?;

	let depth_f32;
	let depth = if args.depth.dtype() == Dtype::F32 {
		args.depth.as_slice::<f32>()?
	} else {
		depth_f32 = args.depth.cast_f32();
		depth_f32.as_slice::<f32>()?
	};

	let (height, width) = (args.depth.shape()[0], args.depth.shape()[1]);
	let image = ArrayIndexer::new(&[height, width]);
	let mut vertex_map = Tensor::zeros(&[height, width, 3], Dtype::F32);
	{
		let out = SyncSlice::new(vertex_map.as_slice_mut::<f32>()?);
		launch(image.num_workloads(), |workload_idx| {
			let (x, y) = image.workload_to_coord_2d(workload_idx as i64);
			let mut d = depth[workload_idx] / args.depth_scale;
			if d >= args.depth_max {
				d = 0.0;
			}
			let vertex = transform.unproject(x as f32, y as f32, d);
			let base = workload_idx * 3;
			out.set(base, vertex.x);
			out.set(base + 1, vertex.y);
			out.set(base + 2, vertex.z);
		});
	}
	Ok(vertex_map)
}
