use crate::error::{expect_rank, KernelError, Result};
use block_hash::{BlockHashMap, BlockKey};
use rayon::prelude::*;
use tensor::{Dtype, Tensor};

const OP: &str = "touch";

pub struct TouchArgs<'a> {
	/// Observed points `[N][3]`, any numeric dtype, metric units.
	pub points: &'a Tensor,
	/// Metric voxel edge length.
	pub voxel_size: f32,
	/// Voxels per block edge.
	pub resolution: i64,
}

/// Convert a point set into the block keys that need allocation, dilated by
/// the full 27-neighborhood so that fusion and extraction can step ±1 off
/// every observed voxel without missing a block.
///
/// Returns candidate keys `[27·M][3]` i64 for the pool map's activation,
/// where `M` is the number of unique touched blocks.
pub fn touch(args: &TouchArgs<'_>) -> Result<Tensor> {
	expect_rank(OP, "points", args.points, 2)?;
	if args.points.shape()[1] != 3 {
		return Err(KernelError::Shape {
			op: OP,
			arg: "points",
			expected: "shape [N, 3]".to_owned(),
			got: args.points.shape().to_vec(),
		});
	}

	let points_f32;
	let points = if args.points.dtype() == Dtype::F32 {
		args.points.as_slice::<f32>()?
	} else {
		points_f32 = args.points.cast_f32();
		points_f32.as_slice::<f32>()?
	};

	let block_size = args.voxel_size * args.resolution as f32;
	let keys: Vec<BlockKey> = points
		.par_chunks_exact(3)
		.map(|p| {
			[
				(p[0] / block_size).floor() as i64,
				(p[1] / block_size).floor() as i64,
				(p[2] / block_size).floor() as i64,
			]
		})
		.collect();

	// a transient map dedupes: activation masks flag first occurrences
	let mut dedup = BlockHashMap::with_capacity(keys.len().max(1));
	let (_, masks) = dedup.activate(&keys);
	let unique: Vec<BlockKey> = keys
		.iter()
		.zip(&masks)
		.filter(|(_, &mask)| mask != 0)
		.map(|(key, _)| *key)
		.collect();

	let mut dilated = Vec::with_capacity(27 * unique.len() * 3);
	for nb in 0..27i64 {
		let (dx, dy, dz) = (nb % 3 - 1, (nb / 3) % 3 - 1, nb / 9 - 1);
		for key in &unique {
			dilated.extend_from_slice(&[key[0] + dx, key[1] + dy, key[2] + dz]);
		}
	}
	log::debug!("touch: {} points -> {} unique blocks", keys.len(), unique.len());
	Ok(Tensor::from_vec(dilated, &[27 * unique.len(), 3])?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeSet;

	fn touched_set(block_coords: &Tensor) -> BTreeSet<[i64; 3]> {
		let flat = block_coords
			.as_slice::<i64>()
			.unwrap_or_else(|e| panic!("block coords dtype: {}", e));
		flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
	}

	#[test]
	fn test_corner_point_dilates_to_full_neighborhood() -> Result<()> {
		let points = Tensor::from_vec(vec![0.0f32, 0.0, 0.0], &[1, 3])?;
		let args = TouchArgs { points: &points, voxel_size: 0.01, resolution: 8 };
		let block_coords = touch(&args)?;
		assert_eq!(block_coords.shape(), &[27, 3]);

		// reference: every offset of the 3x3x3 cube around the origin block
		let mut reference = BTreeSet::new();
		for dx in -1..=1i64 {
			for dy in -1..=1i64 {
				for dz in -1..=1i64 {
					reference.insert([dx, dy, dz]);
				}
			}
		}
		assert_eq!(touched_set(&block_coords), reference);
		Ok(())
	}

	#[test]
	fn test_duplicate_points_collapse() -> Result<()> {
		// both points land in block (1, 0, -1)
		let points =
			Tensor::from_vec(vec![0.09f32, 0.01, -0.07, 0.15, 0.07, -0.01], &[2, 3])?;
		let args = TouchArgs { points: &points, voxel_size: 0.01, resolution: 8 };
		let block_coords = touch(&args)?;
		assert_eq!(block_coords.shape()[0], 27);
		assert!(touched_set(&block_coords).contains(&[1, 0, -1]));
		assert!(touched_set(&block_coords).contains(&[0, -1, -2]));
		Ok(())
	}

	#[test]
	fn test_empty_points_touch_nothing() -> Result<()> {
		let points = Tensor::zeros(&[0, 3], Dtype::F32);
		let args = TouchArgs { points: &points, voxel_size: 0.01, resolution: 8 };
		let block_coords = touch(&args)?;
		assert_eq!(block_coords.shape(), &[0, 3]);
		Ok(())
	}

	#[test]
	fn test_two_distant_points_emit_disjoint_dilations() -> Result<()> {
		let points = Tensor::from_vec(vec![0.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], &[2, 3])?;
		let args = TouchArgs { points: &points, voxel_size: 0.01, resolution: 8 };
		let block_coords = touch(&args)?;
		assert_eq!(block_coords.shape(), &[54, 3]);
		assert_eq!(touched_set(&block_coords).len(), 54);
		Ok(())
	}
}
