use crate::error::{expect_dtype, expect_rank, Result};
use crate::kernel::{
	self, IntegrateArgs, MarchingCubesArgs, SurfaceExtractionArgs, TouchArgs, UnprojectArgs,
};
use crate::transform::FrameTransform;
use block_hash::{BlockHashMap, BlockKey};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tensor::{Dtype, Tensor};

/// Configuration for a sparse voxel block grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
	/// Metric voxel edge length.
	pub voxel_size: f32,
	/// Voxels per block edge.
	pub block_resolution: i64,
	/// Metric truncation distance of the signed distance field.
	pub sdf_trunc: f32,
	/// Raw depth units per meter.
	pub depth_scale: f32,
	/// Depths at or beyond this range (meters) are treated as unobserved.
	pub depth_max: f32,
	/// Maximum number of voxel blocks in the pool.
	pub block_capacity: usize,
	/// Upper bound on rows of any extracted point/vertex buffer.
	pub point_capacity: usize,
	/// Mesh normals use the legacy seam gradient: at block seams the +y/+z
	/// taps reuse the +x sample's block offset.
	pub legacy_seam_gradient: bool,
}

impl Default for GridConfig {
	fn default() -> Self {
		Self {
			voxel_size: 0.01,
			block_resolution: 8,
			sdf_trunc: 0.04,
			depth_scale: 1000.0,
			depth_max: 3.0,
			block_capacity: 10_000,
			point_capacity: 10_000_000,
			legacy_seam_gradient: false,
		}
	}
}

/// The sparse TSDF volume: a hash-addressed pool of voxel blocks plus the
/// orchestration tying the fusion and extraction kernels to it.
///
/// Blocks are allocated on demand as depth frames are integrated; the pool
/// buffers are owned here and updated in place by the kernels.
pub struct VoxelBlockGrid {
	config: GridConfig,
	map: BlockHashMap,
	block_keys: Tensor,
	block_values: Tensor,
}

impl VoxelBlockGrid {
	pub fn new(config: GridConfig) -> Self {
		let blocks = config.block_capacity;
		let r = config.block_resolution as usize;
		Self {
			map: BlockHashMap::with_capacity(blocks),
			block_keys: Tensor::zeros(&[blocks, 3], Dtype::I64),
			block_values: Tensor::zeros(&[blocks, r, r, r, 2], Dtype::F32),
			config,
		}
	}

	pub fn config(&self) -> &GridConfig {
		&self.config
	}

	/// Number of allocated blocks.
	pub fn allocated_blocks(&self) -> usize {
		self.map.len()
	}

	pub fn block_keys(&self) -> &Tensor {
		&self.block_keys
	}

	pub fn block_values(&self) -> &Tensor {
		&self.block_values
	}

	/// (tsdf, weight) of a world voxel, if its block is allocated.
	pub fn voxel(&self, x: i64, y: i64, z: i64) -> Option<(f32, f32)> {
		let r = self.config.block_resolution;
		let key = [x.div_euclid(r), y.div_euclid(r), z.div_euclid(r)];
		let block_idx = self.map.find(&key)?;
		let values = self.block_values.as_slice::<f32>().ok()?;
		let base = ((((block_idx * r + z.rem_euclid(r)) * r + y.rem_euclid(r)) * r
			+ x.rem_euclid(r)) * 2) as usize;
		Some((values[base], values[base + 1]))
	}

	/// Candidate block keys covering `points` and their 27-neighborhoods.
	pub fn touch(&self, points: &Tensor) -> Result<Tensor> {
		kernel::touch(&TouchArgs {
			points,
			voxel_size: self.config.voxel_size,
			resolution: self.config.block_resolution,
		})
	}

	/// Allocate every new key in `block_coords` (`[N][3]` i64), recording
	/// its coordinates in the pool. Returns the newly allocated pool ids.
	pub fn activate(&mut self, block_coords: &Tensor) -> Result<Vec<i64>> {
		expect_rank("activate", "block_coords", block_coords, 2)?;
		expect_dtype("activate", "block_coords", block_coords, Dtype::I64)?;
		let coords = block_coords.as_slice::<i64>()?;
		let keys: Vec<BlockKey> = coords.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
		let (addresses, masks) = self.map.activate(&keys);
		let key_rows = self.block_keys.as_slice_mut::<i64>()?;
		let mut fresh = Vec::new();
		for ((key, address), mask) in keys.iter().zip(&addresses).zip(&masks) {
			if *mask != 0 {
				let row = (*address as usize) * 3;
				key_rows[row..row + 3].copy_from_slice(key);
				fresh.push(*address);
			}
		}
		log::debug!("activated {} new blocks ({} total)", fresh.len(), self.map.len());
		Ok(fresh)
	}

	/// Fuse one depth frame: unproject it, allocate the touched blocks, and
	/// integrate into every allocated block.
	pub fn integrate(
		&mut self,
		depth: &Tensor,
		intrinsics: &Tensor,
		extrinsics: &Tensor,
	) -> Result<()> {
		let vertex_map = kernel::unproject(&UnprojectArgs {
			depth,
			intrinsics,
			depth_scale: self.config.depth_scale,
			depth_max: self.config.depth_max,
		})?;

		// camera-frame vertices to world points for block allocation
		let transform = FrameTransform::new("integrate", intrinsics, extrinsics, 1.0)?;
		let vertices = vertex_map.as_slice::<f32>()?;
		let mut world = Vec::new();
		for p in vertices.chunks_exact(3) {
			if p[2] > 0.0 {
				let w = transform.rigid_transform_inverse(Vec3::new(p[0], p[1], p[2]));
				world.extend_from_slice(&[w.x, w.y, w.z]);
			}
		}
		let rows = world.len() / 3;
		let points = Tensor::from_vec(world, &[rows, 3])?;
		let block_coords = self.touch(&points)?;
		self.activate(&block_coords)?;

		let indices = self.full_selection();
		kernel::integrate(&mut IntegrateArgs {
			depth,
			indices: &indices,
			block_keys: &self.block_keys,
			block_values: &mut self.block_values,
			intrinsics,
			extrinsics,
			resolution: self.config.block_resolution,
			voxel_size: self.config.voxel_size,
			sdf_trunc: self.config.sdf_trunc,
			depth_scale: self.config.depth_scale,
		})
	}

	/// Iso-surface points over every allocated block, `[count][3]` f32.
	pub fn extract_surface_points(&self) -> Result<Tensor> {
		if self.map.is_empty() {
			return Ok(Tensor::zeros(&[0, 3], Dtype::F32));
		}
		let indices = self.full_selection();
		let (nb_indices, nb_masks) = self.neighbor_tables(&indices)?;
		kernel::extract_surface_points(&SurfaceExtractionArgs {
			indices: &indices,
			nb_indices: &nb_indices,
			nb_masks: &nb_masks,
			block_keys: &self.block_keys,
			block_values: &self.block_values,
			voxel_size: self.config.voxel_size,
			resolution: self.config.block_resolution,
			point_capacity: self.config.point_capacity,
		})
	}

	/// Marching Cubes over every allocated block: `(vertices, normals)`,
	/// each `[count][3]` f32.
	pub fn extract_mesh(&self) -> Result<(Tensor, Tensor)> {
		if self.map.is_empty() {
			return Ok((Tensor::zeros(&[0, 3], Dtype::F32), Tensor::zeros(&[0, 3], Dtype::F32)));
		}
		let indices = self.full_selection();
		let inv_indices = self.inverse_selection(&indices)?;
		let (nb_indices, nb_masks) = self.neighbor_tables(&indices)?;
		let r = self.config.block_resolution as usize;
		let selection_len = indices.shape()[0];
		let mut mesh_structure = Tensor::zeros(&[selection_len, r, r, r, 4], Dtype::I32);
		kernel::marching_cubes(&mut MarchingCubesArgs {
			indices: &indices,
			inv_indices: &inv_indices,
			nb_indices: &nb_indices,
			nb_masks: &nb_masks,
			block_keys: &self.block_keys,
			block_values: &self.block_values,
			mesh_structure: &mut mesh_structure,
			voxel_size: self.config.voxel_size,
			resolution: self.config.block_resolution,
			vertex_capacity: self.config.point_capacity,
			legacy_seam_gradient: self.config.legacy_seam_gradient,
		})
	}

	/// Every allocated block id, in pool order.
	fn full_selection(&self) -> Tensor {
		let len = self.map.len();
		Tensor::from_vec((0..len as i64).collect(), &[len])
			.unwrap_or_else(|_| unreachable!("selection length matches its shape"))
	}

	/// Inverse permutation of `indices` over the whole pool, `-1` where a
	/// block is unselected.
	fn inverse_selection(&self, indices: &Tensor) -> Result<Tensor> {
		let selection = indices.as_slice::<i64>()?;
		let mut inverse = vec![-1i64; self.map.capacity()];
		for (k, &block_idx) in selection.iter().enumerate() {
			inverse[block_idx as usize] = k as i64;
		}
		let inverse = Tensor::from_vec(inverse, &[self.map.capacity()])?;
		debug_assert!(selection
			.iter()
			.enumerate()
			.all(|(k, &b)| {
				inverse
					.as_slice::<i64>()
					.map(|inv| inv[b as usize] == k as i64)
					.unwrap_or(false)
			}));
		Ok(inverse)
	}

	/// `[27][K]` neighbor ids and allocation masks for a block selection.
	fn neighbor_tables(&self, indices: &Tensor) -> Result<(Tensor, Tensor)> {
		let selection = indices.as_slice::<i64>()?;
		let key_rows = self.block_keys.as_slice::<i64>()?;
		let k_len = selection.len();
		let mut nb_indices = vec![0i64; 27 * k_len];
		let mut nb_masks = vec![0u8; 27 * k_len];
		for (k, &block_idx) in selection.iter().enumerate() {
			let key = &key_rows[(block_idx * 3) as usize..][..3];
			for nb in 0..27i64 {
				let offset = [nb % 3 - 1, (nb / 3) % 3 - 1, nb / 9 - 1];
				let neighbor =
					[key[0] + offset[0], key[1] + offset[1], key[2] + offset[2]];
				if let Some(address) = self.map.find(&neighbor) {
					nb_indices[nb as usize * k_len + k] = address;
					nb_masks[nb as usize * k_len + k] = 1;
				}
			}
			debug_assert_eq!(nb_indices[13 * k_len + k], block_idx);
			debug_assert_eq!(nb_masks[13 * k_len + k], 1);
		}
		Ok((
			Tensor::from_vec(nb_indices, &[27, k_len])?,
			Tensor::from_vec(nb_masks, &[27, k_len])?,
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pinhole() -> Tensor {
		Tensor::from_vec(vec![100.0f32, 0.0, 50.0, 0.0, 100.0, 50.0, 0.0, 0.0, 1.0], &[3, 3])
			.unwrap_or_else(|e| panic!("intrinsics fixture: {}", e))
	}

	fn identity() -> Tensor {
		let mut e = vec![0.0f32; 16];
		for i in 0..4 {
			e[i * 4 + i] = 1.0;
		}
		Tensor::from_vec(e, &[4, 4]).unwrap_or_else(|e| panic!("extrinsics fixture: {}", e))
	}

	fn test_config() -> GridConfig {
		GridConfig { block_capacity: 2048, ..GridConfig::default() }
	}

	/// Depth map of a sphere of the given radius centered on the camera.
	fn sphere_depth(radius: f32) -> Tensor {
		let mut raw = vec![0.0f32; 100 * 100];
		for v in 0..100 {
			for u in 0..100 {
				let a = (u as f32 - 50.0) / 100.0;
				let b = (v as f32 - 50.0) / 100.0;
				raw[v * 100 + u] = radius / (a * a + b * b + 1.0).sqrt() * 1000.0;
			}
		}
		Tensor::from_vec(raw, &[100, 100]).unwrap_or_else(|e| panic!("depth fixture: {}", e))
	}

	fn assert_pool_invariants(grid: &VoxelBlockGrid) {
		let values = grid
			.block_values()
			.as_slice::<f32>()
			.unwrap_or_else(|e| panic!("pool dtype: {}", e));
		for voxel in values.chunks_exact(2) {
			let (tsdf, weight) = (voxel[0], voxel[1]);
			assert!(weight >= 0.0);
			if weight > 0.0 {
				assert!((-1.0..=1.0).contains(&tsdf), "tsdf {} out of range", tsdf);
			} else {
				assert_eq!(tsdf, 0.0);
			}
		}
	}

	#[test]
	fn test_plane_fusion_end_to_end() -> Result<()> {
		let mut grid = VoxelBlockGrid::new(test_config());
		let depth = Tensor::full(&[100, 100], 1000.0f32);
		grid.integrate(&depth, &pinhole(), &identity())?;

		assert!(grid.allocated_blocks() > 0);
		assert_pool_invariants(&grid);

		// voxels on the optical axis around the plane at one meter
		let (tsdf, weight) = grid.voxel(0, 0, 100).unwrap_or_else(|| panic!("axis voxel"));
		assert_eq!(weight, 1.0);
		assert!(tsdf.abs() < 1e-4);
		let (tsdf, weight) = grid.voxel(0, 0, 97).unwrap_or_else(|| panic!("axis voxel"));
		assert_eq!(weight, 1.0);
		assert!((tsdf - 0.75).abs() < 1e-4);
		let (tsdf, weight) = grid.voxel(0, 0, 103).unwrap_or_else(|| panic!("axis voxel"));
		assert_eq!(weight, 1.0);
		assert!((tsdf + 0.75).abs() < 1e-4);

		// extracted points sit on the plane, one voxel of slack for the
		// crossing parameterization
		let points = grid.extract_surface_points()?;
		assert!(points.shape()[0] > 0);
		for p in points.as_slice::<f32>()?.chunks_exact(3) {
			assert!((p[2] - 1.0).abs() < 0.0102, "point off plane: {:?}", p);
			assert!(p[0].abs() < 0.55 && p[1].abs() < 0.55);
		}
		Ok(())
	}

	#[test]
	fn test_plane_mesh_vertices_and_normals() -> Result<()> {
		let mut grid = VoxelBlockGrid::new(test_config());
		let depth = Tensor::full(&[100, 100], 1000.0f32);
		grid.integrate(&depth, &pinhole(), &identity())?;

		let (vertices, normals) = grid.extract_mesh()?;
		let count = vertices.shape()[0];
		assert!(count > 0);
		assert_eq!(normals.shape(), &[count, 3]);

		let vertex_rows = vertices.as_slice::<f32>()?;
		let normal_rows = normals.as_slice::<f32>()?;
		for (vertex, normal) in
			vertex_rows.chunks_exact(3).zip(normal_rows.chunks_exact(3))
		{
			assert!((vertex[2] - 1.0).abs() < 1e-3, "vertex off plane: {:?}", vertex);
			let n = Vec3::new(normal[0], normal[1], normal[2]);
			assert!((n.length() - 1.0).abs() < 1e-5);
			// away from the frustum rim the field only varies along z,
			// pointing the gradient normal back at the camera
			if vertex[0].abs() < 0.4 && vertex[1].abs() < 0.4 {
				assert!(n.z < -0.99, "interior normal tilted: {:?}", normal);
			}
		}
		Ok(())
	}

	#[test]
	fn test_sphere_reconstruction() -> Result<()> {
		let mut grid = VoxelBlockGrid::new(test_config());
		let depth = sphere_depth(0.3);
		grid.integrate(&depth, &pinhole(), &identity())?;
		assert_pool_invariants(&grid);

		let (vertices, normals) = grid.extract_mesh()?;
		let count = vertices.shape()[0];
		assert!(count > 100, "sphere mesh too sparse: {}", count);

		let vertex_rows = vertices.as_slice::<f32>()?;
		let normal_rows = normals.as_slice::<f32>()?;
		let cos_tolerance = 10.0f32.to_radians().cos();
		for (vertex, normal) in
			vertex_rows.chunks_exact(3).zip(normal_rows.chunks_exact(3))
		{
			let p = Vec3::new(vertex[0], vertex[1], vertex[2]);
			// half a voxel, plus slack for pixel truncation
			assert!(
				(p.length() - 0.3).abs() < 0.006,
				"vertex off the sphere: {:?} (r = {})",
				vertex,
				p.length()
			);
			// interior of the frustum: compare with the analytic normal,
			// which points back toward the camera at the center
			if (p.x / p.z).abs() < 0.4 && (p.y / p.z).abs() < 0.4 {
				let n = Vec3::new(normal[0], normal[1], normal[2]);
				let radial = -p.normalize();
				assert!(
					n.dot(radial) > cos_tolerance,
					"normal {:?} disagrees with radial {:?}",
					normal,
					radial
				);
			}
		}

		// points interpolate from the far end of the crossed edge, so allow
		// a full voxel of slack along the edge
		let points = grid.extract_surface_points()?;
		assert!(points.shape()[0] > 100);
		for p in points.as_slice::<f32>()?.chunks_exact(3) {
			let radius = Vec3::new(p[0], p[1], p[2]).length();
			assert!((radius - 0.3).abs() < 0.012, "point off the sphere: {:?}", p);
		}
		Ok(())
	}

	#[test]
	fn test_empty_frame_is_a_noop() -> Result<()> {
		let mut grid = VoxelBlockGrid::new(test_config());
		let depth = Tensor::zeros(&[100, 100], Dtype::F32);
		grid.integrate(&depth, &pinhole(), &identity())?;

		assert_eq!(grid.allocated_blocks(), 0);
		assert!(grid.block_values().as_slice::<f32>()?.iter().all(|&v| v == 0.0));
		assert_eq!(grid.extract_surface_points()?.shape(), &[0, 3]);
		let (vertices, normals) = grid.extract_mesh()?;
		assert_eq!(vertices.shape(), &[0, 3]);
		assert_eq!(normals.shape(), &[0, 3]);
		Ok(())
	}

	#[test]
	fn test_clipped_far_plane_writes_nothing() -> Result<()> {
		let config = GridConfig { depth_max: 0.5, ..test_config() };
		let mut grid = VoxelBlockGrid::new(config);
		let depth = Tensor::full(&[100, 100], 1000.0f32);
		grid.integrate(&depth, &pinhole(), &identity())?;

		assert_eq!(grid.allocated_blocks(), 0);
		assert!(grid.block_values().as_slice::<f32>()?.iter().all(|&v| v == 0.0));
		Ok(())
	}

	#[test]
	fn test_double_integration_averages_in_place() -> Result<()> {
		let depth = Tensor::full(&[100, 100], 1000.0f32);

		let mut once = VoxelBlockGrid::new(test_config());
		once.integrate(&depth, &pinhole(), &identity())?;
		let mut twice = VoxelBlockGrid::new(test_config());
		twice.integrate(&depth, &pinhole(), &identity())?;
		twice.integrate(&depth, &pinhole(), &identity())?;

		for z in 97..=103 {
			let (tsdf_once, weight_once) =
				once.voxel(0, 0, z).unwrap_or_else(|| panic!("axis voxel"));
			let (tsdf_twice, weight_twice) =
				twice.voxel(0, 0, z).unwrap_or_else(|| panic!("axis voxel"));
			assert_eq!(weight_once, 1.0);
			assert_eq!(weight_twice, 2.0);
			assert!((tsdf_once - tsdf_twice).abs() < 1e-6);
		}
		Ok(())
	}

	#[test]
	fn test_activation_records_block_keys() -> Result<()> {
		let mut grid = VoxelBlockGrid::new(test_config());
		let coords = Tensor::from_vec(vec![2i64, -1, 5, 2, -1, 5, 0, 0, 0], &[3, 3])?;
		let fresh = grid.activate(&coords)?;
		assert_eq!(fresh, vec![0, 1]);
		assert_eq!(grid.allocated_blocks(), 2);
		let keys = grid.block_keys().as_slice::<i64>()?;
		assert_eq!(&keys[..3], &[2, -1, 5]);
		assert_eq!(&keys[3..6], &[0, 0, 0]);
		Ok(())
	}

	#[test]
	fn test_neighbor_tables_center_the_selection() -> Result<()> {
		let mut grid = VoxelBlockGrid::new(test_config());
		let coords =
			Tensor::from_vec(vec![0i64, 0, 0, 1, 0, 0, 0, 1, 0], &[3, 3])?;
		grid.activate(&coords)?;

		let indices = grid.full_selection();
		let (nb_indices, nb_masks) = grid.neighbor_tables(&indices)?;
		let k_len = indices.shape()[0];
		let ids = nb_indices.as_slice::<i64>()?;
		let masks = nb_masks.as_slice::<u8>()?;
		let selection = indices.as_slice::<i64>()?;
		for k in 0..k_len {
			assert_eq!(ids[13 * k_len + k], selection[k]);
			assert_eq!(masks[13 * k_len + k], 1);
		}
		// block (0,0,0) sees (1,0,0) at +x and (0,1,0) at +y
		assert_eq!(masks[14 * k_len], 1);
		assert_eq!(ids[14 * k_len], 1);
		assert_eq!(masks[16 * k_len], 1);
		assert_eq!(ids[16 * k_len], 2);
		// nothing is allocated behind it
		assert_eq!(masks[12 * k_len], 0);
		Ok(())
	}
}
