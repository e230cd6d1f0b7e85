use crate::error::{expect_dtype, expect_rank, expect_shape, KernelError, Result};
use crate::indexer::ArrayIndexer;
use crate::kernel::neighbors::{BlockPool, NeighborTables};
use crate::launch::{launch, ReservationCounter, SyncSlice};
use crate::tables::{EDGE_SHIFTS, EDGE_TABLE, VTX_SHIFTS};
use glam::Vec3;
use tensor::{Dtype, Tensor};

const OP: &str = "marching_cubes";

pub struct MarchingCubesArgs<'a> {
	/// Pool ids of the selected blocks, `[K]` i64.
	pub indices: &'a Tensor,
	/// Inverse of `indices` over the whole pool, `[B]` i64, `-1` where a
	/// block is not selected.
	pub inv_indices: &'a Tensor,
	/// 27-neighborhood pool ids, `[27][K]` i64.
	pub nb_indices: &'a Tensor,
	/// 27-neighborhood allocation masks, `[27][K]` u8.
	pub nb_masks: &'a Tensor,
	/// Block coordinates of the whole pool, `[B][3]` i64.
	pub block_keys: &'a Tensor,
	/// The voxel block pool, `[B][R][R][R][2]` f32.
	pub block_values: &'a Tensor,
	/// Shared edge→vertex bookkeeping, `[K][R][R][R][4]` i32,
	/// zero-initialized by the caller and mutated across both passes.
	pub mesh_structure: &'a mut Tensor,
	pub voxel_size: f32,
	pub resolution: i64,
	/// Upper bound on emitted vertices; buffers are sized
	/// `min(K·R³·3, vertex_capacity)`.
	pub vertex_capacity: usize,
	/// Use the legacy seam-gradient sampling (see [`normal_at`]).
	pub legacy_seam_gradient: bool,
}

/// Two-pass Marching Cubes over the selected blocks.
///
/// Pass 0 classifies every voxel cube and reserves each crossed edge in its
/// owning voxel's slot, so that an edge shared by up to four cubes — across
/// block seams included — resolves to exactly one vertex. Pass 1 allocates
/// vertex ids for the reserved slots and emits interpolated positions with
/// central-difference normals.
///
/// Returns `(vertices, normals)`, both `[count][3]` f32 with `count` dense
/// vertex ids recorded in the mesh structure.
pub fn marching_cubes(args: &mut MarchingCubesArgs<'_>) -> Result<(Tensor, Tensor)> {
	expect_rank(OP, "indices", args.indices, 1)?;
	expect_dtype(OP, "indices", args.indices, Dtype::I64)?;
	let selection_len = args.indices.shape()[0];
	expect_rank(OP, "inv_indices", args.inv_indices, 1)?;
	expect_dtype(OP, "inv_indices", args.inv_indices, Dtype::I64)?;
	expect_rank(OP, "block_keys", args.block_keys, 2)?;
	expect_shape(OP, "inv_indices", args.inv_indices, &[args.block_keys.shape()[0]])?;
	expect_dtype(OP, "nb_indices", args.nb_indices, Dtype::I64)?;
	expect_shape(OP, "nb_indices", args.nb_indices, &[27, selection_len])?;
	expect_dtype(OP, "nb_masks", args.nb_masks, Dtype::U8)?;
	expect_shape(OP, "nb_masks", args.nb_masks, &[27, selection_len])?;
	expect_dtype(OP, "block_keys", args.block_keys, Dtype::I64)?;
	expect_dtype(OP, "block_values", args.block_values, Dtype::F32)?;
	expect_dtype(OP, "mesh_structure", args.mesh_structure, Dtype::I32)?;
	let r = args.resolution;
	let structure_shape = [selection_len, r as usize, r as usize, r as usize, 4];
	if args.mesh_structure.shape() != structure_shape {
		return Err(KernelError::Shape {
			op: OP,
			arg: "mesh_structure",
			expected: format!("shape {:?}", structure_shape),
			got: args.mesh_structure.shape().to_vec(),
		});
	}

	let voxel = ArrayIndexer::new(&[r as usize, r as usize, r as usize]);
	let voxels_per_block = (r * r * r) as usize;
	let indices = args.indices.as_slice::<i64>()?;
	let inv_indices = args.inv_indices.as_slice::<i64>()?;
	let block_keys = args.block_keys.as_slice::<i64>()?;
	let pool = BlockPool::new(args.block_values.as_slice::<f32>()?, r);
	let tables = NeighborTables::new(
		args.nb_indices.as_slice::<i64>()?,
		args.nb_masks.as_slice::<u8>()?,
		selection_len,
		r,
	);

	// ---------- pass 0: cube analysis and edge reservation -------------
	{
		let structure = SyncSlice::new(args.mesh_structure.as_slice_mut::<i32>()?);
		launch(selection_len * voxels_per_block, |workload_idx| {
			let k = workload_idx / voxels_per_block;
			let voxel_idx = workload_idx % voxels_per_block;
			let (xv, yv, zv) = voxel.workload_to_coord_3d(voxel_idx as i64);

			let mut table_idx = 0usize;
			for (corner, shift) in VTX_SHIFTS.iter().enumerate() {
				let coords = [xv + shift[0], yv + shift[1], zv + shift[2]];
				let Some((nb_block, local)) = tables.resolve(k, coords) else {
					return;
				};
				let (tsdf, weight) = pool.tsdf_weight(nb_block, local);
				if weight == 0.0 {
					return;
				}
				if tsdf < 0.0 {
					table_idx |= 1 << corner;
				}
			}
			let own_base = (k * voxels_per_block + voxel_idx) * 4;
			structure.set(own_base + 3, table_idx as i32);
			if table_idx == 0 || table_idx == 255 {
				return;
			}

			let edges = EDGE_TABLE[table_idx];
			for (edge, shift) in EDGE_SHIFTS.iter().enumerate() {
				if edges & (1 << edge) == 0 {
					continue;
				}
				let coords = [xv + shift[0], yv + shift[1], zv + shift[2]];
				// the owner is one of the cube's corner voxels, so its
				// block passed the allocation check above
				let Some((owner_block, local)) = tables.resolve(k, coords) else {
					continue;
				};
				let owner_k = inv_indices[owner_block as usize];
				if owner_k < 0 {
					continue;
				}
				debug_assert_eq!(
					indices[owner_k as usize], owner_block,
					"inverse block index out of sync"
				);
				let owner_voxel = voxel.coord_3d_to_workload(local[0], local[1], local[2]);
				let owner_base =
					(owner_k as usize * voxels_per_block + owner_voxel as usize) * 4;
				// many cubes may reserve the same edge; all of them store
				// the same marker
				structure.store_relaxed(owner_base + shift[3] as usize, -1);
			}
		});
	}

	// ---------- pass 1: vertex allocation and normals -------------------
	let capacity = (selection_len * voxels_per_block * 3).min(args.vertex_capacity);
	let mut vertices = Tensor::zeros(&[capacity, 3], Dtype::F32);
	let mut normals = Tensor::zeros(&[capacity, 3], Dtype::F32);
	let counter = ReservationCounter::new();
	{
		let structure = SyncSlice::new(args.mesh_structure.as_slice_mut::<i32>()?);
		let vertices_out = SyncSlice::new(vertices.as_slice_mut::<f32>()?);
		let normals_out = SyncSlice::new(normals.as_slice_mut::<f32>()?);
		let (voxel_size, legacy) = (args.voxel_size, args.legacy_seam_gradient);
		launch(selection_len * voxels_per_block, |workload_idx| {
			let k = workload_idx / voxels_per_block;
			let voxel_idx = workload_idx % voxels_per_block;
			let own_base = (k * voxels_per_block + voxel_idx) * 4;
			let slots =
				[structure.get(own_base), structure.get(own_base + 1), structure.get(own_base + 2)];
			if slots.iter().all(|&slot| slot != -1) {
				return;
			}

			let (xv, yv, zv) = voxel.workload_to_coord_3d(voxel_idx as i64);
			let block_idx = indices[k];
			let key = &block_keys[(block_idx * 3) as usize..][..3];
			let (tsdf_o, _) = pool.tsdf_weight(block_idx, [xv, yv, zv]);
			let n_o = normal_at(&pool, &tables, k, [xv, yv, zv], legacy);

			for axis in 0..3usize {
				if slots[axis] != -1 {
					continue;
				}
				let mut coords = [xv, yv, zv];
				coords[axis] += 1;
				// the reserving cube spanned this edge, so both end voxels
				// exist
				let Some((nb_block, local)) = tables.resolve(k, coords) else {
					continue;
				};
				let (tsdf_e, _) = pool.tsdf_weight(nb_block, local);
				let ratio = tsdf_e / (tsdf_e - tsdf_o);

				let slot = counter.reserve(1) as usize;
				if slot >= capacity {
					continue;
				}
				structure.set(own_base + axis, slot as i32);

				let mut world = [
					(key[0] * r + xv) as f32,
					(key[1] * r + yv) as f32,
					(key[2] * r + zv) as f32,
				];
				world[axis] += 1.0 - ratio;
				vertices_out.set(slot * 3, voxel_size * world[0]);
				vertices_out.set(slot * 3 + 1, voxel_size * world[1]);
				vertices_out.set(slot * 3 + 2, voxel_size * world[2]);

				let n_e = normal_at(&pool, &tables, k, coords, legacy);
				let normal = (ratio * n_o + (1.0 - ratio) * n_e).normalize_or_zero();
				normals_out.set(slot * 3, normal.x);
				normals_out.set(slot * 3 + 1, normal.y);
				normals_out.set(slot * 3 + 2, normal.z);
			}
		});
	}

	let reserved = counter.value() as usize;
	if reserved > capacity {
		log::warn!("vertex buffer saturated: {} edges, {} slots", reserved, capacity);
	}
	let realized = reserved.min(capacity);
	log::debug!("marching cubes allocated {} vertices over {} blocks", realized, selection_len);
	Ok((vertices.sliced_rows(realized), normals.sliced_rows(realized)))
}

fn sample_tsdf(pool: &BlockPool<'_>, tables: &NeighborTables<'_>, k: usize, coords: [i64; 3]) -> f32 {
	match tables.resolve(k, coords) {
		Some((block_idx, local)) => pool.tsdf_weight(block_idx, local).0,
		None => 0.0,
	}
}

/// The legacy sample derives the block offset along `axis` from the +x
/// sample's coordinate instead of the sample's own, which zeroes the +y/+z
/// taps at block seams; off-pool reads clamp to zero.
fn sample_tsdf_legacy(
	pool: &BlockPool<'_>,
	tables: &NeighborTables<'_>,
	k: usize,
	coords: [i64; 3],
	axis: usize,
	x_plus: i64,
) -> f32 {
	let r = tables.resolution();
	let mut offset =
		[coords[0].div_euclid(r), coords[1].div_euclid(r), coords[2].div_euclid(r)];
	let mut local =
		[coords[0].rem_euclid(r), coords[1].rem_euclid(r), coords[2].rem_euclid(r)];
	offset[axis] = x_plus.div_euclid(r);
	local[axis] = coords[axis] - offset[axis] * r;
	match tables.lookup(k, offset) {
		Some(block_idx) => pool.tsdf_or_zero(block_idx, local),
		None => 0.0,
	}
}

/// Central-difference tsdf gradient at a voxel, stepping ±1 per axis across
/// block seams. Samples landing in unallocated blocks contribute zero.
fn normal_at(
	pool: &BlockPool<'_>,
	tables: &NeighborTables<'_>,
	k: usize,
	base: [i64; 3],
	legacy: bool,
) -> Vec3 {
	let mut n = Vec3::ZERO;
	for axis in 0..3usize {
		let mut lo = base;
		lo[axis] -= 1;
		let mut hi = base;
		hi[axis] += 1;
		let hi_sample = if legacy && axis > 0 {
			sample_tsdf_legacy(pool, tables, k, hi, axis, base[0] + 1)
		} else {
			sample_tsdf(pool, tables, k, hi)
		};
		n[axis] = hi_sample - sample_tsdf(pool, tables, k, lo);
	}
	n
}
