//! Sparse-voxel TSDF fusion core.
//!
//! Depth frames are fused into a hash-addressed pool of fixed-resolution
//! voxel blocks, and iso-surfaces come back out as point sets or as
//! Marching Cubes vertices with normals. The five kernels are data-parallel
//! over linear workload ranges; [`grid::VoxelBlockGrid`] owns the pool and
//! drives them.

pub mod error;
pub mod grid;
pub mod indexer;
pub mod kernel;
pub mod launch;
pub mod tables;
pub mod transform;

pub use error::{KernelError, Result};
pub use grid::{GridConfig, VoxelBlockGrid};
pub use indexer::ArrayIndexer;
pub use kernel::{
	execute, IntegrateArgs, KernelOp, KernelOutput, MarchingCubesArgs, OpCode,
	SurfaceExtractionArgs, TouchArgs, UnprojectArgs,
};
pub use launch::{launch, ReservationCounter, SyncSlice};
pub use transform::FrameTransform;
