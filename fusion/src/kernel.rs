mod neighbors;

pub mod integrate;
pub mod mesh;
pub mod surface;
pub mod touch;
pub mod unproject;

pub use integrate::{integrate, IntegrateArgs};
pub use mesh::{marching_cubes, MarchingCubesArgs};
pub use surface::{extract_surface_points, SurfaceExtractionArgs};
pub use touch::{touch, TouchArgs};
pub use unproject::{unproject, UnprojectArgs};

use crate::error::Result;
use crate::launch::launch;
use serde::{Deserialize, Serialize};
use tensor::Tensor;

/// The dispatchable kernels. `RayCasting` is reserved and currently a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
	Unproject,
	TsdfTouch,
	TsdfIntegrate,
	TsdfSurfaceExtraction,
	MarchingCubes,
	RayCasting,
	Debug,
}

/// One kernel invocation with its typed arguments.
///
/// Mutated buffers (the block pool, the mesh structure) ride inside the
/// argument structs; produced buffers come back in [`KernelOutput`].
pub enum KernelOp<'a> {
	Unproject(UnprojectArgs<'a>),
	Touch(TouchArgs<'a>),
	Integrate(IntegrateArgs<'a>),
	SurfaceExtraction(SurfaceExtractionArgs<'a>),
	MarchingCubes(MarchingCubesArgs<'a>),
	RayCasting,
	Debug,
}

impl KernelOp<'_> {
	pub fn code(&self) -> OpCode {
		match self {
			KernelOp::Unproject(_) => OpCode::Unproject,
			KernelOp::Touch(_) => OpCode::TsdfTouch,
			KernelOp::Integrate(_) => OpCode::TsdfIntegrate,
			KernelOp::SurfaceExtraction(_) => OpCode::TsdfSurfaceExtraction,
			KernelOp::MarchingCubes(_) => OpCode::MarchingCubes,
			KernelOp::RayCasting => OpCode::RayCasting,
			KernelOp::Debug => OpCode::Debug,
		}
	}
}

#[derive(Debug)]
pub enum KernelOutput {
	/// Per-pixel camera-frame vertices, `[H][W][3]` f32.
	VertexMap(Tensor),
	/// Dilated candidate block keys, `[27·M][3]` i64.
	BlockCoords(Tensor),
	/// The block pool was updated in place.
	Integrated,
	/// Iso-surface points, `[count][3]` f32.
	Points(Tensor),
	/// Mesh vertices and matching normals, each `[count][3]` f32.
	Mesh { vertices: Tensor, normals: Tensor },
	None,
}

/// Single dispatch entry point over the kernel set.
pub fn execute(op: KernelOp<'_>) -> Result<KernelOutput> {
	match op {
		KernelOp::Unproject(args) => Ok(KernelOutput::VertexMap(unproject(&args)?)),
		KernelOp::Touch(args) => Ok(KernelOutput::BlockCoords(touch(&args)?)),
		KernelOp::Integrate(mut args) => {
			integrate(&mut args)?;
			Ok(KernelOutput::Integrated)
		}
		KernelOp::SurfaceExtraction(args) => {
			Ok(KernelOutput::Points(extract_surface_points(&args)?))
		}
		KernelOp::MarchingCubes(mut args) => {
			let (vertices, normals) = marching_cubes(&mut args)?;
			Ok(KernelOutput::Mesh { vertices, normals })
		}
		KernelOp::RayCasting => Ok(KernelOutput::None),
		KernelOp::Debug => {
			launch(10, |_| {});
			Ok(KernelOutput::None)
		}
	}
}
