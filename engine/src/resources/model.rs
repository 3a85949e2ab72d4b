use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use log::*;
use vulkanalia::vk;

use crate::assets::{self, MeshData};
use crate::error::EngineError;
use crate::gpu::{GpuBuffer, GpuDevice};

/// Device-local vertex and index buffers of one mesh.
pub struct Model<G: GpuDevice> {
    gpu: Rc<G>,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
}

impl<G: GpuDevice> Model<G> {
    pub fn new(gpu: &Rc<G>, mesh: &MeshData) -> Result<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(EngineError::InvalidAsset {
                path: "<memory>".into(),
                reason: String::from("mesh has no vertices or indices"),
            }
            .into());
        }

        let vertex_buffer = gpu.upload_buffer(
            bytemuck::cast_slice(&mesh.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = match gpu.upload_buffer(
            bytemuck::cast_slice(&mesh.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                gpu.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };

        Ok(Self {
            gpu: Rc::clone(gpu),
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        })
    }

    pub fn from_file(gpu: &Rc<G>, path: impl AsRef<Path>) -> Result<Self> {
        let mesh = assets::load_mesh(path)?;
        Self::new(gpu, &mesh)
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.buffer
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl<G: GpuDevice> Drop for Model<G> {
    fn drop(&mut self) {
        trace!("Destroying model ({} indices).", self.index_count);
        self.gpu.destroy_buffer(self.index_buffer);
        self.gpu.destroy_buffer(self.vertex_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpu;
    use crate::resources::Vertex;

    fn triangle() -> MeshData {
        MeshData {
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn uploads_vertices_and_indices() {
        let gpu = Rc::new(MockGpu::new());
        let model = Model::new(&gpu, &triangle()).unwrap();

        assert_eq!(model.index_count(), 3);
        assert_eq!(gpu.live_of("buffer"), 2);
        drop(model);
        assert_eq!(gpu.live_count(), 0);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn rejects_empty_mesh() {
        let gpu = Rc::new(MockGpu::new());
        assert!(Model::new(&gpu, &MeshData::default()).is_err());
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn failed_index_upload_releases_vertex_buffer() {
        let gpu = Rc::new(MockGpu::new());
        gpu.fail_on("upload_buffer", 1);

        assert!(Model::new(&gpu, &triangle()).is_err());
        assert_eq!(gpu.live_count(), 0);
        assert!(gpu.violations().is_empty());
    }
}
