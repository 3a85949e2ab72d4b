//! Mesh and image loading. The core only needs vertices + indices and RGBA8
//! pixels; file formats are left to `tobj` and `image`.

use std::path::Path;

use anyhow::{Context, Result};
use log::*;

use crate::error::EngineError;
use crate::resources::Vertex;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(EngineError::InvalidAsset {
                path: "<memory>".into(),
                reason: format!(
                    "{}x{} image needs {} RGBA bytes, got {}",
                    width,
                    height,
                    expected,
                    pixels.len()
                ),
            }
            .into());
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }
}

/// Loads a triangulated OBJ file, emitting one vertex per index.
pub fn load_mesh(path: impl AsRef<Path>) -> Result<MeshData> {
    let path = path.as_ref();
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _) = tobj::load_obj(path, &options)
        .with_context(|| format!("Failed to load mesh `{}`.", path.display()))?;

    let mut mesh = MeshData::default();
    for model in &models {
        let m = &model.mesh;
        for &index in &m.indices {
            let i = index as usize;
            let normal = if m.normals.is_empty() {
                [0.0, 0.0, 0.0]
            } else {
                [m.normals[3 * i], m.normals[3 * i + 1], m.normals[3 * i + 2]]
            };
            let uv = if m.texcoords.is_empty() {
                [0.0, 0.0]
            } else {
                [m.texcoords[2 * i], 1.0 - m.texcoords[2 * i + 1]]
            };

            mesh.vertices.push(Vertex {
                pos: [m.positions[3 * i], m.positions[3 * i + 1], m.positions[3 * i + 2]],
                normal,
                uv,
            });
            mesh.indices.push(mesh.vertices.len() as u32 - 1);
        }
    }

    if mesh.indices.is_empty() {
        return Err(EngineError::InvalidAsset {
            path: path.to_path_buf(),
            reason: String::from("mesh has no triangles"),
        }
        .into());
    }

    debug!(
        "Loaded mesh `{}` ({} vertices).",
        path.display(),
        mesh.vertices.len()
    );
    Ok(mesh)
}

/// Loads any image format `image` understands and converts it to RGBA8.
pub fn load_image(path: impl AsRef<Path>) -> Result<ImageData> {
    let path = path.as_ref();
    let rgba = image::open(path)
        .with_context(|| format!("Failed to load texture image `{}`.", path.display()))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();

    debug!("Loaded image `{}` ({}x{}).", path.display(), width, height);
    ImageData::new(width, height, rgba.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_data_rejects_wrong_pixel_count() {
        assert!(ImageData::new(2, 2, vec![0; 15]).is_err());
        assert!(ImageData::new(0, 2, Vec::new()).is_err());
        assert!(ImageData::new(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn missing_mesh_file_is_an_error() {
        let error = load_mesh("does/not/exist.obj").unwrap_err();
        assert!(format!("{}", error).contains("does/not/exist.obj"));
    }
}
