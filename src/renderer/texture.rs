// renderer/texture.rs
use std::fmt;
use std::path::Path;

use crate::io;

#[derive(Debug)]
pub enum LoadError {
    Io(String),
    Image(String),
    /// Cube faces must all be square and share one size.
    FaceMismatch {
        face: usize,
        width: u32,
        height: u32,
    },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "IO error: {}", e),
            LoadError::Image(e) => write!(f, "image error: {}", e),
            LoadError::FaceMismatch {
                face,
                width,
                height,
            } => write!(
                f,
                "cube face {} is {}x{}, expected the first face's square size",
                face, width, height
            ),
        }
    }
}

impl std::error::Error for LoadError {}

/// Cube map plus the trilinear-clamp sampler everything here uses.
pub struct CubeMap {
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl CubeMap {
    /// Loads and decodes six face images in +X, -X, +Y, -Y, +Z, -Z order.
    /// All faces must be square and share one size.
    pub fn load(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        paths: &[&Path; 6],
    ) -> Result<Self, LoadError> {
        let mut faces = Vec::with_capacity(6);
        let mut face_size = 0u32;

        for (index, path) in paths.iter().enumerate() {
            let bytes = io::load_binary(path).map_err(LoadError::Io)?;
            let image = image::load_from_memory(&bytes)
                .map_err(|e| LoadError::Image(format!("{:?}: {}", path, e)))?
                .to_rgba8();
            let (width, height) = image.dimensions();
            if index == 0 {
                face_size = width;
            }
            if width != height || width != face_size {
                return Err(LoadError::FaceMismatch {
                    face: index,
                    width,
                    height,
                });
            }
            faces.push(image.into_raw());
        }

        Ok(Self::from_faces(device, queue, face_size, &faces))
    }

    /// 1x1 single-color cube map, used when face images are unavailable.
    pub fn solid(device: &wgpu::Device, queue: &wgpu::Queue, rgba: [u8; 4]) -> Self {
        let faces: Vec<Vec<u8>> = (0..6).map(|_| rgba.to_vec()).collect();
        Self::from_faces(device, queue, 1, &faces)
    }

    fn from_faces(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        face_size: u32,
        faces: &[Vec<u8>],
    ) -> Self {
        debug_assert_eq!(faces.len(), 6);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("CubeMap"),
            size: wgpu::Extent3d {
                width: face_size,
                height: face_size,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (layer, data) in faces.iter().enumerate() {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * face_size),
                    rows_per_image: Some(face_size),
                },
                wgpu::Extent3d {
                    width: face_size,
                    height: face_size,
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });

        Self {
            view,
            sampler: trilinear_clamp_sampler(device),
        }
    }
}

/// White 1x1 2D texture bound when a drawable has no diffuse map, so the
/// texture bind group stays valid for every shader permutation.
pub fn white_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("White1x1"),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &[255, 255, 255, 255],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
    );

    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

pub fn trilinear_clamp_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("TrilinearClamp"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    })
}
