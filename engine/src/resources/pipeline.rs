use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use log::*;
use vulkanalia::vk;

use crate::gpu::{GpuDevice, PipelineDesc};
use crate::renderer::RenderTarget;
use crate::resources::DescriptorSetLayout;

/// An immutable graphics pipeline and its layout.
///
/// Set index `n` of the layout is `set_layouts[n]` as passed to [`Pipeline::new`].
pub struct Pipeline<G: GpuDevice> {
    gpu: Rc<G>,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    _set_layouts: Vec<Rc<DescriptorSetLayout<G>>>,
}

impl<G: GpuDevice> Pipeline<G> {
    pub fn new(
        gpu: &Rc<G>,
        target: &RenderTarget,
        vertex_shader: &[u8],
        fragment_shader: &[u8],
        set_layouts: &[Rc<DescriptorSetLayout<G>>],
        depth_compare: vk::CompareOp,
    ) -> Result<Self> {
        let handles = set_layouts.iter().map(|l| l.handle()).collect::<Vec<_>>();
        let (layout, pipeline) = gpu.create_pipeline(&PipelineDesc {
            vertex_shader,
            fragment_shader,
            set_layouts: &handles,
            depth_compare,
            render_pass: target.render_pass,
            extent: target.extent,
        })?;

        debug!("Created pipeline with {} descriptor set layouts.", handles.len());

        Ok(Self {
            gpu: Rc::clone(gpu),
            layout,
            pipeline,
            _set_layouts: set_layouts.to_vec(),
        })
    }

    /// Loads pre-compiled SPIR-V from disk.
    pub fn from_files(
        gpu: &Rc<G>,
        target: &RenderTarget,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
        set_layouts: &[Rc<DescriptorSetLayout<G>>],
        depth_compare: vk::CompareOp,
    ) -> Result<Self> {
        let read = |path: &Path| {
            fs::read(path).with_context(|| format!("Failed to read shader `{}`.", path.display()))
        };
        let vertex_shader = read(vertex_path.as_ref())?;
        let fragment_shader = read(fragment_path.as_ref())?;

        Self::new(
            gpu,
            target,
            &vertex_shader,
            &fragment_shader,
            set_layouts,
            depth_compare,
        )
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl<G: GpuDevice> Drop for Pipeline<G> {
    fn drop(&mut self) {
        self.gpu.destroy_pipeline(self.layout, self.pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{DescriptorKind, LayoutBinding};
    use crate::mock::MockGpu;
    use crate::renderer::tests::target;

    #[test]
    fn set_index_follows_layout_order() {
        let gpu = Rc::new(MockGpu::new());
        let binding = |kind| [LayoutBinding::new(0, kind, vk::ShaderStageFlags::ALL_GRAPHICS)];
        let global =
            DescriptorSetLayout::new(&gpu, &binding(DescriptorKind::UniformBuffer)).unwrap();
        let object =
            DescriptorSetLayout::new(&gpu, &binding(DescriptorKind::CombinedImageSampler))
                .unwrap();

        let pipeline = Pipeline::new(
            &gpu,
            &target(3),
            &[1, 2, 3, 4],
            &[5, 6, 7, 8],
            &[Rc::clone(&global), Rc::clone(&object)],
            vk::CompareOp::LESS,
        )
        .unwrap();

        assert_eq!(
            gpu.pipeline_set_layouts(pipeline.layout()),
            vec![global.handle(), object.handle()]
        );
    }

    #[test]
    fn layouts_outlive_the_pipeline() {
        let gpu = Rc::new(MockGpu::new());
        let layout = DescriptorSetLayout::new(
            &gpu,
            &[LayoutBinding::new(
                0,
                DescriptorKind::UniformBuffer,
                vk::ShaderStageFlags::VERTEX,
            )],
        )
        .unwrap();
        let pipeline = Pipeline::new(
            &gpu,
            &target(2),
            &[1, 2, 3, 4],
            &[5, 6, 7, 8],
            &[layout],
            vk::CompareOp::LESS,
        )
        .unwrap();
        assert_eq!(gpu.live_of("descriptor set layout"), 1);

        drop(pipeline);
        assert_eq!(
            gpu.destroyed(),
            vec!["pipeline", "pipeline layout", "descriptor set layout"]
        );
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn missing_shader_file_is_an_error() {
        let gpu = Rc::new(MockGpu::new());
        let result = Pipeline::from_files(
            &gpu,
            &target(2),
            "no/such/vert.spv",
            "no/such/frag.spv",
            &[],
            vk::CompareOp::LESS,
        );
        assert!(result.is_err());
        assert_eq!(gpu.live_count(), 0);
    }
}
