use std::rc::Rc;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use engine::vk;
use engine::{
    AppConfig, Application, DescriptorKind, DescriptorSet, DescriptorSetLayout, FrameInfo,
    FrameRecorder, GpuDevice, LayoutBinding, Model, Pipeline, PoolBudget, SetElement,
    SetupContext, Texture, WindowParams,
};
use glam::{Mat4, Vec3};
use log::*;

use crate::highscore::HighScore;
use crate::state::{GameState, Steering};

const MODEL_DIR: &str = "models";
const TEXTURE_DIR: &str = "textures";
const VERTEX_SHADER: &str = "shaders/vert.spv";
const FRAGMENT_SHADER: &str = "shaders/frag.spv";

/// Boat plus two rocks.
const OBJECT_COUNT: u32 = 3;

const ROCKS: [(&str, &str, Vec3); 2] = [
    ("Rock1.obj", "Rock1.png", Vec3::new(-2.0, 0.0, 9.0)),
    ("Rock2.obj", "Rock2.jpg", Vec3::new(-4.5, 0.0, 15.0)),
];

const CAMERA_OFFSET: Vec3 = Vec3::new(0.0, 3.0, -4.0);
const FIELD_OF_VIEW_DEGREES: f32 = 90.0;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 100.0;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct GlobalUniforms {
    pub view: Mat4,
    pub proj: Mat4,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: Mat4,
}

impl GlobalUniforms {
    /// Camera behind and above `target`, looking at it.
    pub fn following(target: Vec3, extent: vk::Extent2D) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(
            FIELD_OF_VIEW_DEGREES.to_radians(),
            aspect,
            NEAR_PLANE,
            FAR_PLANE,
        );
        // Vulkan clip space has Y pointing down.
        proj.y_axis.y *= -1.0;

        Self {
            view: Mat4::look_at_rh(target + CAMERA_OFFSET, target, Vec3::Y),
            proj,
        }
    }
}

struct SceneObject<G: GpuDevice> {
    model: Model<G>,
    set: DescriptorSet<G>,
}

impl<G: GpuDevice> SceneObject<G> {
    fn load(
        ctx: &SetupContext<'_, G>,
        layout: &Rc<DescriptorSetLayout<G>>,
        mesh: &str,
        texture: &str,
    ) -> Result<Self> {
        let model = Model::from_file(ctx.gpu, format!("{}/{}", MODEL_DIR, mesh))?;
        let texture = Rc::new(Texture::from_file(
            ctx.gpu,
            format!("{}/{}", TEXTURE_DIR, texture),
        )?);
        let set = DescriptorSet::new(
            ctx.gpu,
            ctx.pool,
            layout,
            vec![
                SetElement::Uniform {
                    binding: 0,
                    size: std::mem::size_of::<ObjectUniforms>() as u64,
                },
                SetElement::Texture {
                    binding: 1,
                    texture,
                },
            ],
        )?;

        Ok(Self { model, set })
    }

    fn record(&self, recorder: &mut FrameRecorder<'_, G>, pipeline: &Pipeline<G>) -> Result<()> {
        recorder.bind_descriptor_set(pipeline, 1, &self.set)?;
        recorder.draw_model(&self.model);
        Ok(())
    }
}

struct Scene<G: GpuDevice> {
    pipeline: Pipeline<G>,
    global: DescriptorSet<G>,
    boat: SceneObject<G>,
    rocks: Vec<(SceneObject<G>, Vec3)>,
}

impl<G: GpuDevice> Scene<G> {
    fn load(ctx: &SetupContext<'_, G>) -> Result<Self> {
        let object_layout = DescriptorSetLayout::new(
            ctx.gpu,
            &[
                LayoutBinding::new(0, DescriptorKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
                LayoutBinding::new(
                    1,
                    DescriptorKind::CombinedImageSampler,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        )?;
        let global_layout = DescriptorSetLayout::new(
            ctx.gpu,
            &[LayoutBinding::new(
                0,
                DescriptorKind::UniformBuffer,
                vk::ShaderStageFlags::ALL_GRAPHICS,
            )],
        )?;

        let pipeline = Pipeline::from_files(
            ctx.gpu,
            ctx.target,
            VERTEX_SHADER,
            FRAGMENT_SHADER,
            &[Rc::clone(&global_layout), Rc::clone(&object_layout)],
            vk::CompareOp::LESS,
        )?;

        let boat = SceneObject::load(ctx, &object_layout, "Boat.obj", "Boat.bmp")
            .context("Failed to load the boat.")?;
        let rocks = ROCKS
            .iter()
            .map(|(mesh, texture, position)| {
                SceneObject::load(ctx, &object_layout, mesh, texture)
                    .with_context(|| format!("Failed to load rock `{}`.", mesh))
                    .map(|rock| (rock, *position))
            })
            .collect::<Result<Vec<_>>>()?;

        let global = DescriptorSet::new(
            ctx.gpu,
            ctx.pool,
            &global_layout,
            vec![SetElement::Uniform {
                binding: 0,
                size: std::mem::size_of::<GlobalUniforms>() as u64,
            }],
        )?;

        Ok(Self {
            pipeline,
            global,
            boat,
            rocks,
        })
    }
}

/// The boat runner game: a boat drifting north past rocks, steered with WASD.
pub struct BoatRunner<G: GpuDevice> {
    scene: Option<Scene<G>>,
    state: GameState,
    high_score: HighScore,
}

impl<G: GpuDevice> BoatRunner<G> {
    pub fn new(high_score: HighScore) -> Self {
        Self {
            scene: None,
            state: GameState::default(),
            high_score,
        }
    }
}

impl<G: GpuDevice> Application<G> for BoatRunner<G> {
    fn configure(&self) -> AppConfig {
        AppConfig {
            window: WindowParams {
                width: 720,
                height: 1280,
                title: String::from("Boat Runner"),
            },
            pool: PoolBudget::new(OBJECT_COUNT + 1, OBJECT_COUNT, OBJECT_COUNT + 1),
            clear_color: [1.0, 1.0, 1.0, 1.0],
        }
    }

    fn setup(&mut self, ctx: &SetupContext<'_, G>) -> Result<()> {
        let scene = Scene::load(ctx)?;
        info!(
            "Scene ready with {} rocks; pool left: {:?}.",
            scene.rocks.len(),
            ctx.pool.remaining()
        );
        self.scene = Some(scene);
        Ok(())
    }

    fn record_frame(&self, recorder: &mut FrameRecorder<'_, G>) -> Result<()> {
        let Some(scene) = &self.scene else {
            return Ok(());
        };

        recorder.bind_pipeline(&scene.pipeline);
        recorder.bind_descriptor_set(&scene.pipeline, 0, &scene.global)?;
        scene.boat.record(recorder, &scene.pipeline)?;
        for (rock, _) in &scene.rocks {
            rock.record(recorder, &scene.pipeline)?;
        }
        Ok(())
    }

    fn update_frame(&mut self, frame: &FrameInfo<'_>) -> Result<()> {
        self.state = self.state.advance(
            Steering::from_input(frame.input),
            frame.clock.delta(),
            frame.clock.elapsed(),
        );

        let (Some(scene), Some(boat)) = (&self.scene, self.state.boat()) else {
            return Ok(());
        };

        self.high_score.record(boat.distance());

        let image = frame.image_index;
        scene.global.write(
            image,
            0,
            &GlobalUniforms::following(boat.position, frame.extent),
        )?;
        scene.boat.set.write(
            image,
            0,
            &ObjectUniforms {
                model: boat.world_matrix(),
            },
        )?;
        for (rock, position) in &scene.rocks {
            rock.set.write(
                image,
                0,
                &ObjectUniforms {
                    model: Mat4::from_translation(*position),
                },
            )?;
        }

        Ok(())
    }
}
