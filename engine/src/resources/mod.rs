//! GPU resource bundles. Each constructor acquires its device objects and
//! `Drop` releases them; dependencies are held through `Rc` so they always
//! outlive their dependents.

mod descriptor;
mod model;
mod pipeline;
mod texture;
mod vertex;

pub use descriptor::{DescriptorPool, DescriptorSet, DescriptorSetLayout, SetElement};
pub use model::Model;
pub use pipeline::Pipeline;
pub use texture::{mip_level_count, Texture};
pub use vertex::Vertex;
