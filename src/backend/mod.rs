// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Every handle keeps an Arc to its device, so the device is destroyed last.

pub mod buffer;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod resource;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod types;

pub use buffer::{BufferDescription, DeviceBuffer};
pub use command::CommandList;
pub use device::GraphicsDevice;
pub use pipeline::{
    BlendState, DepthStencilState, FaceCullMode, FrontFace, GraphicsPipelineDescription, Pipeline,
    PolygonFillMode, PrimitiveTopology, RasterizerState, ShaderSetDescription,
    VertexElementDescription, VertexElementFormat, VertexElementSemantic, VertexLayoutDescription,
};
pub use resource::{
    BindableResource, ResourceLayout, ResourceLayoutDescription, ResourceLayoutElementDescription,
    ResourceSet, ResourceSetDescription,
};
pub use sampler::{Sampler, SamplerDescription, SamplerFilter};
pub use shader::{Shader, ShaderDescription, ShaderStage};
pub use swapchain::{Framebuffer, OutputDescription, Swapchain};
pub use texture::{Texture, TextureDescription, TextureView};
pub use types::{
    BufferUsage, GraphicsDeviceOptions, IndexFormat, PixelFormat, ResourceKind, RgbaFloat,
    ShaderStages, TextureUsage,
};
