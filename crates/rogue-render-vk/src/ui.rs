// SPDX-License-Identifier: CEPL-1.0
//! Dear ImGui on Vulkan: texture registration, the UI pipeline and draw-data
//! recording. Each draw command binds one combined image sampler whose
//! descriptor set handle doubles as the ImGui texture id.
use std::io::Cursor;
use std::mem;

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use ash::vk::Handle;
use glam::{Mat4, Vec2};
use imgui::internal::RawWrapper;
use imgui::{DrawCmd, DrawData, DrawIdx, DrawVert, TextureId};
use rogue_render::{GpuTexture, TextureUploader, UiTexture};
use tracing::{debug, info, warn};

use crate::commands::{create_buffer_and_memory, write_host_memory};
use crate::texture::{VkTexture, VkTextureUploader};

/// Size of the UI descriptor pool. Every registered texture holds one set.
pub const UI_DESCRIPTOR_POOL_SIZE: u32 = 1000;

const UI_VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ui.vert.spv"));
const UI_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ui.frag.spv"));

/// Turns (sampler, view) pairs into [`UiTexture`] handles and back.
#[derive(Clone)]
pub struct UiTextureRegistrar {
    device: ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
}

impl UiTextureRegistrar {
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        };
        let lci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &binding,
            ..Default::default()
        };
        let layout = device
            .create_descriptor_set_layout(&lci, None)
            .context("create_descriptor_set_layout(ui)")?;

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: UI_DESCRIPTOR_POOL_SIZE,
        };
        let pci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets: UI_DESCRIPTOR_POOL_SIZE,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        let pool = device
            .create_descriptor_pool(&pci, None)
            .context("create_descriptor_pool(ui)")
            .inspect_err(|_| device.destroy_descriptor_set_layout(layout, None))?;

        Ok(Self {
            device: device.clone(),
            pool,
            layout,
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub unsafe fn register(&self, sampler: vk::Sampler, view: vk::ImageView) -> Result<UiTexture> {
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: 1,
            p_set_layouts: &self.layout,
            ..Default::default()
        };
        let set = self
            .device
            .allocate_descriptor_sets(&ai)
            .context("allocate_descriptor_sets(ui texture)")?[0];

        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        self.device.update_descriptor_sets(&[write], &[]);
        Ok(UiTexture::from_raw(set.as_raw()))
    }

    pub unsafe fn unregister(&self, texture: UiTexture) {
        let set = vk::DescriptorSet::from_raw(texture.raw());
        // Pool has FREE_DESCRIPTOR_SET; the only failure mode is a stale handle.
        let _ = self.device.free_descriptor_sets(self.pool, &[set]);
    }

    /// Destroys the pool and every set still allocated from it.
    pub unsafe fn destroy(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.pool = vk::DescriptorPool::null();
        }
        if self.layout != vk::DescriptorSetLayout::null() {
            self.device.destroy_descriptor_set_layout(self.layout, None);
            self.layout = vk::DescriptorSetLayout::null();
        }
    }
}

/// Queues a textured quad on the background draw list, behind every window.
pub fn draw_image(ui: &imgui::Ui, texture: UiTexture, position: Vec2, size: Vec2) {
    let Some(id) = imgui_texture_id(texture) else {
        warn!("ui: texture handle {:#x} does not fit an ImGui id", texture.raw());
        return;
    };
    let max = position + size;
    ui.get_background_draw_list()
        .add_image(id, [position.x, position.y], [max.x, max.y])
        .build();
}

/// ImGui ids are pointer sized. On 32-bit targets a 64-bit handle may not fit.
pub(crate) fn imgui_texture_id(texture: UiTexture) -> Option<TextureId> {
    usize::try_from(texture.raw()).ok().map(TextureId::new)
}

/// Inverse of [`imgui_texture_id`]; widening, never lossy.
pub(crate) fn descriptor_set_of(id: TextureId) -> vk::DescriptorSet {
    vk::DescriptorSet::from_raw(id.id() as u64)
}

/// Scissor bound: the draw data's pixel size, never past the swapchain extent.
pub(crate) fn clip_bounds(draw_size: [f32; 2], extent: vk::Extent2D) -> [f32; 2] {
    [
        draw_size[0].min(extent.width as f32),
        draw_size[1].min(extent.height as f32),
    ]
}

/// Maps the display rectangle to clip space, top-left at (-1, -1).
pub(crate) fn ortho_projection(display_pos: [f32; 2], display_size: [f32; 2]) -> Mat4 {
    let left = display_pos[0];
    let right = display_pos[0] + display_size[0];
    let top = display_pos[1];
    let bottom = display_pos[1] + display_size[1];
    Mat4::orthographic_rh(left, right, top, bottom, -1.0, 1.0)
}

/// Clip rectangle in framebuffer pixels, or `None` when nothing is visible.
pub(crate) fn scissor_rect(
    clip_rect: [f32; 4],
    clip_off: [f32; 2],
    clip_scale: [f32; 2],
    fb: [f32; 2],
) -> Option<vk::Rect2D> {
    let min_x = ((clip_rect[0] - clip_off[0]) * clip_scale[0]).max(0.0);
    let min_y = ((clip_rect[1] - clip_off[1]) * clip_scale[1]).max(0.0);
    let max_x = ((clip_rect[2] - clip_off[0]) * clip_scale[0]).min(fb[0]);
    let max_y = ((clip_rect[3] - clip_off[1]) * clip_scale[1]).min(fb[1]);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: min_x as i32,
            y: min_y as i32,
        },
        extent: vk::Extent2D {
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        },
    })
}

#[derive(Clone, Copy, Default)]
struct HostBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl HostBuffer {
    /// Grows to at least `needed` bytes. Only safe once the GPU is done with
    /// the current buffer, which the frame slot fence guarantees.
    unsafe fn ensure(
        &mut self,
        device: &ash::Device,
        props: &vk::PhysicalDeviceMemoryProperties,
        needed: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<()> {
        if needed <= self.size {
            return Ok(());
        }
        let size = needed.next_power_of_two().max(64 * 1024);
        let (buffer, memory) = create_buffer_and_memory(
            device,
            props,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        self.destroy(device);
        *self = HostBuffer {
            buffer,
            memory,
            size,
        };
        Ok(())
    }

    unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.buffer != vk::Buffer::null() {
            device.destroy_buffer(self.buffer, None);
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory, None);
        }
        *self = HostBuffer::default();
    }
}

/// Vertex and index storage for one frame slot.
#[derive(Clone, Copy, Default)]
struct SlotBuffers {
    vertices: HostBuffer,
    indices: HostBuffer,
}

unsafe fn create_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
) -> Result<vk::Pipeline> {
    let vs_code = read_spv(&mut Cursor::new(UI_VERT_SPV)).context("read_spv(ui.vert)")?;
    let fs_code = read_spv(&mut Cursor::new(UI_FRAG_SPV)).context("read_spv(ui.frag)")?;

    let vs_ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: vs_code.len() * 4,
        p_code: vs_code.as_ptr(),
        ..Default::default()
    };
    let fs_ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: fs_code.len() * 4,
        p_code: fs_code.as_ptr(),
        ..Default::default()
    };
    let vs = device
        .create_shader_module(&vs_ci, None)
        .context("create_shader_module(ui.vert)")?;
    let fs = device
        .create_shader_module(&fs_ci, None)
        .context("create_shader_module(ui.frag)")
        .inspect_err(|_| device.destroy_shader_module(vs, None))?;

    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // Matches imgui::DrawVert { pos: [f32; 2], uv: [f32; 2], col: [u8; 4] }
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: mem::size_of::<DrawVert>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attrs = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 8,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R8G8B8A8_UNORM,
            offset: 16,
        },
    ];
    let vi = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attrs.len() as u32,
        p_vertex_attribute_descriptions: attrs.as_ptr(),
        ..Default::default()
    };
    let ia = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let vp = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let rs = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let ms = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let blend = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    };
    let cb = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &blend,
        ..Default::default()
    };
    let ds = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dy = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };

    let gp = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vi,
        p_input_assembly_state: &ia,
        p_viewport_state: &vp,
        p_rasterization_state: &rs,
        p_multisample_state: &ms,
        p_depth_stencil_state: &ds,
        p_color_blend_state: &cb,
        p_dynamic_state: &dy,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let result = device
        .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&gp), None)
        .map_err(|(_, e)| anyhow::anyhow!("create_graphics_pipelines(ui): {e:?}"));

    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);

    Ok(result?[0])
}

/// Records ImGui draw data into the main render pass.
pub struct UiBackend {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    font: Option<VkTexture>,
    slots: Vec<SlotBuffers>,
}

impl UiBackend {
    /// Builds the pipeline against `render_pass` and uploads the font atlas.
    /// `slot_count` must match the number of frames in flight.
    pub fn new(
        ctx: &mut imgui::Context,
        uploader: &mut VkTextureUploader,
        render_pass: vk::RenderPass,
        slot_count: usize,
    ) -> Result<Self> {
        let device = uploader.device().clone();
        let memory_properties = *uploader.memory_properties();
        let set_layout = uploader.registrar().layout();

        unsafe {
            let push = vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: mem::size_of::<Mat4>() as u32,
            };
            let lci = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                set_layout_count: 1,
                p_set_layouts: &set_layout,
                push_constant_range_count: 1,
                p_push_constant_ranges: &push,
                ..Default::default()
            };
            let pipeline_layout = device
                .create_pipeline_layout(&lci, None)
                .context("create_pipeline_layout(ui)")?;
            let pipeline = create_pipeline(&device, pipeline_layout, render_pass)
                .inspect_err(|_| device.destroy_pipeline_layout(pipeline_layout, None))?;

            let mut backend = Self {
                device,
                memory_properties,
                pipeline_layout,
                pipeline,
                font: None,
                slots: vec![SlotBuffers::default(); slot_count.max(1)],
            };

            let (width, height, pixels) = {
                let atlas = ctx.fonts().build_rgba32_texture();
                (atlas.width, atlas.height, atlas.data.to_vec())
            };
            let font = match uploader.upload(&pixels, width, height) {
                Ok(font) => font,
                Err(e) => {
                    backend.destroy(uploader);
                    return Err(e.context("upload font atlas"));
                }
            };
            let Some(font_id) = imgui_texture_id(font.ui_texture()) else {
                uploader.release(font);
                backend.destroy(uploader);
                return Err(anyhow!("font atlas handle does not fit an ImGui texture id"));
            };
            ctx.fonts().tex_id = font_id;
            info!("ui: font atlas uploaded ({}x{})", width, height);
            backend.font = Some(font);

            Ok(backend)
        }
    }

    /// Rebuilds the pipeline for a new render pass. Called after the
    /// presentation surface has been recreated.
    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        unsafe {
            let pipeline = create_pipeline(&self.device, self.pipeline_layout, render_pass)?;
            self.device.destroy_pipeline(self.pipeline, None);
            self.pipeline = pipeline;
        }
        debug!("ui: pipeline rebuilt");
        Ok(())
    }

    /// Must be called inside the main render pass, after the fence of `slot`
    /// has been waited. `extent` is the framebuffer being drawn into.
    pub unsafe fn render(
        &mut self,
        draw_data: &DrawData,
        cmd: vk::CommandBuffer,
        slot: usize,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let fb = [
            draw_data.display_size[0] * draw_data.framebuffer_scale[0],
            draw_data.display_size[1] * draw_data.framebuffer_scale[1],
        ];
        if draw_data.total_vtx_count <= 0 || fb[0] <= 0.0 || fb[1] <= 0.0 {
            return Ok(());
        }

        let slot_count = self.slots.len();
        let bufs = &mut self.slots[slot % slot_count];
        let vtx_bytes = draw_data.total_vtx_count as usize * mem::size_of::<DrawVert>();
        let idx_bytes = draw_data.total_idx_count as usize * mem::size_of::<DrawIdx>();
        bufs.vertices.ensure(
            &self.device,
            &self.memory_properties,
            vtx_bytes as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        bufs.indices.ensure(
            &self.device,
            &self.memory_properties,
            idx_bytes as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let mut vtx_data = Vec::with_capacity(vtx_bytes);
        let mut idx_data = Vec::with_capacity(idx_bytes);
        for list in draw_data.draw_lists() {
            let vtx = list.vtx_buffer();
            vtx_data.extend_from_slice(std::slice::from_raw_parts(
                vtx.as_ptr() as *const u8,
                mem::size_of_val(vtx),
            ));
            idx_data.extend_from_slice(bytemuck::cast_slice(list.idx_buffer()));
        }
        write_host_memory(&self.device, bufs.vertices.memory, &vtx_data)?;
        write_host_memory(&self.device, bufs.indices.memory, &idx_data)?;

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: fb[0],
            height: fb[1],
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let clip = clip_bounds(fb, extent);
        let proj = ortho_projection(draw_data.display_pos, draw_data.display_size);
        let proj_cols = proj.to_cols_array();
        let proj_bytes: &[u8] = bytemuck::cast_slice(&proj_cols);
        let (vbuf, ibuf) = (bufs.vertices.buffer, bufs.indices.buffer);

        let setup = |device: &ash::Device| {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[vbuf], &[0]);
            device.cmd_bind_index_buffer(cmd, ibuf, 0, vk::IndexType::UINT16);
            device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            device.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                proj_bytes,
            );
        };
        setup(&self.device);

        let mut vtx_base = 0i32;
        let mut idx_base = 0u32;
        for list in draw_data.draw_lists() {
            for draw_cmd in list.commands() {
                match draw_cmd {
                    DrawCmd::Elements { count, cmd_params } => {
                        let Some(scissor) = scissor_rect(
                            cmd_params.clip_rect,
                            draw_data.display_pos,
                            draw_data.framebuffer_scale,
                            clip,
                        ) else {
                            continue;
                        };
                        let set = descriptor_set_of(cmd_params.texture_id);
                        self.device.cmd_set_scissor(cmd, 0, &[scissor]);
                        self.device.cmd_bind_descriptor_sets(
                            cmd,
                            vk::PipelineBindPoint::GRAPHICS,
                            self.pipeline_layout,
                            0,
                            &[set],
                            &[],
                        );
                        self.device.cmd_draw_indexed(
                            cmd,
                            count as u32,
                            1,
                            idx_base + cmd_params.idx_offset as u32,
                            vtx_base + cmd_params.vtx_offset as i32,
                            0,
                        );
                    }
                    DrawCmd::ResetRenderState => setup(&self.device),
                    DrawCmd::RawCallback { callback, raw_cmd } => callback(list.raw(), raw_cmd),
                }
            }
            vtx_base += list.vtx_buffer().len() as i32;
            idx_base += list.idx_buffer().len() as u32;
        }
        Ok(())
    }

    /// Releases the font atlas through `uploader`, then the buffers and pipeline.
    pub fn destroy(&mut self, uploader: &mut VkTextureUploader) {
        if let Some(font) = self.font.take() {
            uploader.release(font);
        }
        unsafe {
            for slot in &mut self.slots {
                slot.vertices.destroy(&self.device);
                slot.indices.destroy(&self.device);
            }
            if self.pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(self.pipeline_layout, None);
                self.pipeline_layout = vk::PipelineLayout::null();
            }
        }
        debug!("ui: backend destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn projection_maps_display_corners_to_clip_corners() {
        let p = ortho_projection([0.0, 0.0], [1280.0, 720.0]);
        let tl = p * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let br = p * Vec4::new(1280.0, 720.0, 0.0, 1.0);
        assert!((tl.x + 1.0).abs() < 1e-5 && (tl.y + 1.0).abs() < 1e-5);
        assert!((br.x - 1.0).abs() < 1e-5 && (br.y - 1.0).abs() < 1e-5);
        assert!((0.0..=1.0).contains(&tl.z));
    }

    #[test]
    fn projection_honours_display_offset() {
        let p = ortho_projection([100.0, 50.0], [200.0, 100.0]);
        let c = p * Vec4::new(200.0, 100.0, 0.0, 1.0);
        assert!(c.x.abs() < 1e-5 && c.y.abs() < 1e-5);
    }

    #[test]
    fn scissor_is_clamped_to_framebuffer() {
        let r = scissor_rect([-10.0, 5.0, 2000.0, 50.0], [0.0, 0.0], [1.0, 1.0], [1280.0, 720.0])
            .unwrap();
        assert_eq!((r.offset.x, r.offset.y), (0, 5));
        assert_eq!((r.extent.width, r.extent.height), (1280, 45));
    }

    #[test]
    fn scissor_scales_for_hidpi() {
        let r = scissor_rect([10.0, 10.0, 20.0, 20.0], [0.0, 0.0], [2.0, 2.0], [2560.0, 1440.0])
            .unwrap();
        assert_eq!((r.offset.x, r.extent.width), (20, 20));
    }

    #[test]
    fn scissor_never_leaves_a_smaller_swapchain() {
        // window already 1280x720, swapchain still at its previous 1024x600
        let extent = vk::Extent2D {
            width: 1024,
            height: 600,
        };
        let clip = clip_bounds([1280.0, 720.0], extent);
        assert_eq!(clip, [1024.0, 600.0]);
        let r = scissor_rect([900.0, 500.0, 1280.0, 720.0], [0.0, 0.0], [1.0, 1.0], clip).unwrap();
        assert_eq!((r.offset.x, r.offset.y), (900, 500));
        assert_eq!((r.extent.width, r.extent.height), (124, 100));
    }

    #[test]
    fn clip_bounds_keep_draw_size_inside_a_larger_swapchain() {
        let extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        assert_eq!(clip_bounds([800.0, 600.0], extent), [800.0, 600.0]);
    }

    #[test]
    fn texture_id_maps_back_to_the_same_descriptor_set() {
        let tex = UiTexture::from_raw(0x7fff_0040);
        let id = imgui_texture_id(tex).unwrap();
        assert_eq!(descriptor_set_of(id).as_raw(), 0x7fff_0040);
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn oversized_handle_is_refused_on_32_bit() {
        assert!(imgui_texture_id(UiTexture::from_raw(1 << 40)).is_none());
    }

    #[test]
    fn empty_clip_is_skipped() {
        assert!(scissor_rect([50.0, 50.0, 50.0, 80.0], [0.0, 0.0], [1.0, 1.0], [100.0, 100.0]).is_none());
        assert!(scissor_rect([200.0, 0.0, 300.0, 10.0], [0.0, 0.0], [1.0, 1.0], [100.0, 100.0]).is_none());
    }
}
