use bytemuck::{Pod, bytes_of};

pub(super) fn create_uniform_buffer(
    device: &wgpu::Device,
    label: &str,
    data: &impl Pod,
) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;

    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytes_of(data),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

pub(super) fn buffer_entry(
    binding: u32,
    ty: wgpu::BufferBindingType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(super) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    buffer_entry(binding, wgpu::BufferBindingType::Uniform)
}

/// Compiled compute pipeline with its bind group layout.
///
/// Bindings are laid out as `reads` read-only storage buffers, then `writes`
/// read-write storage buffers, then one uniform block.
#[derive(Debug)]
pub(super) struct ComputeKernel {
    pub(super) label: &'static str,
    pub(super) pipeline: wgpu::ComputePipeline,
    pub(super) bind_group_layout: wgpu::BindGroupLayout,
    pub(super) bindings: u32,
}

impl ComputeKernel {
    pub(super) fn new(
        device: &wgpu::Device,
        label: &'static str,
        source: &'static str,
        reads: u32,
        writes: u32,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let entries: Vec<_> = (0..reads)
            .map(|binding| buffer_entry(binding, wgpu::BufferBindingType::Storage { read_only: true }))
            .chain((reads..reads + writes).map(|binding| {
                buffer_entry(binding, wgpu::BufferBindingType::Storage { read_only: false })
            }))
            .chain(std::iter::once(uniform_entry(reads + writes)))
            .collect();

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Self {
            label,
            pipeline,
            bind_group_layout,
            bindings: reads + writes + 1,
        }
    }
}
