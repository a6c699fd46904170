//! Scoped device resources and launch geometry.
//!
//! Every accelerator kernel runs inside one [`DeviceScope`]: allocate a
//! storage buffer per tensor argument, upload, launch, download. All buffers
//! created through the scope are destroyed when it drops, whichever way the
//! call exits.

use std::panic::Location;
use std::sync::mpsc;

use bytemuck::{Pod, cast_slice};
use half::slice::HalfFloatSliceExt;
use log::{debug, trace};

use super::utils::{ComputeKernel, create_uniform_buffer};
use crate::error::{KernelError, Result};
use crate::tensor::Tensor;
use gan_utils::gpu::GpuContext;

/// Threads per side of a 2-D block.
pub const BLOCK_2D: u32 = 16;
/// Threads per 1-D block.
pub const BLOCK_1D: u32 = 256;

const ELEMENT_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Workgroup counts for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub workgroups: [u32; 3],
}

impl LaunchGeometry {
    /// One thread per `(x, y, z)` cell with 16×16 blocks; `depth` is not
    /// blocked.
    pub fn grid_2d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            workgroups: [width.div_ceil(BLOCK_2D), height.div_ceil(BLOCK_2D), depth],
        }
    }

    /// One thread per element with 256-thread blocks.
    ///
    /// When the block count exceeds `max_per_dimension`, the grid folds into
    /// a second dimension; shaders recover the flat index from
    /// `num_workgroups`.
    pub fn flat(len: u32, max_per_dimension: u32) -> Self {
        let blocks = len.div_ceil(BLOCK_1D).max(1);
        if blocks <= max_per_dimension {
            Self {
                workgroups: [blocks, 1, 1],
            }
        } else {
            Self {
                workgroups: [max_per_dimension, blocks.div_ceil(max_per_dimension), 1],
            }
        }
    }

    /// One workgroup per item along x.
    pub fn per_group(count: u32) -> Self {
        Self {
            workgroups: [count, 1, 1],
        }
    }
}

/// Handle to a buffer owned by a [`DeviceScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Slot {
    index: usize,
    len: usize,
}

/// Per-call set of device buffers for one kernel invocation.
pub(super) struct DeviceScope<'a> {
    context: &'a GpuContext,
    op: &'static str,
    location: &'static Location<'static>,
    buffers: Vec<wgpu::Buffer>,
}

impl<'a> DeviceScope<'a> {
    /// Opens a scope whose failures are attributed to the caller.
    #[track_caller]
    pub(super) fn open(context: &'a GpuContext, op: &'static str) -> Self {
        let location = Location::caller();
        trace!(target: "gan::gpu", "{op}: open device scope at {location}");
        Self {
            context,
            op,
            location,
            buffers: Vec::new(),
        }
    }

    fn fail(&self, message: impl Into<String>) -> KernelError {
        KernelError::device(self.op, self.location, message)
    }

    fn device(&self) -> &wgpu::Device {
        self.context.device()
    }

    /// Runs `f` inside a device error scope and reports anything it captured.
    fn guarded<T>(&self, filter: wgpu::ErrorFilter, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        let device = self.device();
        device.push_error_scope(filter);
        let value = f(device);
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(self.fail(err.to_string())),
            None => Ok(value),
        }
    }

    fn wait(&self, stage: &str) -> Result<()> {
        self.device()
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| self.fail(format!("device poll failed during {stage}: {e}")))
    }

    pub(super) fn buffer(&self, slot: Slot) -> &wgpu::Buffer {
        &self.buffers[slot.index]
    }

    fn track(&mut self, buffer: wgpu::Buffer, len: usize) -> Slot {
        self.buffers.push(buffer);
        Slot {
            index: self.buffers.len() - 1,
            len,
        }
    }

    /// Allocates an `f32` storage buffer holding exactly `len` elements.
    pub(super) fn allocate(&mut self, label: &str, len: usize) -> Result<Slot> {
        let size = (len.max(1) as u64) * ELEMENT_BYTES;
        let limits = self.context.limits();
        let max_binding = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if size > max_binding {
            return Err(self.fail(format!(
                "buffer '{label}' needs {size} bytes, device allows {max_binding}"
            )));
        }
        let buffer = self.guarded(wgpu::ErrorFilter::OutOfMemory, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        Ok(self.track(buffer, len))
    }

    /// Writes `tensor` into `slot`, widening every element to `f32`.
    pub(super) fn upload(&mut self, slot: Slot, tensor: &Tensor) -> Result<()> {
        if tensor.len() != slot.len {
            return Err(self.fail(format!(
                "upload of '{}' has {} elements, buffer holds {}",
                tensor.name(),
                tensor.len(),
                slot.len
            )));
        }
        let mut widened = vec![0.0f32; tensor.len()];
        tensor.data().convert_to_f32_slice(&mut widened);
        self.context
            .queue()
            .write_buffer(self.buffer(slot), 0, cast_slice(&widened));
        Ok(())
    }

    /// Allocates and uploads in one step.
    pub(super) fn input(&mut self, tensor: &Tensor) -> Result<Slot> {
        let slot = self.allocate(tensor.name(), tensor.len())?;
        self.upload(slot, tensor)?;
        Ok(slot)
    }

    pub(super) fn uniform<U: Pod>(&mut self, label: &str, data: &U) -> Result<Slot> {
        let buffer = self.guarded(wgpu::ErrorFilter::OutOfMemory, |device| {
            create_uniform_buffer(device, label, data)
        })?;
        Ok(self.track(buffer, 0))
    }

    /// Binds `slots` in order, records one compute pass, submits and blocks
    /// until the device is idle.
    pub(super) fn launch(
        &mut self,
        kernel: &ComputeKernel,
        slots: &[Slot],
        geometry: LaunchGeometry,
    ) -> Result<()> {
        if slots.len() != kernel.bindings as usize {
            return Err(self.fail(format!(
                "{} expects {} bindings, got {}",
                kernel.label,
                kernel.bindings,
                slots.len()
            )));
        }
        let max = self.context.limits().max_compute_workgroups_per_dimension;
        if geometry.workgroups.iter().any(|&groups| groups > max) {
            return Err(self.fail(format!(
                "launch {:?} exceeds {max} workgroups per dimension",
                geometry.workgroups
            )));
        }
        if geometry.workgroups.contains(&0) {
            return Ok(());
        }

        let entries: Vec<_> = slots
            .iter()
            .enumerate()
            .map(|(binding, &slot)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: self.buffer(slot).as_entire_binding(),
            })
            .collect();

        self.guarded(wgpu::ErrorFilter::Validation, |device| {
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(kernel.label),
                layout: &kernel.bind_group_layout,
                entries: &entries,
            });
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.label),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(kernel.label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                let [x, y, z] = geometry.workgroups;
                pass.dispatch_workgroups(x, y, z);
            }
            self.context.queue().submit(Some(encoder.finish()));
        })?;
        debug!(
            target: "gan::gpu",
            "{}: dispatched {:?} workgroups",
            kernel.label,
            geometry.workgroups
        );
        self.wait("launch")
    }

    /// Reads `slot` back through a staging buffer, narrowing into `tensor`.
    pub(super) fn download(&mut self, slot: Slot, tensor: &mut Tensor) -> Result<()> {
        if tensor.len() != slot.len {
            return Err(self.fail(format!(
                "download into '{}' has {} elements, buffer holds {}",
                tensor.name(),
                tensor.len(),
                slot.len
            )));
        }
        let size = (slot.len.max(1) as u64) * ELEMENT_BYTES;
        let staging = self.guarded(wgpu::ErrorFilter::OutOfMemory, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("gan_readback"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        })?;
        let staging = self.track(staging, slot.len);

        let mut encoder = self
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gan_readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(self.buffer(slot), 0, self.buffer(staging), 0, size);
        self.context.queue().submit(Some(encoder.finish()));

        let buffer = self.buffer(staging);
        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait("readback")?;
        receiver
            .recv()
            .map_err(|_| self.fail("readback callback dropped"))?
            .map_err(|e| self.fail(format!("failed to map readback buffer: {e}")))?;

        {
            let mapped = buffer_slice.get_mapped_range();
            let values: &[f32] = cast_slice(&mapped);
            tensor
                .data_mut()
                .convert_from_f32_slice(&values[..slot.len]);
        }
        buffer.unmap();
        Ok(())
    }
}

impl Drop for DeviceScope<'_> {
    fn drop(&mut self) {
        for buffer in self.buffers.drain(..) {
            buffer.destroy();
        }
        trace!(target: "gan::gpu", "{}: device scope released", self.op);
    }
}

/// Narrows an extent to the 32-bit index space shaders use.
pub(super) fn extent(op: &'static str, what: &str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        KernelError::geometry(op, format!("{what} = {value} exceeds the 32-bit index range"))
    })
}
