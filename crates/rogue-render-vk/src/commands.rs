// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;

#[inline]
pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or_else(|| anyhow!("no memory type matches bits {type_bits:#x} with {req:?}"))
}

pub(crate) unsafe fn create_buffer_and_memory(
    device: &ash::Device,
    props: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    flags: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buf = device.create_buffer(&bci, None).context("create_buffer")?;
    let req = device.get_buffer_memory_requirements(buf);
    let mem_type = find_memory_type(props, req.memory_type_bits, flags)
        .inspect_err(|_| device.destroy_buffer(buf, None))?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    let mem = device
        .allocate_memory(&mai, None)
        .context("allocate_memory(buffer)")
        .inspect_err(|_| device.destroy_buffer(buf, None))?;
    if let Err(e) = device.bind_buffer_memory(buf, mem, 0) {
        device.free_memory(mem, None);
        device.destroy_buffer(buf, None);
        return Err(anyhow!("bind_buffer_memory: {e:?}"));
    }
    Ok((buf, mem))
}

/// Copies `bytes` into host-visible, host-coherent memory at offset 0.
pub(crate) unsafe fn write_host_memory(
    device: &ash::Device,
    memory: vk::DeviceMemory,
    bytes: &[u8],
) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let ptr = device
        .map_memory(
            memory,
            0,
            bytes.len() as vk::DeviceSize,
            vk::MemoryMapFlags::empty(),
        )
        .context("map_memory")?;
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
    device.unmap_memory(memory);
    Ok(())
}

pub(crate) unsafe fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
    flags: vk::CommandPoolCreateFlags,
) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags,
        ..Default::default()
    };
    device
        .create_command_pool(&pool_info, None)
        .context("create_command_pool")
}

/// Records `record` into a fresh primary command buffer, submits it and blocks
/// until `queue` is idle. The buffer is freed whether or not submission worked.
pub(crate) unsafe fn one_shot<F>(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device
        .allocate_command_buffers(&ai)
        .context("allocate_command_buffers(one-shot)")?[0];

    let result = (|| -> Result<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &bi)?;
        record(cmd);
        device.end_command_buffer(cmd)?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device
            .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
            .context("queue_submit(one-shot)")?;
        device
            .queue_wait_idle(queue)
            .context("queue_wait_idle(one-shot)")?;
        Ok(())
    })();

    device.free_command_buffers(pool, std::slice::from_ref(&cmd));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            p.memory_types[i].property_flags = *f;
        }
        p
    }

    #[test]
    fn picks_first_type_allowed_by_mask_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(
            find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
        assert_eq!(find_memory_type(&p, 0b111, host).unwrap(), 1);
        // type 1 masked out by the resource's requirements
        assert_eq!(find_memory_type(&p, 0b101, host).unwrap(), 2);
    }

    #[test]
    fn no_match_is_an_error() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&p, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
        assert!(find_memory_type(&p, 0b0, vk::MemoryPropertyFlags::DEVICE_LOCAL).is_err());
    }
}
