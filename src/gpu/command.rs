//! Backend-independent command recording

use super::backend::{BlasId, BlasTriangleGeometry, BufferId, DeviceAddress, ImageId, TlasId};

/// Memory access scopes used by barriers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    TransferWrite,
    TransferRead,
    ShaderRead,
    AccelerationStructureBuildWrite,
    AccelerationStructureBuildRead,
}

/// One recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CopyBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToImage {
        src: BufferId,
        src_offset: u64,
        dst: ImageId,
        mip_level: u32,
        extent: [u32; 2],
    },
    Barrier {
        src: Access,
        dst: Access,
    },
    BuildBlas {
        blas: BlasId,
        geometries: Vec<BlasTriangleGeometry>,
        scratch: DeviceAddress,
    },
    BuildTlas {
        tlas: TlasId,
        instances: DeviceAddress,
        instance_count: u32,
        scratch: DeviceAddress,
    },
    /// Release a buffer once this batch has executed
    DestroyBufferDeferred(BufferId),
}

/// Ordered list of commands, recorded on the CPU and submitted as one unit.
#[derive(Clone, Debug, Default)]
pub struct CommandBatch {
    name: String,
    commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), commands: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    // --- Recording ---

    pub fn copy_buffer(&mut self, src: BufferId, src_offset: u64, dst: BufferId, dst_offset: u64, size: u64) {
        self.commands.push(Command::CopyBuffer { src, src_offset, dst, dst_offset, size });
    }

    pub fn copy_buffer_to_image(&mut self, src: BufferId, src_offset: u64, dst: ImageId, mip_level: u32, extent: [u32; 2]) {
        self.commands.push(Command::CopyBufferToImage { src, src_offset, dst, mip_level, extent });
    }

    pub fn barrier(&mut self, src: Access, dst: Access) {
        self.commands.push(Command::Barrier { src, dst });
    }

    pub fn build_blas(&mut self, blas: BlasId, geometries: Vec<BlasTriangleGeometry>, scratch: DeviceAddress) {
        self.commands.push(Command::BuildBlas { blas, geometries, scratch });
    }

    pub fn build_tlas(&mut self, tlas: TlasId, instances: DeviceAddress, instance_count: u32, scratch: DeviceAddress) {
        self.commands.push(Command::BuildTlas { tlas, instances, instance_count, scratch });
    }

    pub fn destroy_buffer_deferred(&mut self, buffer: BufferId) {
        self.commands.push(Command::DestroyBufferDeferred(buffer));
    }

    // --- Inspection ---

    /// Number of buffer-to-buffer copies writing into `dst`.
    pub fn copies_into(&self, dst: BufferId) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::CopyBuffer { dst: d, .. } if *d == dst))
            .count()
    }

    pub fn barrier_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, Command::Barrier { .. })).count()
    }

    pub fn blas_build_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, Command::BuildBlas { .. })).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_order() {
        let mut batch = CommandBatch::new("test");
        assert!(batch.is_empty());

        batch.copy_buffer(BufferId(1), 0, BufferId(2), 64, 16);
        batch.barrier(Access::TransferWrite, Access::ShaderRead);
        batch.copy_buffer(BufferId(3), 0, BufferId(2), 0, 16);
        batch.destroy_buffer_deferred(BufferId(1));

        assert_eq!(batch.len(), 4);
        assert_eq!(batch.name(), "test");
        assert_eq!(batch.copies_into(BufferId(2)), 2);
        assert_eq!(batch.copies_into(BufferId(3)), 0);
        assert_eq!(batch.barrier_count(), 1);
        assert_eq!(batch.commands()[3], Command::DestroyBufferDeferred(BufferId(1)));
    }
}
