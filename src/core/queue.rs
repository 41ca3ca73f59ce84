//! Queue kinds that passes are scheduled on, and the physical queues they map to.

use bitflags::bitflags;

/// Logical queue a render pass is declared on. Note that in raw Vulkan, there is no 'Compute queue' that differs
/// from the graphics queue. The graph exposes one anyway, but [`RenderGraphQueue::Compute`] passes are recorded on the
/// same physical queue as [`RenderGraphQueue::Graphics`] passes.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Hash)]
pub enum RenderGraphQueue {
    /// Render passes on the main graphics queue.
    #[default]
    Graphics,
    /// Compute work interleaved on the main graphics queue.
    Compute,
    /// Graphics work on a separate queue, running concurrently with the main queue.
    AsyncGraphics,
    /// Compute work on a dedicated async compute queue.
    AsyncCompute,
}

bitflags! {
    /// Set of logical queues that touch a resource.
    #[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Hash)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const ASYNC_GRAPHICS = 1 << 2;
        const ASYNC_COMPUTE = 1 << 3;
        /// Queues that cannot record render passes.
        const COMPUTE_QUEUES = Self::COMPUTE.bits() | Self::ASYNC_COMPUTE.bits();
    }
}

/// Hardware queue that command buffers are submitted to.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum PhysicalQueue {
    /// Main graphics queue. Runs [`RenderGraphQueue::Graphics`] and [`RenderGraphQueue::Compute`] passes.
    #[default]
    Graphics,
    /// Secondary graphics queue.
    AsyncGraphics,
    /// Dedicated compute queue.
    AsyncCompute,
}

impl RenderGraphQueue {
    /// The bit this queue occupies in a [`QueueFlags`] set.
    pub fn flag(self) -> QueueFlags {
        match self {
            RenderGraphQueue::Graphics => QueueFlags::GRAPHICS,
            RenderGraphQueue::Compute => QueueFlags::COMPUTE,
            RenderGraphQueue::AsyncGraphics => QueueFlags::ASYNC_GRAPHICS,
            RenderGraphQueue::AsyncCompute => QueueFlags::ASYNC_COMPUTE,
        }
    }

    /// Whether passes on this queue run compute work only.
    pub fn is_compute(self) -> bool {
        QueueFlags::COMPUTE_QUEUES.contains(self.flag())
    }

    /// The hardware queue passes on this queue are submitted to.
    pub fn physical_queue(self) -> PhysicalQueue {
        match self {
            RenderGraphQueue::Graphics | RenderGraphQueue::Compute => PhysicalQueue::Graphics,
            RenderGraphQueue::AsyncGraphics => PhysicalQueue::AsyncGraphics,
            RenderGraphQueue::AsyncCompute => PhysicalQueue::AsyncCompute,
        }
    }
}

impl QueueFlags {
    /// All hardware queues that at least one queue in this set is submitted to, in a stable order.
    pub fn physical_queues(self) -> Vec<PhysicalQueue> {
        let mut queues = Vec::with_capacity(3);
        if self.intersects(QueueFlags::GRAPHICS | QueueFlags::COMPUTE) {
            queues.push(PhysicalQueue::Graphics);
        }
        if self.contains(QueueFlags::ASYNC_GRAPHICS) {
            queues.push(PhysicalQueue::AsyncGraphics);
        }
        if self.contains(QueueFlags::ASYNC_COMPUTE) {
            queues.push(PhysicalQueue::AsyncCompute);
        }
        queues
    }

    /// True if exactly one logical queue is in this set.
    pub fn is_single_queue(self) -> bool {
        self.bits().count_ones() == 1
    }
}
