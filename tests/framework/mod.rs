#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Result};

use vk_render_graph::prelude::*;

/// Everything the graph asked the backend to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Begin(PhysicalQueue),
    Submit {
        queue: PhysicalQueue,
        waits: Vec<u64>,
        signals: Vec<u64>,
    },
    PipelineBarrier {
        src: PipelineStage,
        dst: PipelineStage,
        /// (image, old layout, new layout)
        images: Vec<(u64, vk::ImageLayout, vk::ImageLayout)>,
        aspects: Vec<(u64, vk::ImageAspectFlags)>,
        buffers: Vec<u64>,
    },
    SetEvent(u64),
    WaitEvents {
        events: Vec<u64>,
        images: Vec<(u64, vk::ImageLayout, vk::ImageLayout)>,
    },
    BeginRenderPass {
        name: String,
        images: Vec<u64>,
        load_ops: Vec<vk::AttachmentLoadOp>,
        store_ops: Vec<vk::AttachmentStoreOp>,
        final_layouts: Vec<vk::ImageLayout>,
        clears: Vec<Option<AttachmentClear>>,
        subpasses: usize,
        base_layer: u32,
        layer_count: u32,
    },
    NextSubpass,
    EndRenderPass,
    DrawScaledInput {
        input: u64,
        color_attachment: u32,
    },
    Blit {
        src: u64,
        dst: u64,
    },
    CopyBuffer,
    GenerateMipmaps(u64),
    BeginLabel(String),
    EndLabel,
    /// Recorded by a pass callback.
    User(String),
}

#[derive(Debug, Default)]
pub struct Log {
    pub commands: Vec<Command>,
    pub images_created: Vec<ImageCreateInfo>,
    pub buffers_created: Vec<BufferCreateInfo>,
    pub events_created: usize,
    pub semaphores_created: usize,
    pub events_reset: usize,
    next_id: u64,
    /// Fail the next submission.
    pub fail_submit: bool,
}

impl Log {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Clone)]
pub struct MockImage {
    pub id: u64,
    info: Rc<ImageCreateInfo>,
}

impl PartialEq for MockImage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl GpuImage for MockImage {
    fn create_info(&self) -> &ImageCreateInfo {
        &self.info
    }

    fn set_debug_name(&self, _: &str) {}
}

#[derive(Debug, Clone)]
pub struct MockBuffer {
    pub id: u64,
    info: Rc<BufferCreateInfo>,
}

impl PartialEq for MockBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl GpuBuffer for MockBuffer {
    fn create_info(&self) -> &BufferCreateInfo {
        &self.info
    }

    fn set_debug_name(&self, _: &str) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockEvent(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct MockSemaphore(pub u64);

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub log: Rc<RefCell<Log>>,
}

pub struct MockCommandBuffer {
    pub queue: PhysicalQueue,
    log: Rc<RefCell<Log>>,
}

impl MockCommandBuffer {
    /// Record a marker from a pass callback.
    pub fn record(&mut self, what: &str) {
        self.push(Command::User(what.to_owned()));
    }

    fn push(&mut self, command: Command) {
        self.log.borrow_mut().commands.push(command);
    }
}

fn image_barriers(batch: &BarrierBatch<Mock>) -> Vec<(u64, vk::ImageLayout, vk::ImageLayout)> {
    batch
        .images
        .iter()
        .map(|barrier| (barrier.image.id, barrier.old_layout, barrier.new_layout))
        .collect()
}

impl GraphCommandBuffer<Mock> for MockCommandBuffer {
    fn pipeline_barrier(&mut self, batch: &BarrierBatch<Mock>) {
        self.push(Command::PipelineBarrier {
            src: batch.src_stages,
            dst: batch.dst_stages,
            images: image_barriers(batch),
            aspects: batch.images.iter().map(|barrier| (barrier.image.id, barrier.aspect)).collect(),
            buffers: batch.buffers.iter().map(|barrier| barrier.buffer.id).collect(),
        });
    }

    fn set_event(&mut self, event: &MockEvent, _: PipelineStage) {
        self.push(Command::SetEvent(event.0));
    }

    fn wait_events(&mut self, events: &[&MockEvent], batch: &BarrierBatch<Mock>) {
        self.push(Command::WaitEvents {
            events: events.iter().map(|event| event.0).collect(),
            images: image_barriers(batch),
        });
    }

    fn begin_render_pass(&mut self, info: &RenderPassInfo<Mock>) -> Result<()> {
        let attachments: Vec<&RenderPassAttachment<Mock>> =
            info.color_attachments.iter().chain(info.depth_stencil_attachment.iter()).collect();
        self.push(Command::BeginRenderPass {
            name: info.name.clone(),
            images: attachments.iter().map(|attachment| attachment.image.id).collect(),
            load_ops: attachments.iter().map(|attachment| attachment.load_op).collect(),
            store_ops: attachments.iter().map(|attachment| attachment.store_op).collect(),
            final_layouts: attachments.iter().map(|attachment| attachment.final_layout).collect(),
            clears: attachments.iter().map(|attachment| attachment.clear).collect(),
            subpasses: info.subpasses.len(),
            base_layer: info.base_layer,
            layer_count: info.layer_count,
        });
        Ok(())
    }

    fn next_subpass(&mut self) {
        self.push(Command::NextSubpass);
    }

    fn end_render_pass(&mut self) {
        self.push(Command::EndRenderPass);
    }

    fn draw_scaled_input(&mut self, clear: &ScaledClear<Mock>) -> Result<()> {
        self.push(Command::DrawScaledInput {
            input: clear.input.id,
            color_attachment: clear.color_attachment,
        });
        Ok(())
    }

    fn blit_image(&mut self, src: &MockImage, dst: &MockImage, _: vk::ImageLayout, _: vk::ImageLayout) -> Result<()> {
        self.push(Command::Blit {
            src: src.id,
            dst: dst.id,
        });
        Ok(())
    }

    fn copy_buffer(&mut self, _: &MockBuffer, _: &MockBuffer, _: vk::DeviceSize) -> Result<()> {
        self.push(Command::CopyBuffer);
        Ok(())
    }

    fn generate_mipmaps(&mut self, image: &MockImage, _: vk::ImageLayout, _: PipelineStage, _: vk::AccessFlags2) -> Result<()> {
        self.push(Command::GenerateMipmaps(image.id));
        Ok(())
    }

    fn begin_label(&mut self, name: &str, _: [f32; 4]) {
        self.push(Command::BeginLabel(name.to_owned()));
    }

    fn end_label(&mut self) {
        self.push(Command::EndLabel);
    }
}

impl ResourceFactory<Mock> for MockDevice {
    fn create_image(&self, info: &ImageCreateInfo) -> Result<MockImage> {
        let mut log = self.log.borrow_mut();
        log.images_created.push(info.clone());
        Ok(MockImage {
            id: log.id(),
            info: Rc::new(info.clone()),
        })
    }

    fn create_buffer(&self, info: &BufferCreateInfo) -> Result<MockBuffer> {
        let mut log = self.log.borrow_mut();
        log.buffers_created.push(info.clone());
        Ok(MockBuffer {
            id: log.id(),
            info: Rc::new(info.clone()),
        })
    }
}

impl CommandInterface<Mock> for MockDevice {
    fn begin_command_buffer(&self, queue: PhysicalQueue) -> Result<MockCommandBuffer> {
        self.log.borrow_mut().commands.push(Command::Begin(queue));
        Ok(MockCommandBuffer {
            queue,
            log: self.log.clone(),
        })
    }

    fn submit(
        &self,
        queue: PhysicalQueue,
        cmd: MockCommandBuffer,
        waits: &[SemaphoreWait<Mock>],
        signals: &[MockSemaphore],
    ) -> Result<()> {
        assert_eq!(cmd.queue, queue, "command buffer submitted to the wrong queue");
        let mut log = self.log.borrow_mut();
        if std::mem::take(&mut log.fail_submit) {
            bail!("device lost");
        }
        log.commands.push(Command::Submit {
            queue,
            waits: waits.iter().map(|wait| wait.semaphore.0).collect(),
            signals: signals.iter().map(|semaphore| semaphore.0).collect(),
        });
        Ok(())
    }
}

impl SyncService<Mock> for MockDevice {
    fn create_event(&self) -> Result<MockEvent> {
        let mut log = self.log.borrow_mut();
        log.events_created += 1;
        Ok(MockEvent(log.id()))
    }

    fn create_semaphore(&self) -> Result<MockSemaphore> {
        let mut log = self.log.borrow_mut();
        log.semaphores_created += 1;
        Ok(MockSemaphore(log.id()))
    }

    fn reset_event(&self, _: &MockEvent) -> Result<()> {
        self.log.borrow_mut().events_reset += 1;
        Ok(())
    }
}

/// Backend that records every request instead of talking to a GPU.
#[derive(Debug)]
pub struct Mock;

impl Backend for Mock {
    type Device = MockDevice;
    type Image = MockImage;
    type Buffer = MockBuffer;
    type Event = MockEvent;
    type Semaphore = MockSemaphore;
    type CommandBuffer = MockCommandBuffer;
}

/// Creates a render graph on a recording device, with a 1280x720 backbuffer.
pub fn make_graph() -> (RenderGraph<Mock>, Rc<RefCell<Log>>) {
    let _ = pretty_env_logger::try_init();
    let log = Rc::new(RefCell::new(Log::default()));
    let graph = RenderGraph::new(MockDevice {
        log: log.clone(),
    });
    (graph, log)
}

/// Creates an image that stands in for an acquired swapchain image.
pub fn make_swapchain_image(log: &Rc<RefCell<Log>>) -> MockImage {
    let info = ImageCreateInfo {
        format: vk::Format::B8G8R8A8_SRGB,
        extent: vk::Extent3D {
            width: 1280,
            height: 720,
            depth: 1,
        },
        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
        ..Default::default()
    };
    MockImage {
        id: log.borrow_mut().id(),
        info: Rc::new(info),
    }
}

/// Take all commands recorded so far.
pub fn take_commands(log: &Rc<RefCell<Log>>) -> Vec<Command> {
    std::mem::take(&mut log.borrow_mut().commands)
}

pub fn submits(commands: &[Command]) -> Vec<(PhysicalQueue, usize, usize)> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Submit {
                queue,
                waits,
                signals,
            } => Some((*queue, waits.len(), signals.len())),
            _ => None,
        })
        .collect()
}

/// Color output info that makes a pass clear its target.
pub fn clear_black() -> Option<ClearColor> {
    Some(ClearColor::Float([0.0, 0.0, 0.0, 1.0]))
}

/// Walk the submissions in order and return the semaphores that are signaled but not waited on yet. Panics if a
/// semaphore is waited on before it is signaled, or signaled again while a signal is still pending.
pub fn outstanding_semaphores(commands: &[Command]) -> Vec<u64> {
    let mut outstanding = Vec::new();
    for command in commands {
        if let Command::Submit {
            waits,
            signals,
            ..
        } = command
        {
            for wait in waits {
                let position = outstanding
                    .iter()
                    .position(|semaphore| semaphore == wait)
                    .unwrap_or_else(|| panic!("semaphore {wait} waited on without a pending signal"));
                outstanding.remove(position);
            }
            for signal in signals {
                assert!(!outstanding.contains(signal), "semaphore {signal} signaled twice without a wait");
                outstanding.push(*signal);
            }
        }
    }
    outstanding
}
