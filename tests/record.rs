use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use vk_render_graph::prelude::*;

mod framework;

use framework::{
    clear_black, make_graph, make_swapchain_image, outstanding_semaphores, submits, take_commands, Command, Mock, MockDevice,
};

fn user_commands(commands: &[Command]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::User(what) => Some(what.clone()),
            _ => None,
        })
        .collect()
}

fn position(commands: &[Command], predicate: impl Fn(&Command) -> bool) -> usize {
    commands.iter().position(predicate).expect("command was recorded")
}

fn hdr() -> AttachmentInfo {
    AttachmentInfo::default()
        .format(vk::Format::R16G16B16A16_SFLOAT)
        .persistent(false)
}

fn declare_linear_chain(graph: &mut RenderGraph<Mock>) {
    graph
        .add_pass("a", RenderGraphQueue::Graphics)
        .add_color_output("a", AttachmentInfo::default(), None)
        .set_get_clear_color(|_| clear_black())
        .set_build_render_pass(|cmd, _| {
            cmd.record("a");
            Ok(())
        });
    graph
        .add_pass("b", RenderGraphQueue::Graphics)
        .add_color_output("b", AttachmentInfo::default(), Some("a"))
        .set_build_render_pass(|cmd, _| {
            cmd.record("b");
            Ok(())
        });
    graph
        .add_pass("c", RenderGraphQueue::Graphics)
        .add_color_output("c", AttachmentInfo::default(), Some("b"))
        .set_build_render_pass(|cmd, _| {
            cmd.record("c");
            Ok(())
        });
    graph.set_backbuffer_source("c");
}

#[test]
fn linear_chain_renders_into_swapchain() -> Result<()> {
    let (mut graph, log) = make_graph();
    declare_linear_chain(&mut graph);
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    assert!(log.borrow().images_created.is_empty(), "the swapchain image is used directly");
    let commands = take_commands(&log);
    assert_eq!(user_commands(&commands), vec!["a", "b", "c"]);
    assert_eq!(submits(&commands), vec![(PhysicalQueue::Graphics, 0, 0)]);
    assert_eq!(commands.iter().filter(|command| **command == Command::NextSubpass).count(), 2);
    assert!(!commands.iter().any(|command| matches!(command, Command::WaitEvents { .. })));

    // The only barrier is the one discarding whatever the swapchain image held before.
    let barriers: Vec<&Command> = commands
        .iter()
        .filter(|command| matches!(command, Command::PipelineBarrier { .. }))
        .collect();
    assert_eq!(barriers.len(), 1);
    match barriers[0] {
        Command::PipelineBarrier {
            src,
            images,
            ..
        } => {
            assert_eq!(*src, PipelineStage::TOP_OF_PIPE);
            assert_eq!(
                images,
                &vec![(swapchain.id, vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)]
            );
        }
        _ => unreachable!(),
    }

    let begin = commands
        .iter()
        .find_map(|command| match command {
            Command::BeginRenderPass {
                images,
                load_ops,
                store_ops,
                final_layouts,
                clears,
                subpasses,
                ..
            } => Some((images, load_ops, store_ops, final_layouts, clears, subpasses)),
            _ => None,
        })
        .unwrap();
    assert_eq!(begin.0, &vec![swapchain.id]);
    assert_eq!(begin.1, &vec![vk::AttachmentLoadOp::CLEAR]);
    assert_eq!(begin.2, &vec![vk::AttachmentStoreOp::STORE]);
    assert_eq!(begin.3, &vec![vk::ImageLayout::PRESENT_SRC_KHR]);
    assert_eq!(begin.4, &vec![Some(AttachmentClear::Color(ClearColor::Float([0.0, 0.0, 0.0, 1.0])))]);
    assert_eq!(*begin.5, 3);
    Ok(())
}

#[test]
fn frames_are_recorded_identically() -> Result<()> {
    let (mut graph, log) = make_graph();
    declare_linear_chain(&mut graph);
    graph.bake()?;
    let swapchain = make_swapchain_image(&log);

    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;
    let first = take_commands(&log);

    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;
    let second = take_commands(&log);
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn headless_backbuffer_gets_its_own_image() -> Result<()> {
    let (mut graph, log) = make_graph();
    declare_linear_chain(&mut graph);
    graph.bake()?;

    graph.setup_attachments(None)?;
    graph.enqueue_render_passes()?;

    let created = log.borrow().images_created.clone();
    assert_eq!(created.len(), 1);
    assert!(!created[0].transient);
    assert_eq!(created[0].format, vk::Format::B8G8R8A8_SRGB);

    let commands = take_commands(&log);
    assert!(!commands.iter().any(|command| matches!(command, Command::Blit { .. })));
    let final_layouts = commands
        .iter()
        .find_map(|command| match command {
            Command::BeginRenderPass {
                final_layouts, ..
            } => Some(final_layouts.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(final_layouts, vec![vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL]);
    Ok(())
}

#[test]
fn enqueue_requires_bake_and_setup() -> Result<()> {
    let (mut graph, _) = make_graph();
    let err = graph.enqueue_render_passes().unwrap_err().downcast::<Error>()?;
    assert_eq!(err, Error::NotBaked);
    let err = graph.setup_attachments(None).unwrap_err().downcast::<Error>()?;
    assert_eq!(err, Error::NotBaked);

    declare_linear_chain(&mut graph);
    graph.bake()?;
    let err = graph.enqueue_render_passes().unwrap_err().downcast::<Error>()?;
    assert_eq!(err, Error::NotSetUp);

    graph.setup_attachments(None)?;
    graph.enqueue_render_passes()?;

    // Baking again invalidates the bound attachments.
    graph.bake()?;
    let err = graph.enqueue_render_passes().unwrap_err().downcast::<Error>()?;
    assert_eq!(err, Error::NotSetUp);
    Ok(())
}

#[test]
fn async_compute_is_synchronized_with_semaphores() -> Result<()> {
    let (mut graph, log) = make_graph();
    let info = BufferInfo::new(4096);
    graph
        .add_pass("g0", RenderGraphQueue::Graphics)
        .add_storage_output("s", info.clone(), None)
        .set_build_render_pass(|cmd, _| {
            cmd.record("g0");
            Ok(())
        });
    graph
        .add_pass("c0", RenderGraphQueue::AsyncCompute)
        .add_storage_output("s'", info, Some("s"))
        .set_build_render_pass(|cmd, _| {
            cmd.record("c0");
            Ok(())
        });
    graph
        .add_pass("g1", RenderGraphQueue::Graphics)
        .add_storage_read_only_input("s'", None)
        .add_color_output("output", AttachmentInfo::default(), None)
        .set_build_render_pass(|cmd, _| {
            cmd.record("g1");
            Ok(())
        });
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    let created = log.borrow().buffers_created.clone();
    assert_eq!(created.len(), 1, "s and s' share one buffer");
    assert!(created[0].queues.contains(QueueFlags::GRAPHICS | QueueFlags::ASYNC_COMPUTE));

    let commands = take_commands(&log);
    assert_eq!(user_commands(&commands), vec!["g0", "c0", "g1"]);
    assert_eq!(
        submits(&commands),
        vec![
            (PhysicalQueue::Graphics, 0, 1),
            (PhysicalQueue::AsyncCompute, 1, 1),
            (PhysicalQueue::Graphics, 1, 1),
        ]
    );

    // The read in g1 is waited on by the next frame's async compute submission.
    let mut all = commands.clone();
    assert_eq!(outstanding_semaphores(&all).len(), 1);

    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;
    let commands = take_commands(&log);
    assert_eq!(
        submits(&commands),
        vec![
            (PhysicalQueue::Graphics, 0, 1),
            (PhysicalQueue::AsyncCompute, 2, 1),
            (PhysicalQueue::Graphics, 1, 1),
        ]
    );
    all.extend(commands);
    assert_eq!(outstanding_semaphores(&all).len(), 1);
    Ok(())
}

#[test]
fn consecutive_writes_signal_one_semaphore() -> Result<()> {
    let (mut graph, log) = make_graph();
    let info = BufferInfo::new(1024);
    graph
        .add_pass("g0", RenderGraphQueue::Graphics)
        .add_storage_output("s", info.clone(), None);
    graph
        .add_pass("g1", RenderGraphQueue::Graphics)
        .add_storage_output("s1", info.clone(), Some("s"));
    graph
        .add_pass("c0", RenderGraphQueue::AsyncCompute)
        .add_storage_output("s2", info, Some("s1"));
    graph
        .add_pass("g2", RenderGraphQueue::Graphics)
        .add_storage_read_only_input("s2", None)
        .add_color_output("output", AttachmentInfo::default(), None);
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    let mut all = Vec::new();
    let mut created = Vec::new();
    for _ in 0..6 {
        graph.setup_attachments(Some(&swapchain))?;
        graph.enqueue_render_passes()?;
        all.extend(take_commands(&log));
        created.push(log.borrow().semaphores_created);
    }

    // Both graphics writes are covered by the one signal async compute waits on.
    let first_frame: Vec<_> = submits(&all).into_iter().take(3).collect();
    assert_eq!(
        first_frame,
        vec![
            (PhysicalQueue::Graphics, 0, 1),
            (PhysicalQueue::AsyncCompute, 1, 1),
            (PhysicalQueue::Graphics, 1, 1),
        ]
    );
    assert_eq!(outstanding_semaphores(&all).len(), 1, "only the last frame's signal is still pending");

    // Waited semaphores are signaled again instead of creating new ones.
    assert_eq!(created[2], created[5], "semaphores created per frame: {created:?}");
    Ok(())
}

#[test]
fn passes_on_one_queue_are_synchronized_with_events() -> Result<()> {
    let (mut graph, log) = make_graph();
    graph
        .add_pass("scene", RenderGraphQueue::Graphics)
        .add_color_output("scene", hdr(), None);
    graph
        .add_pass("post", RenderGraphQueue::Graphics)
        .add_texture_input("scene", None)
        .add_color_output("output", AttachmentInfo::default(), None);
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    let commands = take_commands(&log);
    let scene = graph.physical_resources().image("scene")?.id;
    let set = position(&commands, |command| matches!(command, Command::SetEvent(_)));
    let events_set = commands.iter().filter(|command| matches!(command, Command::SetEvent(_))).count();
    let wait = position(&commands, |command| matches!(command, Command::WaitEvents { .. }));
    assert!(set < wait);

    // The first use transitions from UNDEFINED, the wait transitions for sampling.
    let first_barrier = commands
        .iter()
        .find_map(|command| match command {
            Command::PipelineBarrier {
                src,
                images,
                ..
            } => Some((*src, images.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_barrier.0, PipelineStage::TOP_OF_PIPE);
    assert_eq!(
        first_barrier.1,
        vec![(scene, vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)]
    );
    match &commands[wait] {
        Command::WaitEvents {
            events,
            images,
        } => {
            assert_eq!(events.len(), 1);
            assert_eq!(
                images,
                &vec![(
                    scene,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                )]
            );
        }
        _ => unreachable!(),
    }

    // Events set in the previous frame are reset before they are set again.
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;
    assert_eq!(log.borrow().events_reset, events_set);
    Ok(())
}

#[test]
fn mipmaps_are_generated_after_the_render_pass() -> Result<()> {
    let (mut graph, log) = make_graph();
    graph
        .add_pass("bloom", RenderGraphQueue::Graphics)
        .add_color_output("bloom", hdr().levels(0), None);
    graph
        .add_pass("compose", RenderGraphQueue::Graphics)
        .add_texture_input("bloom", None)
        .add_color_output("output", AttachmentInfo::default(), None);
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    let bloom = graph.physical_resources().image("bloom")?.clone();
    assert_eq!(bloom.create_info().levels, 11);

    let commands = take_commands(&log);
    let end = position(&commands, |command| *command == Command::EndRenderPass);
    let mips = position(&commands, |command| *command == Command::GenerateMipmaps(bloom.id));
    let next = commands
        .iter()
        .rposition(|command| matches!(command, Command::BeginRenderPass { .. }))
        .unwrap();
    assert!(end < mips && mips < next);

    // The consumer picks the image up in the layout mip generation left it in.
    let wait = commands
        .iter()
        .find_map(|command| match command {
            Command::WaitEvents {
                images, ..
            } => Some(images.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        wait,
        vec![(
            bloom.id,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        )]
    );
    Ok(())
}

#[test]
fn aliased_resources_share_one_image() -> Result<()> {
    let (mut graph, log) = make_graph();
    graph
        .add_pass("p1", RenderGraphQueue::Graphics)
        .add_color_output("x", hdr(), None);
    graph
        .add_pass("p2", RenderGraphQueue::Graphics)
        .add_texture_input("x", None)
        .add_color_output("a", hdr().format(vk::Format::R32_SFLOAT), None);
    graph
        .add_pass("p3", RenderGraphQueue::Graphics)
        .add_texture_input("a", None)
        .add_color_output("y", hdr(), None);
    graph
        .add_pass("p4", RenderGraphQueue::Graphics)
        .add_texture_input("y", None)
        .add_color_output("output", AttachmentInfo::default(), None);
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    assert_eq!(log.borrow().images_created.len(), 2, "x and y share an image, a has its own");
    let resources = graph.physical_resources();
    assert_eq!(resources.image("x")?, resources.image("y")?);
    assert_ne!(resources.image("x")?, resources.image("a")?);

    // The image written as `y` starts over: its old contents as `x` are discarded.
    let y = resources.image("y")?.id;
    let commands = take_commands(&log);
    let transitions: Vec<(vk::ImageLayout, vk::ImageLayout)> = commands
        .iter()
        .filter_map(|command| match command {
            Command::PipelineBarrier {
                images, ..
            }
            | Command::WaitEvents {
                images, ..
            } => Some(images.clone()),
            _ => None,
        })
        .flatten()
        .filter(|(image, _, _)| *image == y)
        .map(|(_, old, new)| (old, new))
        .collect();
    let write = (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let read = (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(transitions, vec![write, read, write, read]);
    Ok(())
}

#[test]
fn history_images_swap_every_frame() -> Result<()> {
    let (mut graph, log) = make_graph();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let record = seen.clone();
    graph
        .add_pass("taa", RenderGraphQueue::Graphics)
        .add_history_input("color")
        .add_color_output("color", hdr(), None)
        .set_build_render_pass(move |_, resources| {
            let current = resources.image("color")?.id;
            let history = resources.history_image("color")?.id;
            record.borrow_mut().push((current, history));
            Ok(())
        });
    graph.set_backbuffer_source("color");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    for _ in 0..2 {
        graph.setup_attachments(Some(&swapchain))?;
        graph.enqueue_render_passes()?;
    }

    assert_eq!(log.borrow().images_created.len(), 2);
    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    let (first, first_history) = seen[0];
    assert_ne!(first, first_history);
    assert_eq!(seen[1], (first_history, first), "last frame's image is read as history");

    // The backbuffer cannot live in the swapchain, so it is blitted there.
    let commands = take_commands(&log);
    let blits: Vec<&Command> = commands.iter().filter(|command| matches!(command, Command::Blit { .. })).collect();
    assert_eq!(
        blits,
        vec![
            &Command::Blit {
                src: first,
                dst: swapchain.id,
            },
            &Command::Blit {
                src: first_history,
                dst: swapchain.id,
            },
        ]
    );
    Ok(())
}

#[test]
fn skipped_passes_are_not_recorded() -> Result<()> {
    let (mut graph, log) = make_graph();
    graph
        .add_pass("optional", RenderGraphQueue::Graphics)
        .add_color_output("overlay", hdr(), None)
        .set_need_render_pass(|| false)
        .set_build_render_pass(|cmd, _| {
            cmd.record("optional");
            Ok(())
        });
    graph
        .add_pass("compose", RenderGraphQueue::Graphics)
        .add_texture_input("overlay", None)
        .add_color_output("output", AttachmentInfo::default(), None)
        .set_build_render_pass(|cmd, _| {
            cmd.record("compose");
            Ok(())
        });
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    let commands = take_commands(&log);
    assert_eq!(user_commands(&commands), vec!["compose"]);
    assert_eq!(
        commands
            .iter()
            .filter(|command| matches!(command, Command::BeginRenderPass { .. }))
            .count(),
        1
    );
    Ok(())
}

#[test]
fn layered_passes_render_each_layer() -> Result<()> {
    let (mut graph, log) = make_graph();
    let layers = Rc::new(RefCell::new(Vec::new()));
    let record = layers.clone();
    graph
        .add_pass("shadows", RenderGraphQueue::Graphics)
        .add_color_output("cascades", hdr().layers(2), None)
        .set_build_render_pass_layered(move |layer, _, _| {
            record.borrow_mut().push(layer);
            Ok(())
        });
    graph
        .add_pass("lighting", RenderGraphQueue::Graphics)
        .add_texture_input("cascades", None)
        .add_color_output("output", AttachmentInfo::default(), None);
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    assert_eq!(*layers.borrow(), vec![0, 1]);
    let instances: Vec<(u32, u32)> = take_commands(&log)
        .iter()
        .filter_map(|command| match command {
            Command::BeginRenderPass {
                name,
                base_layer,
                layer_count,
                ..
            } if name == "shadows" => Some((*base_layer, *layer_count)),
            _ => None,
        })
        .collect();
    assert_eq!(instances, vec![(0, 1), (1, 1)]);
    Ok(())
}

#[test]
fn scaled_inputs_are_drawn_before_the_pass() -> Result<()> {
    let (mut graph, log) = make_graph();
    graph
        .add_pass("low", RenderGraphQueue::Graphics)
        .add_color_output("low", hdr().size(0.5, 0.5), None);
    graph
        .add_pass("upscale", RenderGraphQueue::Graphics)
        .add_color_output("full", hdr(), Some("low"))
        .set_build_render_pass(|cmd, _| {
            cmd.record("upscale");
            Ok(())
        });
    graph
        .add_pass("present", RenderGraphQueue::Graphics)
        .add_texture_input("full", None)
        .add_color_output("output", AttachmentInfo::default(), None);
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    let low = graph.physical_resources().image("low")?.id;
    let commands = take_commands(&log);
    let draw = position(&commands, |command| {
        *command
            == Command::DrawScaledInput {
                input: low,
                color_attachment: 0,
            }
    });
    let user = position(&commands, |command| *command == Command::User("upscale".into()));
    assert!(draw < user);
    Ok(())
}

#[test]
fn persistent_buffers_survive_a_rebuild() -> Result<()> {
    let (mut graph, log) = make_graph();
    let declare = |graph: &mut RenderGraph<Mock>| {
        graph
            .add_pass("simulate", RenderGraphQueue::Compute)
            .add_storage_output("particles", BufferInfo::new(1 << 16), None);
        graph
            .add_pass("draw", RenderGraphQueue::Graphics)
            .add_vertex_buffer_input("particles")
            .add_color_output("output", AttachmentInfo::default(), None);
        graph.set_backbuffer_source("output");
    };
    declare(&mut graph);
    graph.bake()?;
    graph.setup_attachments(None)?;
    let particles = graph.physical_resources().buffer("particles")?.clone();
    assert!(particles.create_info().zero_initialize);

    let buffers = graph.consume_physical_buffers();
    graph.reset();
    declare(&mut graph);
    graph.bake()?;
    graph.install_physical_buffers(buffers);
    graph.setup_attachments(None)?;

    assert_eq!(log.borrow().buffers_created.len(), 1);
    assert_eq!(graph.physical_resources().buffer("particles")?, &particles);

    let index = graph.physical_resources().physical_index("particles").unwrap();
    assert_eq!(graph.consume_persistent_physical_buffer_resource(index), Some(particles));
    Ok(())
}

#[test]
fn installed_buffer_replaces_the_bound_one() -> Result<()> {
    let (mut graph, log) = make_graph();
    graph
        .add_pass("simulate", RenderGraphQueue::Compute)
        .add_storage_output("particles", BufferInfo::new(256), None);
    graph
        .add_pass("draw", RenderGraphQueue::Graphics)
        .add_vertex_buffer_input("particles")
        .add_color_output("output", AttachmentInfo::default(), None);
    graph.set_backbuffer_source("output");
    graph.bake()?;
    graph.setup_attachments(None)?;

    let index = graph.physical_resources().physical_index("particles").unwrap();
    let old = graph.consume_persistent_physical_buffer_resource(index).unwrap();
    let device = MockDevice {
        log: log.clone(),
    };
    let replacement = device.create_buffer(old.create_info())?;
    assert_ne!(old, replacement);

    graph.install_persistent_physical_buffer_resource(index, replacement.clone());
    assert_eq!(graph.physical_resources().buffer("particles")?, &replacement);
    graph.enqueue_render_passes()?;

    // A buffer that still fits is kept by the next setup.
    graph.setup_attachments(None)?;
    assert_eq!(graph.physical_resources().buffer("particles")?, &replacement);
    assert_eq!(log.borrow().buffers_created.len(), 2);
    Ok(())
}

#[test]
fn execution_errors_are_returned() -> Result<()> {
    let (mut graph, log) = make_graph();
    declare_linear_chain(&mut graph);
    graph.bake()?;
    graph.setup_attachments(None)?;

    log.borrow_mut().fail_submit = true;
    let err = graph.enqueue_render_passes().unwrap_err();
    assert!(err.to_string().contains("device lost"), "got {err}");

    // The next frame records normally.
    graph.setup_attachments(None)?;
    graph.enqueue_render_passes()?;
    Ok(())
}

#[test]
fn callbacks_record_through_the_graph_command_buffer() -> Result<()> {
    let (mut graph, log) = make_graph();
    graph
        .add_pass("fill", RenderGraphQueue::Compute)
        .add_storage_output("staging", BufferInfo::new(256), None);
    graph
        .add_pass("upload", RenderGraphQueue::Compute)
        .add_storage_read_only_input("staging", None)
        .add_storage_output("vertices", BufferInfo::new(256).usage(vk::BufferUsageFlags::TRANSFER_DST), None)
        .set_build_render_pass(|cmd, resources| {
            cmd.copy_buffer(resources.buffer("staging")?, resources.buffer("vertices")?, 256)
        });
    graph
        .add_pass("draw", RenderGraphQueue::Graphics)
        .add_vertex_buffer_input("vertices")
        .add_color_output("output", AttachmentInfo::default(), None);
    graph.set_backbuffer_source("output");
    graph.bake()?;

    graph.setup_attachments(None)?;
    graph.enqueue_render_passes()?;

    let commands = take_commands(&log);
    assert_eq!(commands.iter().filter(|command| **command == Command::CopyBuffer).count(), 1);
    assert_eq!(submits(&commands), vec![(PhysicalQueue::Graphics, 0, 0)]);
    Ok(())
}

#[test]
fn depth_barriers_use_the_depth_aspect() -> Result<()> {
    let (mut graph, log) = make_graph();
    let depth = AttachmentInfo::default().format(vk::Format::D32_SFLOAT).persistent(false);
    graph
        .add_pass("prepass", RenderGraphQueue::Graphics)
        .set_depth_stencil_output("depth", depth)
        .set_get_clear_depth_stencil(|| {
            Some(ClearDepthStencil {
                depth: 1.0,
                stencil: 0,
            })
        });
    graph
        .add_pass("lighting", RenderGraphQueue::Graphics)
        .set_depth_stencil_input("depth")
        .add_color_output("output", AttachmentInfo::default(), None)
        .set_get_clear_color(|_| clear_black());
    graph.set_backbuffer_source("output");
    graph.bake()?;

    let swapchain = make_swapchain_image(&log);
    graph.setup_attachments(Some(&swapchain))?;
    graph.enqueue_render_passes()?;

    let aspects: Vec<(u64, vk::ImageAspectFlags)> = take_commands(&log)
        .into_iter()
        .filter_map(|command| match command {
            Command::PipelineBarrier { aspects, .. } => Some(aspects),
            _ => None,
        })
        .flatten()
        .collect();
    assert!(aspects.contains(&(swapchain.id, vk::ImageAspectFlags::COLOR)), "got {aspects:?}");
    let depth_aspects: Vec<vk::ImageAspectFlags> = aspects
        .iter()
        .filter(|(id, _)| *id != swapchain.id)
        .map(|(_, aspect)| *aspect)
        .collect();
    assert!(!depth_aspects.is_empty(), "the depth image is transitioned before the render pass");
    assert!(depth_aspects.iter().all(|aspect| *aspect == vk::ImageAspectFlags::DEPTH));
    Ok(())
}
