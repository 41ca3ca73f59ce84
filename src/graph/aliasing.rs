//! Memory aliasing between physical resources with disjoint lifetimes.

use ash::vk;

use crate::graph::pass::RenderPass;
use crate::graph::physical_pass::PhysicalPass;
use crate::graph::physical_resource::ResourceDimensions;
use crate::graph::virtual_resource::ResourceRegistry;

/// First and last physical pass reading and writing a resource.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
struct Range {
    first_write: Option<usize>,
    last_write: Option<usize>,
    first_read: Option<usize>,
    last_read: Option<usize>,
    blocked: bool,
}

impl Range {
    fn read(&mut self, pass: usize) {
        self.first_read = Some(self.first_read.map_or(pass, |first| first.min(pass)));
        self.last_read = Some(self.last_read.map_or(pass, |last| last.max(pass)));
    }

    fn write(&mut self, pass: usize, block: bool) {
        self.first_write = Some(self.first_write.map_or(pass, |first| first.min(pass)));
        self.last_write = Some(self.last_write.map_or(pass, |last| last.max(pass)));
        self.blocked |= block;
    }

    fn is_used(&self) -> bool {
        self.first_write.is_some() || self.first_read.is_some()
    }

    fn can_alias(&self) -> bool {
        // Contents read before they are fully written must be preserved.
        if let (Some(read), Some(write)) = (self.first_read, self.first_write) {
            if read <= write {
                return false;
            }
        }
        !self.blocked
    }

    fn first_use(&self) -> usize {
        self.first_write
            .into_iter()
            .chain(self.first_read)
            .min()
            .unwrap_or(usize::MAX)
    }

    fn last_use(&self) -> usize {
        self.last_write.into_iter().chain(self.last_read).max().unwrap_or(0)
    }

    fn disjoint(&self, other: &Range) -> bool {
        if !self.is_used() || !other.is_used() || !self.can_alias() || !other.can_alias() {
            return false;
        }
        self.last_use() < other.first_use() || other.last_use() < self.first_use()
    }
}

fn lifetimes(pass_stack: &[usize], passes: &[RenderPass], resources: &ResourceRegistry, count: usize) -> Vec<Range> {
    let mut ranges = vec![Range::default(); count];
    let physical = |resource: usize| resources.get(resource).physical_index();

    for &index in pass_stack {
        let pass = &passes[index];
        let Some(physical_pass) = pass.physical_pass() else {
            continue;
        };

        let reads = pass
            .color_inputs()
            .iter()
            .chain(pass.color_scale_inputs())
            .chain(pass.blit_texture_inputs())
            .chain(pass.storage_texture_inputs())
            .flatten()
            .copied()
            .chain(pass.attachment_inputs().iter().copied())
            .chain(pass.generic_texture_inputs().iter().map(|input| input.texture))
            .chain(pass.depth_stencil_input());
        for resource in reads {
            if let Some(physical) = physical(resource) {
                ranges[physical].read(physical_pass);
            }
        }

        // Another pass may rely on the contents of a skipped pass's outputs.
        let block = pass.may_skip;
        let writes = pass
            .depth_stencil_output()
            .into_iter()
            .chain(pass.color_outputs().iter().copied())
            .chain(pass.resolve_outputs().iter().copied())
            .chain(pass.blit_texture_outputs().iter().copied());
        for resource in writes {
            if let Some(physical) = physical(resource) {
                ranges[physical].write(physical_pass, block);
            }
        }

        // Storage textures keep their contents implicitly.
        for &resource in pass.storage_texture_outputs() {
            if let Some(physical) = physical(resource) {
                ranges[physical].write(physical_pass, true);
            }
        }
    }
    ranges
}

/// Find aliases between physical images. Returns for every physical resource the root of its alias chain, if it has
/// one, and records on the physical passes where ownership of the shared image moves.
pub(crate) fn build_aliases(
    pass_stack: &[usize],
    passes: &[RenderPass],
    resources: &ResourceRegistry,
    physical_passes: &mut [PhysicalPass],
    dims: &mut [ResourceDimensions],
    has_history: &[bool],
    swapchain_physical_index: Option<usize>,
) -> Vec<Option<usize>> {
    let ranges = lifetimes(pass_stack, passes, resources, dims.len());
    let mut aliases = vec![None; dims.len()];
    let mut chains: Vec<Vec<usize>> = vec![Vec::new(); dims.len()];

    let eligible = |index: usize, dims: &[ResourceDimensions]| {
        let dim = &dims[index];
        !dim.is_buffer()
            && !has_history[index]
            && !dim.is_storage_image()
            && dim.queues.is_single_queue()
            && Some(index) != swapchain_physical_index
    };

    for i in 0..dims.len() {
        if !eligible(i, dims) {
            continue;
        }

        // Only alias with lower indices, since those are allocated first.
        for j in 0..i {
            if !eligible(j, dims) || aliases[j].is_some() {
                continue;
            }
            if !dims[i].is_compatible(&dims[j]) || dims[i].queues != dims[j].queues {
                continue;
            }
            let root = [j];
            let members: &[usize] = if chains[j].is_empty() { &root } else { &chains[j] };
            if !members.iter().all(|&member| ranges[i].disjoint(&ranges[member])) {
                continue;
            }

            if chains[j].is_empty() {
                chains[j].push(j);
            }
            chains[j].push(i);
            aliases[i] = Some(j);
            debug!("Physical resource {} aliases {}", i, j);
            break;
        }
    }

    for chain in chains.iter_mut().filter(|chain| !chain.is_empty()) {
        // Every member sees the union of usage flags, since they share one image.
        let usage = chain
            .iter()
            .fold(vk::ImageUsageFlags::empty(), |usage, &member| usage | dims[member].image_usage);
        for &member in chain.iter() {
            dims[member].image_usage = usage;
        }

        chain.sort_by_key(|&member| ranges[member].first_use());
        for (position, &member) in chain.iter().enumerate() {
            let next = chain[(position + 1) % chain.len()];
            physical_passes[ranges[member].last_use()].alias_transfer.push((member, next));
        }
    }

    aliases
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(first: usize, last: usize) -> Range {
        let mut range = Range::default();
        range.write(first, false);
        range.read(last);
        range
    }

    #[test]
    fn lifetimes_must_be_strictly_disjoint() {
        assert!(range(0, 1).disjoint(&range(2, 3)));
        assert!(range(2, 3).disjoint(&range(0, 1)));
        assert!(!range(0, 2).disjoint(&range(2, 3)));
    }

    #[test]
    fn read_before_write_blocks_aliasing() {
        let mut preserved = Range::default();
        preserved.read(1);
        preserved.write(1, false);
        assert!(!preserved.can_alias());
        assert!(!preserved.disjoint(&range(3, 4)));
    }

    #[test]
    fn skippable_writers_block_aliasing() {
        let mut skipped = Range::default();
        skipped.write(0, true);
        assert!(!skipped.disjoint(&range(2, 3)));
    }
}
