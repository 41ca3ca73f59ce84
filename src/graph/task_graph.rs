//! Dependency analysis: validation of the declared passes, traversal from the backbuffer and reordering of the
//! resulting schedule.
//!
//! Traversal starts at the writers of the backbuffer source and pulls in the writers of every input, recursively.
//! Passes that do not contribute to the backbuffer are never scheduled. Dependencies along attachment edges are also
//! recorded as merge dependencies, which the reorder step and the physical pass planner use to keep such passes
//! adjacent so they can become subpasses of one render pass.

use std::collections::BTreeSet;

use crate::core::error::Error;
use crate::graph::pass::RenderPass;
use crate::graph::physical_resource::{resolve_dimensions, ResourceDimensions};
use crate::graph::virtual_resource::ResourceRegistry;
use crate::util::format::has_depth_or_stencil;

/// Per-pass dependency sets, indexed by pass index.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct PassDependencies {
    /// Passes that must run before a pass.
    pub hard: Vec<BTreeSet<usize>>,
    /// Subset of `hard` along attachment edges, where merging into one render pass pays off.
    pub merge: Vec<BTreeSet<usize>>,
}

impl PassDependencies {
    fn new(pass_count: usize) -> Self {
        Self {
            hard: vec![BTreeSet::new(); pass_count],
            merge: vec![BTreeSet::new(); pass_count],
        }
    }

    /// True if `dst` transitively depends on `src`, or they are the same pass.
    pub fn depends_on(&self, dst: usize, src: usize) -> bool {
        let mut visited = vec![false; self.hard.len()];
        let mut stack = vec![dst];
        while let Some(pass) = stack.pop() {
            if pass == src {
                return true;
            }
            if std::mem::replace(&mut visited[pass], true) {
                continue;
            }
            stack.extend(self.hard[pass].iter().copied());
        }
        false
    }
}

/// Check parallel input/output lists and input/output dimensions. Color inputs whose dimensions differ from their
/// output are turned into scaled inputs.
pub(crate) fn validate_passes(
    passes: &mut [RenderPass],
    resources: &ResourceRegistry,
    swapchain: &ResourceDimensions,
) -> Result<(), Error> {
    let dims = |index: usize| resolve_dimensions(resources, resources.get(index), swapchain);
    let name = |index: usize| resources.get(index).name().to_owned();

    for pass in passes.iter_mut() {
        let pass_name = pass.name().to_owned();
        let count_mismatch = |category: &'static str, inputs: usize, outputs: usize| Error::InputOutputCountMismatch {
            pass: pass_name.clone(),
            category,
            inputs,
            outputs,
        };
        if pass.color_inputs.len() != pass.color_outputs.len() {
            return Err(count_mismatch("color", pass.color_inputs.len(), pass.color_outputs.len()));
        }
        if pass.storage_inputs.len() != pass.storage_outputs.len() {
            return Err(count_mismatch("storage", pass.storage_inputs.len(), pass.storage_outputs.len()));
        }
        if pass.blit_texture_inputs.len() != pass.blit_texture_outputs.len() {
            return Err(count_mismatch("blit", pass.blit_texture_inputs.len(), pass.blit_texture_outputs.len()));
        }
        if pass.storage_texture_inputs.len() != pass.storage_texture_outputs.len() {
            return Err(count_mismatch(
                "storage texture",
                pass.storage_texture_inputs.len(),
                pass.storage_texture_outputs.len(),
            ));
        }
        if !pass.resolve_outputs.is_empty() && pass.resolve_outputs.len() != pass.color_outputs.len() {
            return Err(count_mismatch("resolve", pass.resolve_outputs.len(), pass.color_outputs.len()));
        }

        let mismatch = |category: &'static str, input: usize, output: usize| Error::DimensionMismatch {
            pass: pass_name.clone(),
            category,
            input: name(input),
            output: name(output),
        };

        for i in 0..pass.color_inputs.len() {
            let Some(input) = pass.color_inputs[i] else {
                continue;
            };
            let output = pass.color_outputs[i];
            if !dims(input)?.is_compatible(&dims(output)?) {
                trace!("Pass `{pass_name}`: color input `{}` is scaled into `{}`", name(input), name(output));
                pass.make_color_input_scaled(i);
            }
        }

        for (input, &output) in pass.storage_inputs.iter().zip(&pass.storage_outputs) {
            let Some(input) = *input else {
                continue;
            };
            if resources.get(input).buffer_info() != resources.get(output).buffer_info() {
                return Err(mismatch("storage", input, output));
            }
        }

        for &depth in pass.depth_stencil_input.iter().chain(pass.depth_stencil_output.iter()) {
            let format = dims(depth)?.format;
            if !has_depth_or_stencil(format) {
                return Err(Error::NotDepthStencilFormat {
                    pass: pass_name.clone(),
                    resource: name(depth),
                    format,
                });
            }
        }

        let pairs = [
            ("blit", &pass.blit_texture_inputs, &pass.blit_texture_outputs),
            ("storage texture", &pass.storage_texture_inputs, &pass.storage_texture_outputs),
        ];
        for (category, inputs, outputs) in pairs {
            for (input, &output) in inputs.iter().zip(outputs) {
                let Some(input) = *input else {
                    continue;
                };
                if !dims(input)?.is_compatible(&dims(output)?) {
                    return Err(mismatch(category, input, output));
                }
            }
        }

        if let (Some(input), Some(output)) = (pass.depth_stencil_input, pass.depth_stencil_output) {
            if !dims(input)?.is_compatible(&dims(output)?) {
                return Err(mismatch("depth-stencil", input, output));
            }
        }
    }
    Ok(())
}

/// How the writers of one input are pulled into the schedule.
#[derive(Debug, Copy, Clone, Default)]
struct DependencyKind {
    /// Having no writer is fine, the resource is used as feedback.
    no_check: bool,
    /// The pass itself may be among the writers.
    ignore_self: bool,
    /// The dependency is an attachment edge.
    merge: bool,
}

const MERGE: DependencyKind = DependencyKind {
    no_check: false,
    ignore_self: false,
    merge: true,
};

const PLAIN: DependencyKind = DependencyKind {
    no_check: false,
    ignore_self: false,
    merge: false,
};

struct Traversal<'a> {
    passes: &'a [RenderPass],
    resources: &'a ResourceRegistry,
    stack: Vec<usize>,
    dependencies: PassDependencies,
}

impl<'a> Traversal<'a> {
    fn traverse(&mut self, pass: &RenderPass, depth: usize) -> Result<(), Error> {
        if let Some(input) = pass.depth_stencil_input {
            self.depend_on_writers(pass, input, depth, MERGE)?;
        }

        for &input in &pass.attachment_inputs {
            let self_dependency = pass.depth_stencil_output == Some(input) || pass.color_outputs.contains(&input);
            if !self_dependency {
                self.depend_on_writers(pass, input, depth, MERGE)?;
            }
        }

        for &input in pass.color_inputs.iter().flatten() {
            self.depend_on_writers(pass, input, depth, MERGE)?;
        }

        for &input in pass.color_scale_inputs.iter().flatten() {
            self.depend_on_writers(pass, input, depth, PLAIN)?;
        }

        for &input in pass.blit_texture_inputs.iter().flatten() {
            self.depend_on_writers(pass, input, depth, PLAIN)?;
        }

        for input in &pass.generic_texture_inputs {
            self.depend_on_writers(pass, input.texture, depth, PLAIN)?;
        }

        for &input in pass.storage_inputs.iter().flatten() {
            let feedback = DependencyKind {
                no_check: true,
                ..PLAIN
            };
            self.depend_on_writers(pass, input, depth, feedback)?;
            // Order write-after-read against other readers of the buffer.
            let readers = self.resources.get(input).read_passes().clone();
            self.depend_on(pass, input, &readers, depth, DependencyKind {
                ignore_self: true,
                ..feedback
            })?;
        }

        for &input in pass.storage_texture_inputs.iter().flatten() {
            self.depend_on_writers(pass, input, depth, PLAIN)?;
        }

        for input in &pass.generic_buffer_inputs {
            self.depend_on_writers(pass, input.buffer, depth, DependencyKind {
                no_check: true,
                ..PLAIN
            })?;
        }
        Ok(())
    }

    fn depend_on_writers(&mut self, pass: &RenderPass, resource: usize, depth: usize, kind: DependencyKind) -> Result<(), Error> {
        let writers = self.resources.get(resource).write_passes().clone();
        self.depend_on(pass, resource, &writers, depth, kind)
    }

    fn depend_on(
        &mut self,
        pass: &RenderPass,
        resource: usize,
        dependencies: &BTreeSet<usize>,
        depth: usize,
        kind: DependencyKind,
    ) -> Result<(), Error> {
        if !kind.no_check && dependencies.is_empty() {
            return Err(Error::NoWriter {
                pass: pass.name().to_owned(),
                resource: self.resources.get(resource).name().to_owned(),
            });
        }
        if depth > self.passes.len() {
            return Err(Error::GraphHasCycle(pass.name().to_owned()));
        }

        let index = pass.index();
        for &dependency in dependencies.iter().filter(|&&dependency| dependency != index) {
            self.dependencies.hard[index].insert(dependency);
            if kind.merge {
                self.dependencies.merge[index].insert(dependency);
            }
        }

        for &dependency in dependencies {
            if dependency == index {
                if kind.ignore_self {
                    continue;
                }
                return Err(Error::SelfDependency(pass.name().to_owned()));
            }
            self.stack.push(dependency);
            let passes = self.passes;
            self.traverse(&passes[dependency], depth + 1)?;
        }
        Ok(())
    }
}

/// Build the list of passes that contribute to `backbuffer`, ordered so every pass runs after its dependencies.
pub(crate) fn traverse_dependencies(
    passes: &[RenderPass],
    resources: &ResourceRegistry,
    backbuffer: usize,
) -> Result<(Vec<usize>, PassDependencies), Error> {
    let source = resources.get(backbuffer);
    if source.write_passes().is_empty() {
        return Err(Error::NoWriter {
            pass: String::from("<backbuffer>"),
            resource: source.name().to_owned(),
        });
    }

    let mut traversal = Traversal {
        passes,
        resources,
        stack: source.write_passes().iter().copied().collect(),
        dependencies: PassDependencies::new(passes.len()),
    };

    let seeds = traversal.stack.clone();
    for seed in seeds {
        traversal.traverse(&passes[seed], 0)?;
    }

    // Last pushed is earliest in execution order. Keep the first occurrence of every pass after reversing.
    let mut seen = vec![false; passes.len()];
    let stack = traversal
        .stack
        .into_iter()
        .rev()
        .filter(|&pass| !std::mem::replace(&mut seen[pass], true))
        .collect();
    Ok((stack, traversal.dependencies))
}

/// Reorder a valid schedule to put as many passes as possible between a pass and its dependencies, while keeping
/// merge candidates adjacent.
pub(crate) fn reorder_passes(stack: &mut Vec<usize>, dependencies: &mut PassDependencies) {
    // A pass that merges into an earlier one inherits its other dependencies, so nothing gets scheduled between them.
    for pass in 0..dependencies.merge.len() {
        let merge_dependencies = dependencies.merge[pass].clone();
        let hard = dependencies.hard[pass].clone();
        for &merge_dependency in &merge_dependencies {
            for &dependee in &hard {
                if dependencies.depends_on(dependee, merge_dependency) {
                    continue;
                }
                dependencies.hard[merge_dependency].insert(dependee);
            }
        }
    }

    if stack.len() <= 2 {
        return;
    }

    let mut unscheduled = std::mem::take(stack);
    stack.push(unscheduled.remove(0));

    while !unscheduled.is_empty() {
        let mut best_candidate = 0;
        let mut best_overlap = 0;
        let tail = stack.last().copied();
        for (i, &candidate) in unscheduled.iter().enumerate() {
            let overlap = if tail.map_or(false, |tail| dependencies.merge[candidate].contains(&tail)) {
                usize::MAX
            } else {
                stack
                    .iter()
                    .rev()
                    .take_while(|&&scheduled| !dependencies.depends_on(candidate, scheduled))
                    .count()
            };
            if overlap <= best_overlap {
                continue;
            }
            let blocked = unscheduled[..i]
                .iter()
                .any(|&earlier| dependencies.depends_on(candidate, earlier));
            if blocked {
                continue;
            }
            best_candidate = i;
            best_overlap = overlap;
        }
        stack.push(unscheduled.remove(best_candidate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(hard: &[&[usize]], merge: &[&[usize]]) -> PassDependencies {
        PassDependencies {
            hard: hard.iter().map(|set| set.iter().copied().collect()).collect(),
            merge: merge.iter().map(|set| set.iter().copied().collect()).collect(),
        }
    }

    #[test]
    fn transitive_dependencies() {
        let deps = deps(&[&[], &[0], &[1]], &[&[], &[], &[]]);
        assert!(deps.depends_on(2, 0));
        assert!(deps.depends_on(1, 1));
        assert!(!deps.depends_on(0, 2));
    }

    #[test]
    fn independent_work_is_moved_between_dependent_passes() {
        // 1 depends on 0, 2 is independent. Scheduling 2 between 0 and 1 gives the GPU room to overlap.
        let mut deps = deps(&[&[], &[0], &[]], &[&[], &[], &[]]);
        let mut stack = vec![0, 1, 2];
        reorder_passes(&mut stack, &mut deps);
        assert_eq!(stack, vec![0, 2, 1]);
    }

    #[test]
    fn merge_candidates_stay_adjacent() {
        let mut deps = deps(&[&[], &[0], &[]], &[&[], &[0], &[]]);
        let mut stack = vec![0, 1, 2];
        reorder_passes(&mut stack, &mut deps);
        assert_eq!(stack, vec![0, 1, 2]);
    }
}
