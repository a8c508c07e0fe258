use crate::acrf::Acrf;
use crate::graph::UnrolledVarSet;
use crate::template::TemplateRef;

#[derive(Debug, Clone)]
struct TemplateBlock {
    /// Position of the first default weight
    offset: usize,
    num_assignments: usize,
    /// Position of the first per-feature weight of each assignment
    assignment_offsets: Vec<usize>,
}

/// Maps the weights of the trainable templates onto one flat vector.
///
/// Each template occupies a contiguous block: its default weights first,
/// then the stored weights of every assignment in order.
#[derive(Debug, Clone, Default)]
pub struct ParameterLayout {
    blocks: Vec<Option<TemplateBlock>>,
    len: usize,
}

impl ParameterLayout {
    pub fn new(acrf: &Acrf) -> Self {
        let mut len = 0;
        let blocks = acrf
            .templates()
            .iter()
            .map(|template| {
                if !template.is_trainable() {
                    return None;
                }
                let weights = template.weights();
                let offset = len;
                len += weights.default_weights().len();
                let assignment_offsets = weights
                    .weights()
                    .iter()
                    .map(|w| {
                        let start = len;
                        len += w.num_locations();
                        start
                    })
                    .collect();
                Some(TemplateBlock {
                    offset,
                    num_assignments: weights.num_assignments(),
                    assignment_offsets,
                })
            })
            .collect();
        Self { blocks, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position of the default weight of `assignment` in `template`
    pub fn default_position(&self, template: usize, assignment: usize) -> Option<usize> {
        let block = self.blocks.get(template)?.as_ref()?;
        (assignment < block.num_assignments).then(|| block.offset + assignment)
    }

    /// Trainable template owning flat position `position`
    pub fn template_of(&self, position: usize) -> Option<usize> {
        self.blocks.iter().enumerate().rev().find_map(|(t, block)| {
            block
                .as_ref()
                .filter(|b| b.offset <= position && position < self.len)
                .map(|_| t)
        })
    }

    /// Position of the weight of `feature` for `assignment` in `template`
    pub fn weight_position(
        &self,
        acrf: &Acrf,
        template: usize,
        assignment: usize,
        feature: u32,
    ) -> Option<usize> {
        let block = self.blocks.get(template)?.as_ref()?;
        let base = *block.assignment_offsets.get(assignment)?;
        let loc = acrf.templates()[template].weights().weights()[assignment].location(feature)?;
        Some(base + loc)
    }

    /// Copy the current weights into `buf`
    pub fn gather(&self, acrf: &Acrf, buf: &mut [f64]) {
        for (template, block) in acrf.templates().iter().zip(&self.blocks) {
            let block = match block {
                Some(block) => block,
                None => continue,
            };
            let weights = template.weights();
            let defaults = weights.default_weights();
            buf[block.offset..block.offset + defaults.len()].copy_from_slice(defaults);
            for (w, &start) in weights.weights().iter().zip(&block.assignment_offsets) {
                buf[start..start + w.num_locations()].copy_from_slice(w.values());
            }
        }
    }

    /// Write `buf` back into the template weights
    pub fn scatter(&self, acrf: &mut Acrf, buf: &[f64]) {
        for (template, block) in acrf.templates_mut().iter_mut().zip(&self.blocks) {
            let block = match block {
                Some(block) => block,
                None => continue,
            };
            let weights = template.weights_mut();
            let n = weights.default_weights().len();
            weights
                .default_weights_mut()
                .copy_from_slice(&buf[block.offset..block.offset + n]);
            for (w, &start) in weights.weights_mut().iter_mut().zip(&block.assignment_offsets) {
                let n = w.num_locations();
                w.values_mut().copy_from_slice(&buf[start..start + n]);
            }
        }
    }
}

/// Sufficient statistics accumulated into a buffer aligned with a
/// [`ParameterLayout`].
#[derive(Debug)]
pub struct Statistics<'a> {
    acrf: &'a Acrf,
    layout: &'a ParameterLayout,
    values: &'a mut [f64],
}

impl<'a> Statistics<'a> {
    pub fn new(acrf: &'a Acrf, layout: &'a ParameterLayout, values: &'a mut [f64]) -> Self {
        debug_assert_eq!(values.len(), layout.len());
        Self {
            acrf,
            layout,
            values,
        }
    }

    /// Add `scale` times the clique features, and `scale` to the default
    /// weight, at `assignment` of the clique's template.
    ///
    /// Fixed and frozen templates, and features without a stored weight,
    /// are ignored.
    pub fn add(&mut self, clique: &UnrolledVarSet, assignment: usize, scale: f64) {
        let t = match clique.template() {
            TemplateRef::Trainable(t) => t,
            TemplateRef::Fixed(_) => return,
        };
        let block = match self.layout.blocks.get(t) {
            Some(Some(block)) => block,
            _ => return,
        };
        if assignment >= block.num_assignments {
            return;
        }
        self.values[block.offset + assignment] += scale;
        let weights = &self.acrf.templates()[t].weights().weights()[assignment];
        let base = block.assignment_offsets[assignment];
        for (idx, value) in clique.features().iter() {
            if let Some(loc) = weights.location(idx) {
                self.values[base + loc] += scale * value;
            }
        }
    }
}
