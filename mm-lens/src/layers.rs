//! An arena of chained lens layers.

use crate::{LensError, LensModel, Result};

#[derive(Debug, Clone)]
struct LensLayer {
    model: Box<dyn LensModel>,
    parent: Option<usize>,
}

/// Lens models indexed by small integers, each carrying an optional
/// parent layer that is applied first. Parents must be added before their
/// children, which rules out cycles by construction.
#[derive(Debug, Clone, Default)]
pub struct LensLayers {
    layers: Vec<LensLayer>,
}

impl LensLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Add a layer, returning its index. The parent, if any, must already
    /// be in the arena.
    pub fn add_layer(&mut self, model: Box<dyn LensModel>, parent: Option<usize>) -> Result<usize> {
        let index = self.layers.len();
        if let Some(parent_index) = parent {
            if parent_index >= index {
                return Err(LensError::ParentDoesNotPrecede {
                    parent: parent_index,
                    layer: index,
                });
            }
        }
        self.layers.push(LensLayer { model, parent });
        Ok(index)
    }

    pub fn model(&self, index: usize) -> Result<&dyn LensModel> {
        self.layers
            .get(index)
            .map(|layer| layer.model.as_ref())
            .ok_or(LensError::LayerOutOfRange(index))
    }

    /// Clone the model of one layer into an owned trait object.
    pub fn clone_model(&self, index: usize) -> Result<Box<dyn LensModel>> {
        self.layers
            .get(index)
            .map(|layer| layer.model.clone())
            .ok_or(LensError::LayerOutOfRange(index))
    }

    pub fn model_mut(&mut self, index: usize) -> Result<&mut Box<dyn LensModel>> {
        self.layers
            .get_mut(index)
            .map(|layer| &mut layer.model)
            .ok_or(LensError::LayerOutOfRange(index))
    }

    pub fn parent(&self, index: usize) -> Result<Option<usize>> {
        self.layers
            .get(index)
            .map(|layer| layer.parent)
            .ok_or(LensError::LayerOutOfRange(index))
    }

    /// The chain of layer indices ending at `index`, upstream first.
    pub fn chain(&self, index: usize) -> Result<Vec<usize>> {
        if index >= self.layers.len() {
            return Err(LensError::LayerOutOfRange(index));
        }
        let mut chain = Vec::new();
        let mut cursor = Some(index);
        while let Some(layer_index) = cursor {
            chain.push(layer_index);
            cursor = self.layers[layer_index].parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Distort through the whole chain ending at `index`, upstream layers
    /// applied first.
    pub fn apply_distort_chain(&self, index: usize, x: f64, y: f64) -> Result<(f64, f64)> {
        let mut position = (x, y);
        for layer_index in self.chain(index)? {
            let model = &self.layers[layer_index].model;
            position = model.apply_distort(position.0, position.1);
        }
        Ok(position)
    }
}
