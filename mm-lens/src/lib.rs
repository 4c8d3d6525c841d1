//! Lens distortion models for the match-move solver.
//!
//! Models implement [`LensModel`] and are consumed as trait objects; the
//! solver only relies on `apply_distort` / `apply_undistort` over
//! normalised film-back coordinates and the typed parameter accessors.
//! Chains of models are held in a [`LensLayers`] arena where each layer
//! may name an upstream parent layer that is applied first.
#![deny(rust_2018_idioms)]

use dyn_clone::DynClone;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LensError {
    #[error("lens layer index {0} is out of range")]
    LayerOutOfRange(usize),
    #[error("parent layer {parent} does not precede layer {layer}")]
    ParentDoesNotPrecede { parent: usize, layer: usize },
}

pub type Result<T> = std::result::Result<T, LensError>;

/// The distortion models shipped with the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LensModelType {
    Passthrough,
    BasicRadial,
    TdeClassic,
}

/// A typed lens coefficient, addressed independently of the model that
/// holds it. Setting a parameter a model does not have is a no-op that
/// reports `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LensParameter {
    BasicK1,
    BasicK2,
    TdeDistortion,
    TdeAnamorphicSqueeze,
    TdeCurvatureX,
    TdeCurvatureY,
    TdeQuarticDistortion,
}

/// A lens distortion model over normalised film-back coordinates.
pub trait LensModel: DynClone + std::fmt::Debug {
    fn model_type(&self) -> LensModelType;

    /// Map an undistorted position to its distorted position.
    fn apply_distort(&self, x: f64, y: f64) -> (f64, f64);

    /// Map a distorted position back to an undistorted position.
    fn apply_undistort(&self, x: f64, y: f64) -> (f64, f64);

    /// Read a coefficient; `None` when the model has no such parameter.
    fn parameter(&self, parameter: LensParameter) -> Option<f64>;

    /// Write a coefficient; returns `false` when the model has no such
    /// parameter.
    fn set_parameter(&mut self, parameter: LensParameter, value: f64) -> bool;
}

dyn_clone::clone_trait_object!(LensModel);

/// A model that leaves positions untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl LensModel for Passthrough {
    fn model_type(&self) -> LensModelType {
        LensModelType::Passthrough
    }

    fn apply_distort(&self, x: f64, y: f64) -> (f64, f64) {
        (x, y)
    }

    fn apply_undistort(&self, x: f64, y: f64) -> (f64, f64) {
        (x, y)
    }

    fn parameter(&self, _parameter: LensParameter) -> Option<f64> {
        None
    }

    fn set_parameter(&mut self, _parameter: LensParameter, _value: f64) -> bool {
        false
    }
}

mod basic;
pub use crate::basic::BasicRadial;

mod tde_classic;
pub use crate::tde_classic::TdeClassic;

mod layers;
pub use crate::layers::LensLayers;
