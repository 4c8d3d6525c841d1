//! Flat scene-graph evaluator for the match-move solver.
//!
//! This crate provides the fast evaluation backend used by the solver's
//! residual function. A scene is described once as a typed DAG of
//! transforms, cameras, bundles and markers ([`SceneGraph`]), with every
//! animatable scalar stored out-of-line in an [`AttrDataBlock`]. Baking the
//! graph ([`bake_scene_graph`]) produces a [`FlatScene`]: a denormalised,
//! cache-friendly view that can re-project every (marker, frame) pair in one
//! pass over contiguous output arrays.
//!
//! ## Core types
//!
//! - [`AttrDataBlock`]: frame-indexed store of static and animated values
//! - [`SceneGraph`]: typed node arenas with parent links
//! - [`FlatScene`]: baked evaluation plans and dense output arrays
//! - [`FilmFit`]: the film-back to render-aspect mapping policy
//!
//! Coordinates produced by evaluation are in normalised film-back space:
//! `x` spans [-0.5, 0.5] across the render image width and `y` is
//! width-normalised so that scaling a delta by the render image width gives
//! an isotropic pixel distance.
#![deny(rust_2018_idioms)]

use thiserror::Error;

/// An integer frame number.
pub type FrameValue = i32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("attribute id {0} is out of range")]
    AttrIdOutOfRange(usize),
    #[error("frame {frame} is outside the stored range [{start}, {end}]")]
    FrameOutOfRange {
        frame: FrameValue,
        start: FrameValue,
        end: FrameValue,
    },
    #[error("animated attribute has no values")]
    EmptyAnimCurve,
    #[error("node id {0} is out of range")]
    NodeIdOutOfRange(usize),
    #[error("setting parent would create a cycle")]
    ParentCycle,
    #[error("film back dimensions must be positive")]
    InvalidFilmBack,
    #[error("camera matrix is not invertible")]
    SingularCameraMatrix,
}

pub type Result<T> = std::result::Result<T, SceneError>;

mod attr_block;
pub use crate::attr_block::{AttrDataBlock, AttrId};

mod transform;
pub use crate::transform::{rotate_matrix, transform_matrix, RotateOrder};

mod camera;
pub use crate::camera::{
    apply_film_fit_correction_backward, apply_film_fit_correction_forward, film_fit_factors,
    project_point, projection_matrix, CameraProjection, FilmFit,
};

mod scene_graph;
pub use crate::scene_graph::{
    BundleNode, CameraAttrIds, CameraNode, MarkerAttrIds, MarkerNode, NodeId, Rotate3DAttrIds,
    Scale3DAttrIds, SceneGraph, TransformNode, Translate3DAttrIds,
};

mod flat_scene;
pub use crate::flat_scene::{bake_scene_graph, EvaluationObjects, FlatScene};
