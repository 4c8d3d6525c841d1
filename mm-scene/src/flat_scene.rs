//! Baking a [`SceneGraph`] into a dense, batched evaluation plan.

use nalgebra as na;

use crate::attr_block::AttrDataBlock;
use crate::camera::{apply_film_fit_correction_backward, project_point, projection_matrix};
use crate::scene_graph::{BundleNode, CameraNode, MarkerNode, NodeId, SceneGraph};
use crate::{FrameValue, Result, SceneError};

/// The objects selected for evaluation when baking a scene.
#[derive(Debug, Clone, Default)]
pub struct EvaluationObjects {
    cameras: Vec<CameraNode>,
    bundles: Vec<BundleNode>,
    markers: Vec<MarkerNode>,
}

impl EvaluationObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_camera(&mut self, node: &CameraNode) {
        self.cameras.push(*node);
    }

    pub fn add_bundle(&mut self, node: &BundleNode) {
        self.bundles.push(*node);
    }

    pub fn add_marker(&mut self, node: &MarkerNode) {
        self.markers.push(*node);
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn num_bundles(&self) -> usize {
        self.bundles.len()
    }

    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }
}

#[derive(Debug, Clone)]
struct CameraPlan {
    node: CameraNode,
    chain: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct MarkerPlan {
    marker: MarkerNode,
    camera_slot: usize,
    bundle_chain: Vec<NodeId>,
}

/// A denormalised view of the scene used for per-residual evaluation.
///
/// [`FlatScene::evaluate`] fills two arrays laid out so that consecutive
/// frames for a given marker are adjacent in memory:
/// `index = (marker * num_frames + frame) * 2`.
#[derive(Debug, Clone, Default)]
pub struct FlatScene {
    graph: SceneGraph,
    cameras: Vec<CameraPlan>,
    markers: Vec<MarkerPlan>,
    out_points: Vec<f64>,
    out_markers: Vec<f64>,
    num_frames: usize,
}

/// Walk the graph once and emit per-marker evaluation plans.
pub fn bake_scene_graph(
    scene_graph: &SceneGraph,
    eval_objects: &EvaluationObjects,
) -> Result<FlatScene> {
    let mut camera_plans: Vec<CameraPlan> = Vec::with_capacity(eval_objects.cameras.len());
    for camera in &eval_objects.cameras {
        camera_plans.push(CameraPlan {
            node: *camera,
            chain: scene_graph.hierarchy_chain(camera.id)?,
        });
    }

    let mut marker_plans = Vec::with_capacity(eval_objects.markers.len());
    for marker in &eval_objects.markers {
        let camera_slot = camera_plans
            .iter()
            .position(|plan| plan.node.id == marker.camera_node)
            .ok_or(SceneError::NodeIdOutOfRange(marker.camera_node.0))?;
        marker_plans.push(MarkerPlan {
            marker: *marker,
            camera_slot,
            bundle_chain: scene_graph.hierarchy_chain(marker.bundle_node)?,
        });
    }

    Ok(FlatScene {
        graph: scene_graph.clone(),
        cameras: camera_plans,
        markers: marker_plans,
        out_points: Vec::new(),
        out_markers: Vec::new(),
        num_frames: 0,
    })
}

impl FlatScene {
    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }

    /// One re-projected point per marker.
    pub fn num_points(&self) -> usize {
        self.markers.len()
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Re-projected bundle positions, interleaved (x, y) per (marker, frame).
    pub fn points(&self) -> &[f64] {
        &self.out_points
    }

    /// Observed marker positions, interleaved (x, y) per (marker, frame).
    pub fn markers(&self) -> &[f64] {
        &self.out_markers
    }

    fn chain_world_matrix(
        &self,
        chain: &[NodeId],
        attr_block: &AttrDataBlock,
        frame: FrameValue,
    ) -> Result<na::Matrix4<f64>> {
        let mut world = na::Matrix4::identity();
        for node in chain {
            world *= self.graph.local_matrix(*node, attr_block, frame)?;
        }
        Ok(world)
    }

    /// Evaluate every (marker, frame) pair into the output arrays.
    pub fn evaluate(&mut self, attr_block: &AttrDataBlock, frames: &[FrameValue]) -> Result<()> {
        let num_frames = frames.len();
        let num_values = self.markers.len() * num_frames * 2;
        self.num_frames = num_frames;
        self.out_points.clear();
        self.out_points.resize(num_values, 0.0);
        self.out_markers.clear();
        self.out_markers.resize(num_values, 0.0);

        // World-projection matrix and film aspect per (camera, frame).
        let mut camera_matrices = Vec::with_capacity(self.cameras.len() * num_frames);
        let mut camera_aspects = Vec::with_capacity(self.cameras.len() * num_frames);
        for plan in &self.cameras {
            for frame in frames {
                let world = self.chain_world_matrix(&plan.chain, attr_block, *frame)?;
                let view = world
                    .try_inverse()
                    .ok_or(SceneError::SingularCameraMatrix)?;
                let camera_parameters =
                    self.graph
                        .camera_projection(&plan.node, attr_block, *frame)?;
                let projection = projection_matrix(&camera_parameters)?;
                camera_matrices.push(projection * view);
                camera_aspects.push((
                    camera_parameters.film_aspect(),
                    camera_parameters.render_aspect(),
                ));
            }
        }

        for (marker_index, plan) in self.markers.iter().enumerate() {
            let node = &self.cameras[plan.camera_slot].node;
            for (frame_index, frame) in frames.iter().enumerate() {
                let camera_index = plan.camera_slot * num_frames + frame_index;
                let world_projection = &camera_matrices[camera_index];
                let (film_aspect, render_aspect) = camera_aspects[camera_index];

                let bundle_world =
                    self.chain_world_matrix(&plan.bundle_chain, attr_block, *frame)?;
                let bundle_position = na::Point3::new(
                    bundle_world[(0, 3)],
                    bundle_world[(1, 3)],
                    bundle_world[(2, 3)],
                );
                let (point_x, point_y) = project_point(world_projection, &bundle_position);

                let mut marker_x = attr_block.attr_value(plan.marker.attr_ids.tx, *frame)?;
                let mut marker_y = attr_block.attr_value(plan.marker.attr_ids.ty, *frame)?;
                // Width-normalise y, then match the film-fit scale the
                // projection has already applied to the point.
                marker_y /= film_aspect;
                apply_film_fit_correction_backward(
                    node.film_fit,
                    film_aspect,
                    render_aspect,
                    &mut marker_x,
                    &mut marker_y,
                );

                let out_index = (marker_index * num_frames + frame_index) * 2;
                self.out_points[out_index] = point_x;
                self.out_points[out_index + 1] = point_y;
                self.out_markers[out_index] = marker_x;
                self.out_markers[out_index + 1] = marker_y;
            }
        }
        Ok(())
    }
}
