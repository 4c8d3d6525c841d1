//! Building the flat-scene evaluation backend from the solve objects.

use mm_scene::{
    bake_scene_graph, AttrDataBlock, AttrId, BundleNode, CameraAttrIds, CameraNode,
    EvaluationObjects, FlatScene, FrameValue, MarkerAttrIds, MarkerNode, Rotate3DAttrIds,
    Scale3DAttrIds, SceneGraph, Translate3DAttrIds,
};

use crate::attr::{Attr, AttrList, AttrRole, AttrValue, ObjectType};
use crate::bundle::Bundle;
use crate::camera::{Camera, TransformValues};
use crate::frame::FrameList;
use crate::marker::MarkerList;
use crate::{Result, SolveError};

/// The flat-scene working state of one solve: the baked scene plus the
/// mapping from solve attributes to scene attribute ids.
#[derive(Debug, Clone)]
pub struct SceneData {
    pub scene_graph: SceneGraph,
    pub attr_block: AttrDataBlock,
    pub flat_scene: FlatScene,
    pub frame_values: Vec<FrameValue>,
    pub camera_nodes: Vec<CameraNode>,
    pub bundle_nodes: Vec<BundleNode>,
    pub marker_nodes: Vec<MarkerNode>,
    /// Scene attribute id per solve attribute; lens attributes have no
    /// scene-side id and are routed to the lens state instead.
    pub attr_ids: Vec<Option<AttrId>>,
}

impl SceneData {
    /// Write a solved value into the attribute block. Static ids ignore
    /// the frame index.
    pub fn set_attr_value(
        &mut self,
        attr_index: usize,
        frame_index: Option<usize>,
        value: f64,
    ) -> bool {
        let Some(Some(attr_id)) = self.attr_ids.get(attr_index).copied() else {
            return false;
        };
        let frame = frame_index
            .and_then(|index| self.frame_values.get(index).copied())
            .unwrap_or(0);
        self.attr_block.set_attr_value(attr_id, frame, value).is_ok()
    }
}

/// Bake a host value into the attribute block, densely covering the
/// solve's frame span for animated values.
fn bake_attr_value(
    block: &mut AttrDataBlock,
    value: &AttrValue,
    start_frame: FrameValue,
    end_frame: FrameValue,
) -> Result<AttrId> {
    match value {
        AttrValue::Static(v) => Ok(block.create_attr_static(*v)),
        AttrValue::Animated { .. } => {
            let values: Vec<f64> = (start_frame..=end_frame).map(|f| value.get(f)).collect();
            Ok(block.create_attr_animated(start_frame, values)?)
        }
    }
}

struct TransformIds {
    translate: Translate3DAttrIds,
    rotate: Rotate3DAttrIds,
    scale: Scale3DAttrIds,
}

fn bake_transform(
    block: &mut AttrDataBlock,
    transform: &TransformValues,
    start_frame: FrameValue,
    end_frame: FrameValue,
) -> Result<TransformIds> {
    Ok(TransformIds {
        translate: Translate3DAttrIds {
            tx: bake_attr_value(block, &transform.tx, start_frame, end_frame)?,
            ty: bake_attr_value(block, &transform.ty, start_frame, end_frame)?,
            tz: bake_attr_value(block, &transform.tz, start_frame, end_frame)?,
        },
        rotate: Rotate3DAttrIds {
            rx: bake_attr_value(block, &transform.rx, start_frame, end_frame)?,
            ry: bake_attr_value(block, &transform.ry, start_frame, end_frame)?,
            rz: bake_attr_value(block, &transform.rz, start_frame, end_frame)?,
        },
        scale: Scale3DAttrIds {
            sx: bake_attr_value(block, &transform.sx, start_frame, end_frame)?,
            sy: bake_attr_value(block, &transform.sy, start_frame, end_frame)?,
            sz: bake_attr_value(block, &transform.sz, start_frame, end_frame)?,
        },
    })
}

struct CameraIds {
    transform: TransformIds,
    camera: CameraAttrIds,
}

fn transform_attr_id(ids: &TransformIds, role: AttrRole) -> Option<AttrId> {
    match role {
        AttrRole::TranslateX => Some(ids.translate.tx),
        AttrRole::TranslateY => Some(ids.translate.ty),
        AttrRole::TranslateZ => Some(ids.translate.tz),
        AttrRole::RotateX => Some(ids.rotate.rx),
        AttrRole::RotateY => Some(ids.rotate.ry),
        AttrRole::RotateZ => Some(ids.rotate.rz),
        AttrRole::ScaleX => Some(ids.scale.sx),
        AttrRole::ScaleY => Some(ids.scale.sy),
        AttrRole::ScaleZ => Some(ids.scale.sz),
        _ => None,
    }
}

fn attr_id_for(
    attr: &Attr,
    camera_ids: &[CameraIds],
    bundle_ids: &[TransformIds],
) -> Result<Option<AttrId>> {
    let found = match attr.object_type() {
        ObjectType::Camera => {
            let ids = camera_ids.get(attr.object_index()).ok_or_else(|| {
                SolveError::UnknownAttrObject {
                    attr: attr.name().to_string(),
                    index: attr.object_index(),
                }
            })?;
            match attr.role() {
                AttrRole::FocalLength => Some(ids.camera.focal_length),
                role => transform_attr_id(&ids.transform, role),
            }
        }
        ObjectType::Bundle => {
            let ids = bundle_ids.get(attr.object_index()).ok_or_else(|| {
                SolveError::UnknownAttrObject {
                    attr: attr.name().to_string(),
                    index: attr.object_index(),
                }
            })?;
            transform_attr_id(ids, attr.role())
        }
        // Lens attributes live in the lens state, not the scene.
        ObjectType::Lens => None,
        ObjectType::Transform | ObjectType::Unknown => None,
    };
    Ok(found)
}

/// Build the scene graph, attribute block and baked flat scene from the
/// solve objects, with index alignment: scene camera/bundle/marker slots
/// match the solve-object arena indices.
pub fn construct_scene_graph(
    cameras: &[Camera],
    markers: &MarkerList,
    bundles: &[Bundle],
    attrs: &AttrList,
    frames: &FrameList,
) -> Result<SceneData> {
    let start_frame = frames.min_frame().unwrap_or(0);
    let end_frame = frames.max_frame().unwrap_or(0);

    let mut scene_graph = SceneGraph::new();
    let mut attr_block = AttrDataBlock::new();
    let mut eval_objects = EvaluationObjects::new();

    let mut camera_ids = Vec::with_capacity(cameras.len());
    let mut camera_nodes = Vec::with_capacity(cameras.len());
    for camera in cameras {
        let transform = bake_transform(&mut attr_block, &camera.transform, start_frame, end_frame)?;
        let camera_attr_ids = CameraAttrIds {
            focal_length: bake_attr_value(
                &mut attr_block,
                &camera.focal_length,
                start_frame,
                end_frame,
            )?,
            film_back_width: bake_attr_value(
                &mut attr_block,
                &camera.film_back_width,
                start_frame,
                end_frame,
            )?,
            film_back_height: bake_attr_value(
                &mut attr_block,
                &camera.film_back_height,
                start_frame,
                end_frame,
            )?,
            film_offset_x: bake_attr_value(
                &mut attr_block,
                &camera.film_offset_x,
                start_frame,
                end_frame,
            )?,
            film_offset_y: bake_attr_value(
                &mut attr_block,
                &camera.film_offset_y,
                start_frame,
                end_frame,
            )?,
        };
        let node = scene_graph.create_camera_node(
            transform.translate,
            transform.rotate,
            transform.scale,
            camera_attr_ids,
            camera.transform.rotate_order,
            camera.film_fit,
            f64::from(camera.render_width),
            f64::from(camera.render_height),
            camera.near_clip,
            camera.far_clip,
            camera.camera_scale,
        );
        eval_objects.add_camera(&node);
        camera_nodes.push(node);
        camera_ids.push(CameraIds {
            transform,
            camera: camera_attr_ids,
        });
    }

    let mut bundle_ids = Vec::with_capacity(bundles.len());
    let mut bundle_nodes = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let transform = bake_transform(&mut attr_block, &bundle.transform, start_frame, end_frame)?;
        let node = scene_graph.create_bundle_node(
            transform.translate,
            transform.rotate,
            transform.scale,
            bundle.transform.rotate_order,
        );
        eval_objects.add_bundle(&node);
        bundle_nodes.push(node);
        bundle_ids.push(transform);
    }

    let mut marker_nodes = Vec::with_capacity(markers.len());
    for marker in markers.iter() {
        let camera_node =
            camera_nodes
                .get(marker.camera_index)
                .ok_or_else(|| SolveError::UnknownCamera {
                    marker: marker.name.clone(),
                    index: marker.camera_index,
                })?;
        let bundle_node =
            bundle_nodes
                .get(marker.bundle_index)
                .ok_or_else(|| SolveError::UnknownBundle {
                    marker: marker.name.clone(),
                    index: marker.bundle_index,
                })?;

        // Bake the overscan-adjusted observed positions.
        let positions: Vec<(f64, f64)> = (start_frame..=end_frame)
            .map(|frame| marker.position_at(frame))
            .collect();
        let attr_ids = MarkerAttrIds {
            tx: attr_block
                .create_attr_animated(start_frame, positions.iter().map(|p| p.0).collect())?,
            ty: attr_block
                .create_attr_animated(start_frame, positions.iter().map(|p| p.1).collect())?,
            weight: bake_attr_value(&mut attr_block, &marker.weight, start_frame, end_frame)?,
        };
        let node = scene_graph.create_marker_node(camera_node, bundle_node, attr_ids);
        eval_objects.add_marker(&node);
        marker_nodes.push(node);
    }

    let mut attr_ids = Vec::with_capacity(attrs.len());
    for attr in attrs.iter() {
        attr_ids.push(attr_id_for(attr, &camera_ids, &bundle_ids)?);
    }

    let flat_scene = bake_scene_graph(&scene_graph, &eval_objects)?;
    let frame_values: Vec<FrameValue> = frames.frame_numbers().to_vec();

    Ok(SceneData {
        scene_graph,
        attr_block,
        flat_scene,
        frame_values,
        camera_nodes,
        bundle_nodes,
        marker_nodes,
        attr_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::Marker;
    use approx::assert_relative_eq;

    #[test]
    fn built_scene_matches_host_objects() {
        let mut camera = Camera::new("cam", 1920, 1920);
        camera.film_back_width = AttrValue::Static(36.0);
        camera.film_back_height = AttrValue::Static(36.0);
        let cameras = vec![camera];
        let bundles = vec![Bundle::new("bnd").with_position(0.0, 0.0, 10.0)];
        let markers = MarkerList::from_markers(vec![Marker::new("mkr", 0, 0)]);
        let attrs = AttrList::from_attrs(vec![Attr::new(
            "bnd.tx",
            "b0",
            ObjectType::Bundle,
            AttrRole::TranslateX,
            0,
            false,
        )]);
        let frames = FrameList::from_frames(&[1]);

        let mut scene =
            construct_scene_graph(&cameras, &markers, &bundles, &attrs, &frames).unwrap();
        let frame_values = scene.frame_values.clone();
        scene
            .flat_scene
            .evaluate(&scene.attr_block, &frame_values)
            .unwrap();
        assert_relative_eq!(scene.flat_scene.points()[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(scene.flat_scene.points()[1], 0.0, epsilon = 1e-12);

        // Writing through the solve-attribute mapping moves the point.
        assert!(scene.set_attr_value(0, None, 1.0));
        scene
            .flat_scene
            .evaluate(&scene.attr_block, &frame_values)
            .unwrap();
        assert!(scene.flat_scene.points()[0] > 0.0);
    }

    #[test]
    fn unknown_camera_index_is_a_hard_error() {
        let cameras: Vec<Camera> = Vec::new();
        let bundles = vec![Bundle::new("bnd")];
        let markers = MarkerList::from_markers(vec![Marker::new("mkr", 3, 0)]);
        let attrs = AttrList::from_attrs(vec![]);
        let frames = FrameList::from_frames(&[1]);
        let result = construct_scene_graph(&cameras, &markers, &bundles, &attrs, &frames);
        assert!(matches!(result, Err(SolveError::UnknownCamera { .. })));
    }
}
