//! The typed scene DAG: transforms, cameras, bundles and markers.

use nalgebra as na;

use crate::attr_block::{AttrDataBlock, AttrId};
use crate::camera::{CameraProjection, FilmFit};
use crate::transform::{transform_matrix, RotateOrder};
use crate::{FrameValue, Result, SceneError};

/// Index of a transform entry inside a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy)]
pub struct Translate3DAttrIds {
    pub tx: AttrId,
    pub ty: AttrId,
    pub tz: AttrId,
}

#[derive(Debug, Clone, Copy)]
pub struct Rotate3DAttrIds {
    pub rx: AttrId,
    pub ry: AttrId,
    pub rz: AttrId,
}

#[derive(Debug, Clone, Copy)]
pub struct Scale3DAttrIds {
    pub sx: AttrId,
    pub sy: AttrId,
    pub sz: AttrId,
}

#[derive(Debug, Clone, Copy)]
pub struct CameraAttrIds {
    /// Focal length in millimetres.
    pub focal_length: AttrId,
    /// Film back size in millimetres.
    pub film_back_width: AttrId,
    pub film_back_height: AttrId,
    /// Film back offsets in millimetres.
    pub film_offset_x: AttrId,
    pub film_offset_y: AttrId,
}

#[derive(Debug, Clone, Copy)]
pub struct MarkerAttrIds {
    /// Observed position in film-gate normalised coordinates.
    pub tx: AttrId,
    pub ty: AttrId,
    pub weight: AttrId,
}

#[derive(Debug, Clone, Copy)]
pub struct TransformNode {
    pub id: NodeId,
}

#[derive(Debug, Clone, Copy)]
pub struct CameraNode {
    pub id: NodeId,
    pub attr_ids: CameraAttrIds,
    pub film_fit: FilmFit,
    pub render_image_width: f64,
    pub render_image_height: f64,
    pub near_clip_plane: f64,
    pub far_clip_plane: f64,
    pub camera_scale: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct BundleNode {
    pub id: NodeId,
}

/// A 2D observation, linked to the camera observing it and the 3D bundle
/// it is presumed to observe.
#[derive(Debug, Clone, Copy)]
pub struct MarkerNode {
    pub camera_node: NodeId,
    pub bundle_node: NodeId,
    pub attr_ids: MarkerAttrIds,
}

#[derive(Debug, Clone)]
struct TransformEntry {
    translate: Translate3DAttrIds,
    rotate: Rotate3DAttrIds,
    scale: Scale3DAttrIds,
    rotate_order: RotateOrder,
    parent: Option<usize>,
}

/// Arena of transform entries with parent links. Cameras and bundles are
/// transform entries with extra node data carried on their node handles.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    transforms: Vec<TransformEntry>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_transform_nodes(&self) -> usize {
        self.transforms.len()
    }

    fn create_entry(
        &mut self,
        translate: Translate3DAttrIds,
        rotate: Rotate3DAttrIds,
        scale: Scale3DAttrIds,
        rotate_order: RotateOrder,
    ) -> NodeId {
        let index = self.transforms.len();
        self.transforms.push(TransformEntry {
            translate,
            rotate,
            scale,
            rotate_order,
            parent: None,
        });
        NodeId(index)
    }

    pub fn create_transform_node(
        &mut self,
        translate: Translate3DAttrIds,
        rotate: Rotate3DAttrIds,
        scale: Scale3DAttrIds,
        rotate_order: RotateOrder,
    ) -> TransformNode {
        TransformNode {
            id: self.create_entry(translate, rotate, scale, rotate_order),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_camera_node(
        &mut self,
        translate: Translate3DAttrIds,
        rotate: Rotate3DAttrIds,
        scale: Scale3DAttrIds,
        attr_ids: CameraAttrIds,
        rotate_order: RotateOrder,
        film_fit: FilmFit,
        render_image_width: f64,
        render_image_height: f64,
        near_clip_plane: f64,
        far_clip_plane: f64,
        camera_scale: f64,
    ) -> CameraNode {
        CameraNode {
            id: self.create_entry(translate, rotate, scale, rotate_order),
            attr_ids,
            film_fit,
            render_image_width,
            render_image_height,
            near_clip_plane,
            far_clip_plane,
            camera_scale,
        }
    }

    pub fn create_bundle_node(
        &mut self,
        translate: Translate3DAttrIds,
        rotate: Rotate3DAttrIds,
        scale: Scale3DAttrIds,
        rotate_order: RotateOrder,
    ) -> BundleNode {
        BundleNode {
            id: self.create_entry(translate, rotate, scale, rotate_order),
        }
    }

    pub fn create_marker_node(
        &mut self,
        camera_node: &CameraNode,
        bundle_node: &BundleNode,
        attr_ids: MarkerAttrIds,
    ) -> MarkerNode {
        MarkerNode {
            camera_node: camera_node.id,
            bundle_node: bundle_node.id,
            attr_ids,
        }
    }

    /// Parent `child` under `parent`. Fails if either id is unknown or the
    /// link would create a cycle.
    pub fn set_node_parent(&mut self, child: NodeId, parent: NodeId) -> Result<()> {
        if child.0 >= self.transforms.len() {
            return Err(SceneError::NodeIdOutOfRange(child.0));
        }
        if parent.0 >= self.transforms.len() {
            return Err(SceneError::NodeIdOutOfRange(parent.0));
        }
        // Walk up from the new parent; reaching the child means a cycle.
        let mut cursor = Some(parent.0);
        while let Some(index) = cursor {
            if index == child.0 {
                return Err(SceneError::ParentCycle);
            }
            cursor = self.transforms[index].parent;
        }
        self.transforms[child.0].parent = Some(parent.0);
        Ok(())
    }

    /// The chain of node ids from the root down to `node` inclusive.
    pub fn hierarchy_chain(&self, node: NodeId) -> Result<Vec<NodeId>> {
        if node.0 >= self.transforms.len() {
            return Err(SceneError::NodeIdOutOfRange(node.0));
        }
        let mut chain = Vec::new();
        let mut cursor = Some(node.0);
        while let Some(index) = cursor {
            chain.push(NodeId(index));
            cursor = self.transforms[index].parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Evaluate the local matrix of a single transform entry.
    pub fn local_matrix(
        &self,
        node: NodeId,
        attr_block: &AttrDataBlock,
        frame: FrameValue,
    ) -> Result<na::Matrix4<f64>> {
        let entry = self
            .transforms
            .get(node.0)
            .ok_or(SceneError::NodeIdOutOfRange(node.0))?;
        let value = |attr_id| attr_block.attr_value(attr_id, frame);
        let translate = (
            value(entry.translate.tx)?,
            value(entry.translate.ty)?,
            value(entry.translate.tz)?,
        );
        let rotate = (
            value(entry.rotate.rx)?,
            value(entry.rotate.ry)?,
            value(entry.rotate.rz)?,
        );
        let scale = (
            value(entry.scale.sx)?,
            value(entry.scale.sy)?,
            value(entry.scale.sz)?,
        );
        Ok(transform_matrix(
            translate,
            rotate,
            scale,
            entry.rotate_order,
        ))
    }

    /// Evaluate the world matrix of `node` by composing its parent chain.
    pub fn world_matrix(
        &self,
        node: NodeId,
        attr_block: &AttrDataBlock,
        frame: FrameValue,
    ) -> Result<na::Matrix4<f64>> {
        let mut world = na::Matrix4::identity();
        for link in self.hierarchy_chain(node)? {
            world *= self.local_matrix(link, attr_block, frame)?;
        }
        Ok(world)
    }

    /// Resolve the projection parameters of a camera node at a frame.
    pub fn camera_projection(
        &self,
        camera: &CameraNode,
        attr_block: &AttrDataBlock,
        frame: FrameValue,
    ) -> Result<CameraProjection> {
        Ok(CameraProjection {
            focal_length: attr_block.attr_value(camera.attr_ids.focal_length, frame)?,
            film_back_width: attr_block.attr_value(camera.attr_ids.film_back_width, frame)?,
            film_back_height: attr_block.attr_value(camera.attr_ids.film_back_height, frame)?,
            film_offset_x: attr_block.attr_value(camera.attr_ids.film_offset_x, frame)?,
            film_offset_y: attr_block.attr_value(camera.attr_ids.film_offset_y, frame)?,
            film_fit: camera.film_fit,
            render_width: camera.render_image_width,
            render_height: camera.render_image_height,
            near_clip: camera.near_clip_plane,
            far_clip: camera.far_clip_plane,
            camera_scale: camera.camera_scale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_transform_attrs(
        block: &mut AttrDataBlock,
        translate: (f64, f64, f64),
    ) -> (Translate3DAttrIds, Rotate3DAttrIds, Scale3DAttrIds) {
        let translate = Translate3DAttrIds {
            tx: block.create_attr_static(translate.0),
            ty: block.create_attr_static(translate.1),
            tz: block.create_attr_static(translate.2),
        };
        let rotate = Rotate3DAttrIds {
            rx: block.create_attr_static(0.0),
            ry: block.create_attr_static(0.0),
            rz: block.create_attr_static(0.0),
        };
        let scale = Scale3DAttrIds {
            sx: block.create_attr_static(1.0),
            sy: block.create_attr_static(1.0),
            sz: block.create_attr_static(1.0),
        };
        (translate, rotate, scale)
    }

    #[test]
    fn world_matrix_composes_parent_chain() {
        let mut block = AttrDataBlock::new();
        let mut graph = SceneGraph::new();

        let (t1, r1, s1) = make_transform_attrs(&mut block, (1.0, 0.0, 0.0));
        let parent = graph.create_transform_node(t1, r1, s1, RotateOrder::Xyz);
        let (t2, r2, s2) = make_transform_attrs(&mut block, (0.0, 2.0, 0.0));
        let child = graph.create_transform_node(t2, r2, s2, RotateOrder::Xyz);
        graph.set_node_parent(child.id, parent.id).unwrap();

        let world = graph.world_matrix(child.id, &block, 0).unwrap();
        let p = world * na::Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 2.0);
    }

    #[test]
    fn parent_cycle_is_rejected() {
        let mut block = AttrDataBlock::new();
        let mut graph = SceneGraph::new();
        let (t1, r1, s1) = make_transform_attrs(&mut block, (0.0, 0.0, 0.0));
        let a = graph.create_transform_node(t1, r1, s1, RotateOrder::Xyz);
        let (t2, r2, s2) = make_transform_attrs(&mut block, (0.0, 0.0, 0.0));
        let b = graph.create_transform_node(t2, r2, s2, RotateOrder::Xyz);

        graph.set_node_parent(b.id, a.id).unwrap();
        assert_eq!(
            graph.set_node_parent(a.id, b.id),
            Err(SceneError::ParentCycle)
        );
    }
}
