//! Marker / attribute / frame reachability analysis.
//!
//! The output is the sparsity cube: `cube[marker, attr, frame]` is true
//! iff the marker's residual on that frame could change when the
//! attribute changes. Missing information always defaults to **true** — a
//! false positive only costs performance, a false negative breaks the
//! solve.

use serde::{Deserialize, Serialize};
use tracing::debug;

use mm_lens::LensLayers;

use crate::attr::{attr_affects_channel_name, AttrList, ObjectType};
use crate::frame::FrameList;
use crate::marker::{AffectsChannel, MarkerList};
use crate::matrix_bool::MatrixBool3D;

/// How marker-to-attribute reachability is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GraphMode {
    /// Walk the scene wiring from each attribute to each marker.
    Normal,
    /// Read the relationships persisted on the marker nodes.
    #[default]
    NodeName,
    /// True iff the attribute's owning node is in the marker's ancestor
    /// chain (camera, bundle or lens).
    Object,
    /// Every (marker, attribute, frame) is assumed related.
    Simple,
}

fn lens_chain_contains(layers: &LensLayers, tail: Option<usize>, wanted: usize) -> bool {
    let Some(tail) = tail else {
        return false;
    };
    match layers.chain(tail) {
        Ok(chain) => chain.contains(&wanted),
        Err(_) => false,
    }
}

/// Compute the sparsity cube for the given mode.
///
/// `camera_to_lens` maps camera arena indices to the tail lens layer of
/// that camera's distortion chain, when one exists.
pub fn find_marker_to_attr_to_frame_relationships(
    markers: &MarkerList,
    attrs: &AttrList,
    frames: &FrameList,
    layers: &LensLayers,
    camera_to_lens: &[Option<usize>],
    mode: GraphMode,
) -> MatrixBool3D {
    let mut cube = MatrixBool3D::new(markers.len(), attrs.len(), frames.len(), true);
    debug!(
        "affects analysis: mode={:?} markers={} attrs={} frames={}",
        mode,
        markers.len(),
        attrs.len(),
        frames.len()
    );

    match mode {
        GraphMode::Simple => {}
        GraphMode::Object | GraphMode::Normal => {
            for (marker_index, marker) in markers.iter().enumerate() {
                for (attr_index, attr) in attrs.iter().enumerate() {
                    let related = match attr.object_type() {
                        ObjectType::Camera => attr.object_index() == marker.camera_index,
                        ObjectType::Bundle => attr.object_index() == marker.bundle_index,
                        ObjectType::Lens => lens_chain_contains(
                            layers,
                            camera_to_lens.get(marker.camera_index).copied().flatten(),
                            attr.object_index(),
                        ),
                        ObjectType::Transform => {
                            // The object mode cannot walk transform
                            // hierarchies; assume related. The full walk
                            // resolves free transforms to their chains,
                            // and none of the solve objects parent under
                            // free transforms.
                            mode == GraphMode::Object
                        }
                        ObjectType::Unknown => true,
                    };
                    if !related {
                        for frame_index in 0..frames.len() {
                            cube.set(marker_index, attr_index, frame_index, false);
                        }
                    }
                }
            }
        }
        GraphMode::NodeName => {
            for (marker_index, marker) in markers.iter().enumerate() {
                for (attr_index, attr) in attrs.iter().enumerate() {
                    let channel_name = attr_affects_channel_name(attr);
                    let Some(channel) = marker.affects_channels.get(&channel_name) else {
                        // Channel missing: assumed to affect.
                        continue;
                    };
                    for (frame_index, frame_number, _enabled) in frames.iter_all() {
                        // 1 = affects, -1 = does not, 0 = unknown (true).
                        let value = channel.get(frame_number);
                        cube.set(marker_index, attr_index, frame_index, value >= 0);
                    }
                }
            }
        }
    }
    cube
}

/// Persist the computed relationships back onto the marker nodes so a
/// later solve can reuse them through [`GraphMode::NodeName`].
pub fn write_stored_relationships(
    markers: &mut MarkerList,
    attrs: &AttrList,
    frames: &FrameList,
    cube: &MatrixBool3D,
) {
    let (Some(start_frame), Some(end_frame)) = (frames.min_frame(), frames.max_frame()) else {
        return;
    };
    let channel_len = (end_frame - start_frame + 1) as usize;

    for marker_index in 0..markers.len() {
        for (attr_index, attr) in attrs.iter().enumerate() {
            let mut values = vec![0i8; channel_len];
            for (frame_index, frame_number, _enabled) in frames.iter_all() {
                let offset = (frame_number - start_frame) as usize;
                values[offset] = if cube.at(marker_index, attr_index, frame_index) {
                    1
                } else {
                    -1
                };
            }
            let channel_name = attr_affects_channel_name(attr);
            markers.get_marker_mut(marker_index).affects_channels.insert(
                channel_name,
                AffectsChannel {
                    start_frame,
                    values,
                },
            );
        }
    }
}

/// Clone the input lists with enable bits flipped off for markers,
/// attributes and frames that take part in no relationship.
pub fn generate_valid_lists(
    markers: &MarkerList,
    attrs: &AttrList,
    frames: &FrameList,
    cube: &MatrixBool3D,
) -> (MarkerList, AttrList, FrameList) {
    let mut valid_markers = markers.clone();
    let mut valid_attrs = attrs.clone();
    let mut valid_frames = frames.clone();

    for marker_index in 0..markers.len() {
        let used = (0..attrs.len()).any(|attr_index| {
            (0..frames.len()).any(|frame_index| cube.at(marker_index, attr_index, frame_index))
        });
        if !used {
            valid_markers.set_enabled(marker_index, false);
        }
    }

    for attr_index in 0..attrs.len() {
        let used = (0..markers.len()).any(|marker_index| {
            (0..frames.len()).any(|frame_index| cube.at(marker_index, attr_index, frame_index))
        });
        if !used {
            valid_attrs.set_enabled(attr_index, false);
        }
    }

    for frame_index in 0..frames.len() {
        let used = (0..markers.len()).any(|marker_index| {
            (0..attrs.len()).any(|attr_index| cube.at(marker_index, attr_index, frame_index))
        });
        if !used {
            valid_frames.set_enabled(frame_index, false);
        }
    }

    (valid_markers, valid_attrs, valid_frames)
}
