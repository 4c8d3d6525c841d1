//! The attribute model: scalar channels on solve objects that may become
//! solver unknowns.

use serde::{Deserialize, Serialize};

use crate::frame::FrameNumber;

/// The kind of node an attribute lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    Camera,
    Bundle,
    Lens,
    Transform,
    Unknown,
}

/// Semantic role of an attribute, from a closed enumeration. The role
/// drives value dispatch onto the owning object without any string
/// matching at solve time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrRole {
    Unknown,
    TranslateX,
    TranslateY,
    TranslateZ,
    RotateX,
    RotateY,
    RotateZ,
    ScaleX,
    ScaleY,
    ScaleZ,
    FocalLength,
    LensBasicK1,
    LensBasicK2,
    LensTdeDistortion,
    LensTdeAnamorphicSqueeze,
    LensTdeCurvatureX,
    LensTdeCurvatureY,
    LensTdeQuarticDistortion,
}

impl AttrRole {
    pub fn is_lens(self) -> bool {
        matches!(
            self,
            AttrRole::LensBasicK1
                | AttrRole::LensBasicK2
                | AttrRole::LensTdeDistortion
                | AttrRole::LensTdeAnamorphicSqueeze
                | AttrRole::LensTdeCurvatureX
                | AttrRole::LensTdeCurvatureY
                | AttrRole::LensTdeQuarticDistortion
        )
    }
}

/// Compute the semantic role from an object type and channel name, the
/// same short and long channel names the host exposes.
pub fn compute_attr_role(object_type: ObjectType, attr_name: &str) -> AttrRole {
    match object_type {
        ObjectType::Lens => match attr_name {
            "k1" => AttrRole::LensBasicK1,
            "k2" => AttrRole::LensBasicK2,
            "distortion" => AttrRole::LensTdeDistortion,
            "anamorphicSqueeze" => AttrRole::LensTdeAnamorphicSqueeze,
            "curvatureX" => AttrRole::LensTdeCurvatureX,
            "curvatureY" => AttrRole::LensTdeCurvatureY,
            "quarticDistortion" => AttrRole::LensTdeQuarticDistortion,
            _ => AttrRole::Unknown,
        },
        _ => match attr_name {
            "translateX" | "tx" => AttrRole::TranslateX,
            "translateY" | "ty" => AttrRole::TranslateY,
            "translateZ" | "tz" => AttrRole::TranslateZ,
            "rotateX" | "rx" => AttrRole::RotateX,
            "rotateY" | "ry" => AttrRole::RotateY,
            "rotateZ" | "rz" => AttrRole::RotateZ,
            "scaleX" | "sx" => AttrRole::ScaleX,
            "scaleY" | "sy" => AttrRole::ScaleY,
            "scaleZ" | "sz" => AttrRole::ScaleZ,
            "focalLength" | "fl" => {
                if object_type == ObjectType::Camera {
                    AttrRole::FocalLength
                } else {
                    AttrRole::Unknown
                }
            }
            _ => AttrRole::Unknown,
        },
    }
}

/// A scalar value that is either static or keyframed.
///
/// Animated values are stored densely: one value for every integer frame
/// in `[start_frame, start_frame + values.len())`, regardless of which
/// frames participate in a solve.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Static(f64),
    Animated {
        start_frame: FrameNumber,
        values: Vec<f64>,
    },
}

impl AttrValue {
    /// An animated value holding `value` on every frame of the range.
    pub fn animated_constant(
        start_frame: FrameNumber,
        end_frame: FrameNumber,
        value: f64,
    ) -> AttrValue {
        let count = (end_frame - start_frame + 1).max(1) as usize;
        AttrValue::Animated {
            start_frame,
            values: vec![value; count],
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, AttrValue::Animated { .. })
    }

    /// Read the value at a frame. Static values ignore the frame; animated
    /// values clamp to their stored range ends.
    pub fn get(&self, frame: FrameNumber) -> f64 {
        match self {
            AttrValue::Static(value) => *value,
            AttrValue::Animated {
                start_frame,
                values,
            } => {
                if values.is_empty() {
                    return 0.0;
                }
                let index =
                    (frame - start_frame).clamp(0, values.len() as FrameNumber - 1) as usize;
                values[index]
            }
        }
    }

    /// Write the value at a frame. Writes outside an animated range are
    /// ignored; the solver only writes frames it also packed.
    pub fn set(&mut self, frame: FrameNumber, new_value: f64) {
        match self {
            AttrValue::Static(value) => *value = new_value,
            AttrValue::Animated {
                start_frame,
                values,
            } => {
                let offset = frame - *start_frame;
                if offset >= 0 && (offset as usize) < values.len() {
                    values[offset as usize] = new_value;
                }
            }
        }
    }
}

/// A named scalar channel that may be a solver unknown.
#[derive(Debug, Clone)]
pub struct Attr {
    /// Long name, `node.attribute`.
    name: String,
    /// Stable identity of the owning node, used for the affects
    /// persistence channel name.
    uuid: String,
    object_type: ObjectType,
    role: AttrRole,
    /// Index of the owning object in its per-type arena (cameras, bundles
    /// or lens layers).
    object_index: usize,
    animated: bool,
    min_value: f64,
    max_value: f64,
    offset: f64,
    scale: f64,
}

impl Attr {
    pub fn new(
        name: &str,
        uuid: &str,
        object_type: ObjectType,
        role: AttrRole,
        object_index: usize,
        animated: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            uuid: uuid.to_string(),
            object_type,
            role,
            object_index,
            animated,
            min_value: f64::NEG_INFINITY,
            max_value: f64::INFINITY,
            offset: 0.0,
            scale: 1.0,
        }
    }

    pub fn with_bounds(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn with_conditioning(mut self, offset: f64, scale: f64) -> Self {
        self.offset = offset;
        self.scale = scale;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn role(&self) -> AttrRole {
        self.role
    }

    pub fn object_index(&self) -> usize {
        self.object_index
    }

    pub fn is_animated(&self) -> bool {
        self.animated
    }

    pub fn minimum_value(&self) -> f64 {
        self.min_value
    }

    pub fn maximum_value(&self) -> f64 {
        self.max_value
    }

    pub fn offset_value(&self) -> f64 {
        self.offset
    }

    pub fn scale_value(&self) -> f64 {
        self.scale
    }

    pub fn is_unbounded(&self) -> bool {
        self.min_value == f64::NEG_INFINITY && self.max_value == f64::INFINITY
    }
}

/// Deterministic name of the keyframed integer channel the affects
/// analyser persists on a marker node for one attribute.
pub fn attr_affects_channel_name(attr: &Attr) -> String {
    let sanitized: String = attr
        .name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("affects_{}_{}", sanitized, attr.uuid())
}

/// Attributes with a per-attribute enabled mask, flipped off for unused
/// entries by the affects analyser.
#[derive(Debug, Clone, Default)]
pub struct AttrList {
    attrs: Vec<Attr>,
    enabled: Vec<bool>,
}

impl AttrList {
    pub fn from_attrs(attrs: Vec<Attr>) -> Self {
        let enabled = vec![true; attrs.len()];
        Self { attrs, enabled }
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn get_attr(&self, index: usize) -> &Attr {
        &self.attrs[index]
    }

    pub fn get_enabled(&self, index: usize) -> bool {
        self.enabled[index]
    }

    pub fn set_enabled(&mut self, index: usize, value: bool) {
        self.enabled[index] = value;
    }

    pub fn count_enabled(&self) -> usize {
        self.enabled.iter().filter(|e| **e).count()
    }

    pub fn count_disabled(&self) -> usize {
        self.len() - self.count_enabled()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attr> {
        self.attrs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_lookup_uses_object_type() {
        assert_eq!(
            compute_attr_role(ObjectType::Camera, "focalLength"),
            AttrRole::FocalLength
        );
        assert_eq!(
            compute_attr_role(ObjectType::Bundle, "tx"),
            AttrRole::TranslateX
        );
        assert_eq!(
            compute_attr_role(ObjectType::Lens, "k1"),
            AttrRole::LensBasicK1
        );
        assert_eq!(
            compute_attr_role(ObjectType::Bundle, "focalLength"),
            AttrRole::Unknown
        );
    }

    #[test]
    fn animated_value_is_dense() {
        let mut value = AttrValue::animated_constant(1, 5, 2.0);
        value.set(3, 9.0);
        assert_eq!(value.get(3), 9.0);
        assert_eq!(value.get(2), 2.0);
        // Reads clamp to the range ends.
        assert_eq!(value.get(100), 2.0);
        // Writes outside the range are dropped.
        value.set(100, 5.0);
        assert_eq!(value.get(5), 2.0);
    }

    #[test]
    fn affects_channel_name_is_deterministic() {
        let attr = Attr::new(
            "bundle_01.translateX",
            "6a2b",
            ObjectType::Bundle,
            AttrRole::TranslateX,
            0,
            false,
        );
        assert_eq!(
            attr_affects_channel_name(&attr),
            "affects_bundle_01_translateX_6a2b"
        );
    }
}
