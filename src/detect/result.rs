use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// One tracked object reported by the upstream tracker for a single frame.
///
/// Every field is optional because trackers routinely emit boxes before an
/// identity is assigned. Only complete records are countable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub track_id: Option<u64>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default, rename = "box")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Detection {
    pub fn new(track_id: u64, class_name: &str, bbox: BoundingBox) -> Self {
        Self {
            track_id: Some(track_id),
            class_name: Some(class_name.to_string()),
            bbox: Some(bbox),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Returns `(track_id, class_name, bbox)` when all three are present.
    pub fn complete(&self) -> Option<(u64, &str, BoundingBox)> {
        Some((self.track_id?, self.class_name.as_deref()?, self.bbox?))
    }

    pub fn is_complete(&self) -> bool {
        self.complete().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tracker_json() {
        let json = r#"{"track_id": 3, "class_name": "bracket_OK", "box": [10, 20, 30, 40]}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(
            det,
            Detection::new(3, "bracket_OK", BoundingBox::new(10.0, 20.0, 30.0, 40.0))
        );
    }

    #[test]
    fn missing_fields_make_detection_incomplete() {
        let no_id: Detection =
            serde_json::from_str(r#"{"class_name": "bracket_OK", "box": [0, 0, 1, 1]}"#).unwrap();
        let no_box: Detection =
            serde_json::from_str(r#"{"track_id": 1, "class_name": "bracket_OK"}"#).unwrap();
        let no_class: Detection =
            serde_json::from_str(r#"{"track_id": 1, "box": [0, 0, 1, 1]}"#).unwrap();

        assert!(!no_id.is_complete());
        assert!(!no_box.is_complete());
        assert!(!no_class.is_complete());
    }
}
