use serde::{Deserialize, Serialize};

/// Physical pose reported by a camera.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PtzPosition {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl PtzPosition {
    pub fn new(x: f64, y: f64, zoom: f64) -> Self {
        Self { x, y, zoom }
    }

    /// Component-wise comparison. A tolerance of zero is exact equality.
    pub fn matches(&self, other: &PtzPosition, tolerance: f64) -> bool {
        if tolerance <= 0.0 {
            return self == other;
        }
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.zoom - other.zoom).abs() <= tolerance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PtzPreset {
    /// Vendor token (ONVIF preset token, Axis preset number).
    pub id: String,
    pub name: String,
    /// `None` until the device reported where the preset points.
    pub position: Option<PtzPosition>,
}

impl PtzPreset {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        position: Option<PtzPosition>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
        }
    }

    pub fn thumbnail_file(&self) -> String {
        format!("preset_{}.png", self.id)
    }
}

/// Presets shown to the operator: hidden ones removed, capped at the limit.
pub fn visible_presets(presets: &[PtzPreset], hidden: &[String], limit: usize) -> Vec<PtzPreset> {
    presets
        .iter()
        .take(limit)
        .filter(|preset| !hidden.iter().any(|id| id == &preset.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_without_tolerance() {
        let a = PtzPosition::new(5.0, 5.0, 2.0);
        assert!(a.matches(&PtzPosition::new(5.0, 5.0, 2.0), 0.0));
        assert!(!a.matches(&PtzPosition::new(5.0, 5.0001, 2.0), 0.0));
    }

    #[test]
    fn tolerance_absorbs_rounding_noise() {
        let a = PtzPosition::new(0.25, -0.5, 0.1);
        let b = PtzPosition::new(0.2501, -0.4999, 0.1);
        assert!(a.matches(&b, 0.001));
        assert!(!a.matches(&PtzPosition::new(0.3, -0.5, 0.1), 0.001));
    }

    #[test]
    fn limit_applies_before_hiding() {
        let presets: Vec<PtzPreset> = (1..=5)
            .map(|i| PtzPreset::new(i.to_string(), format!("Preset {i}"), None))
            .collect();
        let visible = visible_presets(&presets, &["2".to_string(), "5".to_string()], 4);
        let ids: Vec<&str> = visible.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "4"]);
    }
}
