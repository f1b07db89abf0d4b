use crate::error::{Result, SyncError};
use crate::ptz::{PtzPosition, PtzPreset};
use roxmltree::{Document, Node};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceAddresses {
    pub media: Option<String>,
    pub ptz: Option<String>,
}

impl ServiceAddresses {
    pub fn is_complete(&self) -> bool {
        self.media.is_some() && self.ptz.is_some()
    }

    /// Keeps what we already have, fills gaps from `other`.
    pub fn merge(self, other: ServiceAddresses) -> ServiceAddresses {
        ServiceAddresses {
            media: self.media.or(other.media),
            ptz: self.ptz.or(other.ptz),
        }
    }
}

pub fn parse_services(body: &str) -> ServiceAddresses {
    let Ok(doc) = Document::parse(body) else {
        return ServiceAddresses::default();
    };
    let mut addresses = ServiceAddresses::default();
    for service in doc.descendants().filter(|node| node.has_tag_name("Service")) {
        let namespace = child_text(service, "Namespace");
        let xaddr = child_text(service, "XAddr");
        if let (Some(ns), Some(addr)) = (namespace, xaddr) {
            if ns.contains("media/wsdl") && addresses.media.is_none() {
                addresses.media = Some(addr.clone());
            }
            if ns.contains("ptz/wsdl") {
                addresses.ptz = Some(addr);
            }
        }
    }
    addresses
}

pub fn parse_capabilities(body: &str) -> ServiceAddresses {
    let Ok(doc) = Document::parse(body) else {
        return ServiceAddresses::default();
    };
    let xaddr_of = |tag: &str| {
        doc.descendants()
            .find(|node| node.has_tag_name(tag))
            .and_then(|node| child_text(node, "XAddr"))
    };
    ServiceAddresses {
        media: xaddr_of("Media"),
        ptz: xaddr_of("PTZ"),
    }
}

/// Token of the first media profile; PTZ requests are issued against it.
pub fn parse_profile_token(body: &str) -> Result<String> {
    let doc = parse(body, "GetProfiles")?;
    doc.descendants()
        .filter(|node| node.has_tag_name("Profiles"))
        .find_map(|profile| profile.attribute("token"))
        .map(str::to_string)
        .ok_or_else(|| SyncError::protocol("GetProfiles returned no profile token"))
}

pub fn parse_presets(body: &str) -> Result<Vec<PtzPreset>> {
    let doc = parse(body, "GetPresets")?;
    if !doc
        .descendants()
        .any(|node| node.has_tag_name("GetPresetsResponse"))
    {
        return Err(SyncError::protocol("GetPresets response element missing"));
    }
    let mut presets = Vec::new();
    for preset in doc.descendants().filter(|node| node.has_tag_name("Preset")) {
        let Some(token) = preset.attribute("token") else {
            tracing::warn!("GetPresets preset without token skipped");
            continue;
        };
        let name = child_text(preset, "Name").unwrap_or_else(|| token.to_string());
        let position = preset
            .children()
            .find(|node| node.has_tag_name("PTZPosition"))
            .map(read_vector)
            .transpose()?;
        presets.push(PtzPreset::new(token, name, position));
    }
    Ok(presets)
}

pub fn parse_status(body: &str) -> Result<PtzPosition> {
    let doc = parse(body, "GetStatus")?;
    let position = doc
        .descendants()
        .find(|node| node.has_tag_name("PTZStatus"))
        .and_then(|status| status.children().find(|node| node.has_tag_name("Position")))
        .ok_or_else(|| SyncError::protocol("GetStatus response has no position"))?;
    read_vector(position)
}

/// Reads a `PTZVector`: `PanTilt@x,y` and `Zoom@x`; a missing axis reads as zero.
fn read_vector(vector: Node) -> Result<PtzPosition> {
    let pan_tilt = vector.children().find(|node| node.has_tag_name("PanTilt"));
    let zoom = vector.children().find(|node| node.has_tag_name("Zoom"));
    if pan_tilt.is_none() && zoom.is_none() {
        return Err(SyncError::protocol("PTZ vector without PanTilt or Zoom"));
    }
    Ok(PtzPosition {
        x: float_attribute(pan_tilt, "x")?,
        y: float_attribute(pan_tilt, "y")?,
        zoom: float_attribute(zoom, "x")?,
    })
}

fn float_attribute(node: Option<Node>, name: &str) -> Result<f64> {
    let Some(value) = node.and_then(|node| node.attribute(name)) else {
        return Ok(0.0);
    };
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| SyncError::protocol(format!("invalid PTZ coordinate {name}={value}")))
}

fn parse<'a>(body: &'a str, operation: &str) -> Result<Document<'a>> {
    Document::parse(body)
        .map_err(|err| SyncError::protocol(format!("invalid {operation} XML: {err}")))
}

fn child_text(node: Node, name: &str) -> Option<String> {
    node.children()
        .find(|child| child.is_element() && child.has_tag_name(name))
        .and_then(|child| child.text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
