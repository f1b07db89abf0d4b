use crate::wsse::xml_escape;

pub const DEVICE_ACTION_NS: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const MEDIA_ACTION_NS: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const PTZ_ACTION_NS: &str = "http://www.onvif.org/ver20/ptz/wsdl";

pub struct OnvifRequest {
    pub namespace: &'static str,
    pub operation: &'static str,
    pub body: String,
}

pub fn get_services() -> OnvifRequest {
    build(
        DEVICE_ACTION_NS,
        "GetServices",
        format!(
            r#"<GetServices xmlns="{}"><IncludeCapability>false</IncludeCapability></GetServices>"#,
            DEVICE_ACTION_NS
        ),
    )
}

pub fn get_capabilities() -> OnvifRequest {
    build(
        DEVICE_ACTION_NS,
        "GetCapabilities",
        format!(
            r#"<GetCapabilities xmlns="{}"><Category>All</Category></GetCapabilities>"#,
            DEVICE_ACTION_NS
        ),
    )
}

pub fn get_profiles() -> OnvifRequest {
    build(
        MEDIA_ACTION_NS,
        "GetProfiles",
        format!(r#"<GetProfiles xmlns="{}"/>"#, MEDIA_ACTION_NS),
    )
}

pub fn get_presets(profile: &str) -> OnvifRequest {
    build(
        PTZ_ACTION_NS,
        "GetPresets",
        format!(
            r#"<GetPresets xmlns="{0}"><ProfileToken>{1}</ProfileToken></GetPresets>"#,
            PTZ_ACTION_NS,
            xml_escape(profile)
        ),
    )
}

pub fn get_status(profile: &str) -> OnvifRequest {
    build(
        PTZ_ACTION_NS,
        "GetStatus",
        format!(
            r#"<GetStatus xmlns="{0}"><ProfileToken>{1}</ProfileToken></GetStatus>"#,
            PTZ_ACTION_NS,
            xml_escape(profile)
        ),
    )
}

pub fn goto_preset(profile: &str, preset: &str) -> OnvifRequest {
    build(
        PTZ_ACTION_NS,
        "GotoPreset",
        format!(
            r#"<GotoPreset xmlns="{0}"><ProfileToken>{1}</ProfileToken><PresetToken>{2}</PresetToken></GotoPreset>"#,
            PTZ_ACTION_NS,
            xml_escape(profile),
            xml_escape(preset)
        ),
    )
}

fn build(namespace: &'static str, operation: &'static str, body: String) -> OnvifRequest {
    OnvifRequest {
        namespace,
        operation,
        body,
    }
}
