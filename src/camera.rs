//! Camera connection attributes and the read-only directory the core looks
//! cameras up in. Persistence of camera records lives elsewhere; this module
//! only describes what the stream core needs to know about a camera.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Vendor/type tag of a camera. Decides the default stream path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CameraKind {
    #[default]
    Rtsp,
    Onvif,
    Hikvision,
    Dahua,
    Ip,
    /// Tag we have no path convention for
    Other(String),
}

impl CameraKind {
    /// Default stream path for this vendor.
    pub fn default_path(&self) -> &'static str {
        match self {
            CameraKind::Hikvision => "/Streaming/Channels/101",
            CameraKind::Dahua => "/cam/realmonitor?channel=1&subtype=0",
            CameraKind::Onvif => "/onvif/stream1",
            CameraKind::Ip => "/stream1",
            CameraKind::Rtsp | CameraKind::Other(_) => "/stream",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CameraKind::Rtsp => "rtsp",
            CameraKind::Onvif => "onvif",
            CameraKind::Hikvision => "hikvision",
            CameraKind::Dahua => "dahua",
            CameraKind::Ip => "ip",
            CameraKind::Other(tag) => tag,
        }
    }
}

impl From<String> for CameraKind {
    fn from(tag: String) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "rtsp" => CameraKind::Rtsp,
            "onvif" => CameraKind::Onvif,
            "hikvision" => CameraKind::Hikvision,
            "dahua" => CameraKind::Dahua,
            "ip" => CameraKind::Ip,
            _ => CameraKind::Other(tag),
        }
    }
}

impl From<CameraKind> for String {
    fn from(kind: CameraKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Network identity of a camera, as seen by a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraConnection {
    /// Host/IP, or a complete stream URL
    pub address: String,
    pub kind: CameraKind,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    /// Overrides the vendor default path
    pub path: Option<String>,
    /// Explicit full stream URL; wins over everything else
    pub stream_url: Option<String>,
}

/// Read side of the camera metadata store.
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    async fn get_camera(&self, camera_id: &str) -> Option<CameraConnection>;
}

/// Directory backed by the `cameras` section of the config file.
#[derive(Debug, Default)]
pub struct StaticCameraDirectory {
    cameras: HashMap<String, CameraConnection>,
}

impl StaticCameraDirectory {
    pub fn new<I>(cameras: I) -> Self
    where
        I: IntoIterator<Item = (String, CameraConnection)>,
    {
        Self {
            cameras: cameras.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CameraDirectory for StaticCameraDirectory {
    async fn get_camera(&self, camera_id: &str) -> Option<CameraConnection> {
        self.cameras.get(camera_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_case_insensitive() {
        assert_eq!(CameraKind::from("Hikvision".to_string()), CameraKind::Hikvision);
        assert_eq!(CameraKind::from("DAHUA".to_string()), CameraKind::Dahua);
        assert_eq!(
            CameraKind::from("axis".to_string()),
            CameraKind::Other("axis".to_string())
        );
    }

    #[test]
    fn unknown_kind_uses_generic_path() {
        assert_eq!(CameraKind::Other("axis".into()).default_path(), "/stream");
        assert_eq!(CameraKind::Rtsp.default_path(), "/stream");
    }

    #[tokio::test]
    async fn static_directory_lookup() {
        let directory = StaticCameraDirectory::new([(
            "lobby".to_string(),
            CameraConnection {
                address: "10.0.0.2".into(),
                ..Default::default()
            },
        )]);

        assert!(directory.get_camera("lobby").await.is_some());
        assert!(directory.get_camera("garage").await.is_none());
    }
}
