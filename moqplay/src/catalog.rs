//! Track catalog
//!
//! Publishers describe their tracks in a JSON catalog. The player reads it
//! to learn which ladder tracks exist before subscribing.

use crate::config::LadderConfig;
use moqplay_core::{PlayoutError, TrackNamespace};
use serde::{Deserialize, Serialize};

/// Fields shared by every track in a catalog
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonTrackFields {
    /// Namespace the tracks are published under
    pub namespace: String,
    /// Packaging format
    #[serde(default)]
    pub packaging: String,
    /// Render group
    #[serde(default)]
    pub render_group: u32,
}

/// Properties a player selects tracks by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionParams {
    /// Codec string, e.g. "avc1.640028"
    pub codec: String,
    /// MIME type
    pub mime_type: String,
    /// Frame width
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Frame height
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Frames per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<u32>,
    /// Bits per second
    pub bitrate: u64,
    /// Audio sample rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samplerate: Option<u32>,
    /// Audio channel layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_config: Option<String>,
}

/// One published track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogTrack {
    /// Track name
    pub name: String,
    /// Human readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Selection properties
    pub selection_params: SelectionParams,
    /// Tracks sharing an alt group are alternatives of each other
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_group: Option<u32>,
}

impl CatalogTrack {
    /// Whether the track carries video
    pub fn is_video(&self) -> bool {
        self.selection_params.mime_type.starts_with("video/")
            || self.selection_params.width.is_some()
    }
}

/// Parsed catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    /// Catalog format version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Streaming format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_format: Option<u32>,
    /// Streaming format version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_format_version: Option<String>,
    /// Fields shared by all tracks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_track_fields: Option<CommonTrackFields>,
    /// Published tracks, preferred first
    pub tracks: Vec<CatalogTrack>,
}

impl Catalog {
    /// Parse a catalog or bare track list from JSON
    pub fn from_json_str(json: &str) -> Result<Self, PlayoutError> {
        let catalog: Self = serde_json::from_str(json).map_err(|e| PlayoutError::InvalidData {
            reason: format!("Invalid catalog: {}", e),
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse from raw bytes
    pub fn from_slice(data: &[u8]) -> Result<Self, PlayoutError> {
        let json = std::str::from_utf8(data).map_err(|e| PlayoutError::InvalidData {
            reason: format!("Catalog is not UTF-8: {}", e),
        })?;
        Self::from_json_str(json)
    }

    /// Serialize as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn validate(&self) -> Result<(), PlayoutError> {
        if self.tracks.is_empty() {
            return Err(PlayoutError::InvalidData {
                reason: "Catalog lists no tracks".to_string(),
            });
        }
        for (i, track) in self.tracks.iter().enumerate() {
            if track.name.is_empty() {
                return Err(PlayoutError::InvalidData {
                    reason: format!("Catalog track {} has no name", i),
                });
            }
            if self.tracks[..i].iter().any(|t| t.name == track.name) {
                return Err(PlayoutError::InvalidData {
                    reason: format!("Catalog lists track '{}' twice", track.name),
                });
            }
        }
        Ok(())
    }

    /// Track by name
    pub fn track(&self, name: &str) -> Option<&CatalogTrack> {
        self.tracks.iter().find(|t| t.name == name)
    }

    /// Namespace from the common fields, if present
    pub fn namespace(&self) -> Option<&str> {
        self.common_track_fields
            .as_ref()
            .map(|fields| fields.namespace.as_str())
            .filter(|ns| !ns.is_empty())
    }

    /// Names of the video ladder, i.e. every track except `audio_track`
    pub fn video_track_names(&self, audio_track: &str) -> Vec<String> {
        self.tracks
            .iter()
            .filter(|t| t.name != audio_track)
            .map(|t| t.name.clone())
            .collect()
    }

    /// Check that the ladder's audio track and at least one video track are
    /// published
    pub fn check_ladder(&self, ladder: &LadderConfig) -> Result<(), PlayoutError> {
        if self.track(&ladder.audio_track).is_none() {
            return Err(PlayoutError::TrackNotFound {
                track_namespace: TrackNamespace::new(&ladder.namespace, &ladder.audio_track)
                    .to_string(),
            });
        }
        if !ladder
            .video_tracks()
            .iter()
            .any(|name| self.track(name).is_some())
        {
            return Err(PlayoutError::InvalidConfiguration {
                reason: format!(
                    "Catalog offers none of the ladder video tracks {:?}",
                    ladder.video_tracks()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "version": 1,
        "streamingFormat": 1,
        "streamingFormatVersion": "0.2",
        "commonTrackFields": { "namespace": "live", "packaging": "loc", "renderGroup": 1 },
        "tracks": [
            { "name": "hd", "selectionParams": { "codec": "avc1.640028", "mimeType": "video/h264",
              "width": 1920, "height": 1080, "framerate": 30, "bitrate": 3000000 }, "altGroup": 1 },
            { "name": "md", "selectionParams": { "codec": "avc1.64001f", "mimeType": "video/h264",
              "width": 1280, "height": 720, "framerate": 30, "bitrate": 1500000 }, "altGroup": 1 },
            { "name": "audio", "selectionParams": { "codec": "opus", "mimeType": "audio/ogg",
              "bitrate": 32000, "samplerate": 48000, "channelConfig": "2" } }
        ]
    }"#;

    #[test]
    fn test_parse_full_catalog() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        assert_eq!(catalog.version, Some(1));
        assert_eq!(catalog.namespace(), Some("live"));
        assert_eq!(catalog.tracks.len(), 3);

        let hd = catalog.track("hd").unwrap();
        assert!(hd.is_video());
        assert_eq!(hd.selection_params.height, Some(1080));
        assert_eq!(hd.alt_group, Some(1));

        let audio = catalog.track("audio").unwrap();
        assert!(!audio.is_video());
        assert_eq!(audio.selection_params.channel_config.as_deref(), Some("2"));

        assert_eq!(catalog.video_track_names("audio"), vec!["hd", "md"]);
    }

    #[test]
    fn test_bare_track_list() {
        let catalog = Catalog::from_slice(
            br#"{ "tracks": [ { "name": "audio", "label": "Main",
                "selectionParams": { "codec": "opus", "mimeType": "audio/ogg", "bitrate": 32000 } } ] }"#,
        )
        .unwrap();
        assert_eq!(catalog.namespace(), None);
        assert_eq!(catalog.tracks[0].label.as_deref(), Some("Main"));
        assert!(catalog.video_track_names("audio").is_empty());
    }

    #[test]
    fn test_invalid_catalogs() {
        assert!(Catalog::from_json_str(r#"{ "tracks": [] }"#).is_err());
        assert!(Catalog::from_json_str(r#"{ "tracks": [ { "name": "hd" } ] }"#).is_err());

        let duplicate = r#"{ "tracks": [
            { "name": "hd", "selectionParams": { "codec": "a", "mimeType": "video/h264", "bitrate": 1 } },
            { "name": "hd", "selectionParams": { "codec": "a", "mimeType": "video/h264", "bitrate": 1 } }
        ] }"#;
        let err = Catalog::from_json_str(duplicate).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DATA");
    }

    #[test]
    fn test_check_ladder() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        catalog.check_ladder(&LadderConfig::default()).unwrap();

        let ladder = LadderConfig {
            audio_track: "sound".to_string(),
            ..LadderConfig::default()
        };
        assert_eq!(
            catalog.check_ladder(&ladder).unwrap_err().error_code(),
            "TRACK_NOT_FOUND"
        );

        let ladder = LadderConfig {
            hd_track: "uhd".to_string(),
            md_track: "sd".to_string(),
            ..LadderConfig::default()
        };
        assert!(catalog.check_ladder(&ladder).is_err());
    }

    #[test]
    fn test_serialize_omits_absent_fields() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        let json = catalog.to_json().unwrap();
        assert!(json.contains("\"mimeType\":\"video/h264\""));
        assert!(!json.contains("\"samplerate\":null"));
        assert_eq!(Catalog::from_json_str(&json).unwrap(), catalog);
    }
}
