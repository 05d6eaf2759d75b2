use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Modification timestamp as stored in note documents. Older documents carry
/// date strings, newer ones epoch milliseconds; both round-trip unchanged and
/// normalize through [`Stamp::epoch_millis`] at the merge boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stamp {
    Millis(i64),
    Text(String),
}

impl Stamp {
    pub fn now() -> Self {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        Stamp::Millis((nanos / 1_000_000) as i64)
    }

    /// Tolerant normalization: numeric values pass through, strings parse as
    /// integer milliseconds and then as RFC 3339; anything else is epoch 0.
    pub fn epoch_millis(&self) -> i64 {
        match self {
            Stamp::Millis(ms) => *ms,
            Stamp::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return ms;
                }
                match OffsetDateTime::parse(text, &Rfc3339) {
                    Ok(parsed) => (parsed.unix_timestamp_nanos() / 1_000_000) as i64,
                    Err(_) => 0,
                }
            }
        }
    }
}

pub fn stamp_millis(stamp: Option<&Stamp>) -> i64 {
    stamp.map(Stamp::epoch_millis).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Pdf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// Local device path, inline `data:` URI, or remote URL. The prefix
    /// decides whether the payload is externalized before upload.
    pub data: String,
    pub name: String,
    pub mime_type: String,
    /// Display width percentage, image/video only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Set when externalization failed for this entry; the original `data`
    /// is kept so local display keeps working.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Stamp>,
}

impl Note {
    /// Every mutator stamps the note with "now"; `updated_at` is the sole
    /// tie-breaker for merge.
    pub fn touch(&mut self) {
        self.updated_at = Some(Stamp::now());
    }
}

/// Per-group sync inclusion flags. Absent means included; only an explicit
/// `false` excludes a group. This mapping is device-local policy and is never
/// overwritten by a remote merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appearance: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub general: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsGroup {
    Ai,
    Appearance,
    General,
    Language,
    Notes,
}

impl SyncPreferences {
    fn flag(&self, group: SettingsGroup) -> Option<bool> {
        match group {
            SettingsGroup::Ai => self.ai,
            SettingsGroup::Appearance => self.appearance,
            SettingsGroup::General => self.general,
            SettingsGroup::Language => self.language,
            SettingsGroup::Notes => self.notes,
        }
    }

    pub fn includes(&self, group: SettingsGroup) -> bool {
        self.flag(group) != Some(false)
    }
}

/// Flat application settings. Known keys are typed; anything else lands in
/// `extra` so settings written by newer app versions survive a round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    // ai group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_models: Option<Value>,
    // appearance group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub titlebar_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<bool>,
    // general group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_save: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_correction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_sync: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_sound: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_sound: Option<bool>,
    // language group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    // local hardware identity, never uploaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_output_id: Option<String>,
    pub sync_preferences: SyncPreferences,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    /// Baseline values merged under user-saved overrides at load time.
    pub fn defaults() -> Self {
        Settings {
            ai_enabled: Some(false),
            theme: Some("system".to_string()),
            dark_mode: Some(false),
            window_effect: Some("none".to_string()),
            titlebar_style: Some("native".to_string()),
            large_text: Some(false),
            auto_save: Some(true),
            enable_correction: Some(false),
            cloud_sync: Some(false),
            app_sound: Some(true),
            chat_sound: Some(true),
            language: Some("en".to_string()),
            ..Settings::default()
        }
    }

    pub fn cloud_sync_enabled(&self) -> bool {
        self.cloud_sync.unwrap_or(false)
    }
}

/// The account's remote document: the two fields the engine owns plus a
/// pass-through bag for everything written by other features (profile, trial
/// flag), preserved untouched across load-merge-save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<Note>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteDocument {
    pub fn is_empty(&self) -> bool {
        self.settings.is_none() && self.notes.is_none() && self.extra.is_empty()
    }
}
