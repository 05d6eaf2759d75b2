use crate::model::{Settings, SettingsGroup};

// Fixed group membership. The `notes` preference is not a settings group; it
// gates whether notes are synced at all and is handled by the orchestrator.
macro_rules! ai_fields {
    ($op:ident, $($rest:tt)*) => { $op!([ai_api_key, ai_model, ai_enabled, custom_models], $($rest)*) };
}
macro_rules! appearance_fields {
    ($op:ident, $($rest:tt)*) => { $op!([theme, dark_mode, window_effect, titlebar_style, large_text], $($rest)*) };
}
macro_rules! general_fields {
    ($op:ident, $($rest:tt)*) => { $op!([auto_save, enable_correction, cloud_sync, app_sound, chat_sound], $($rest)*) };
}

macro_rules! clear {
    ([$($field:ident),+], $target:expr) => {
        $( $target.$field = None; )+
    };
}

macro_rules! copy_present {
    ([$($field:ident),+], $source:expr, $target:expr) => {
        $( if $source.$field.is_some() { $target.$field = $source.$field.clone(); } )+
    };
}

/// Result of merging remotely stored settings into the local ones.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedSettings {
    pub settings: Settings,
    /// Set when the merge changed the interface language; the caller switches
    /// the active language as an explicit side effect.
    pub language_changed: Option<String>,
}

/// Builds the outgoing copy of `settings` for upload. Keys of every excluded
/// group are removed; hardware-identity fields are always stripped. The input
/// is never mutated.
pub fn filter_for_upload(settings: &Settings) -> Settings {
    let prefs = &settings.sync_preferences;
    let mut out = settings.clone();

    if !prefs.includes(SettingsGroup::Ai) {
        ai_fields!(clear, out);
    }
    if !prefs.includes(SettingsGroup::Appearance) {
        appearance_fields!(clear, out);
    }
    if !prefs.includes(SettingsGroup::General) {
        general_fields!(clear, out);
    }
    if !prefs.includes(SettingsGroup::Language) {
        out.language = None;
    }

    // Audio device ids name local hardware, not shareable state.
    out.audio_input_id = None;
    out.audio_output_id = None;

    out
}

/// Merges remote settings into local ones. Within each included group every
/// key present on the remote side wins; excluded groups are left untouched.
/// `sync_preferences` is device-local policy and always keeps the local value.
pub fn merge_from_download(local: &Settings, remote: &Settings) -> DownloadedSettings {
    let prefs = local.sync_preferences.clone();
    let mut out = local.clone();

    if prefs.includes(SettingsGroup::Ai) {
        ai_fields!(copy_present, remote, out);
    }
    if prefs.includes(SettingsGroup::Appearance) {
        appearance_fields!(copy_present, remote, out);
    }
    if prefs.includes(SettingsGroup::General) {
        general_fields!(copy_present, remote, out);
    }

    let mut language_changed = None;
    if prefs.includes(SettingsGroup::Language)
        && let Some(language) = &remote.language
    {
        if local.language.as_deref() != Some(language) {
            language_changed = Some(language.clone());
        }
        out.language = Some(language.clone());
    }

    out.sync_preferences = prefs;

    DownloadedSettings {
        settings: out,
        language_changed,
    }
}

/// Overlays every present field of `stored` onto `base`. Used at load time to
/// merge defaults under user-saved overrides.
pub fn overlay(base: Settings, stored: &Settings) -> Settings {
    let mut out = base;
    ai_fields!(copy_present, stored, out);
    appearance_fields!(copy_present, stored, out);
    general_fields!(copy_present, stored, out);
    if stored.language.is_some() {
        out.language = stored.language.clone();
    }
    if stored.audio_input_id.is_some() {
        out.audio_input_id = stored.audio_input_id.clone();
    }
    if stored.audio_output_id.is_some() {
        out.audio_output_id = stored.audio_output_id.clone();
    }
    out.sync_preferences = stored.sync_preferences.clone();
    out.extra.extend(stored.extra.clone());
    out
}
