use serde::{Deserialize, Serialize};

/// Application preference bag. Missing fields fall back to their defaults, so a
/// partial document imports as `{ ...defaults, ...imported }`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    // General
    pub theme: String,
    pub language: String,
    pub auto_save: bool,
    pub auto_save_interval: u32, // minutes
    pub startup_action: String,
    pub confirm_delete: bool,

    // Presentation
    pub default_transition: String,
    pub transition_duration: f64,
    pub cue_numbering: bool,
    pub auto_advance: bool,
    pub loop_presentation: bool,

    // Display
    pub primary_display: String,
    pub stage_display_enabled: bool,
    pub confidence_monitor_enabled: bool,
    pub network_streaming_enabled: bool,
    pub display_resolution: String,

    // Audio
    pub master_volume: u8,
    pub cue_volume: u8,
    pub background_volume: u8,
    pub audio_device: String,

    // Video
    pub video_quality: String,
    pub frame_rate: u32,
    pub video_codec: String,
    pub hardware_acceleration: bool,

    pub shortcuts: ShortcutSettings,

    // Network
    pub network_port: u16,
    pub multicast_enabled: bool,
    pub discovery_enabled: bool,

    // Accessibility
    pub high_contrast: bool,
    pub large_text: bool,
    pub screen_reader: bool,
    pub keyboard_navigation: bool,

    // Performance
    pub max_cache_size: u32, // MB
    pub preload_media: bool,
    pub low_power_mode: bool,

    // Backup
    pub auto_backup: bool,
    pub backup_interval: u32, // minutes
    pub backup_location: String,
    pub max_backups: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            language: "en".to_string(),
            auto_save: true,
            auto_save_interval: 5,
            startup_action: "last_presentation".to_string(),
            confirm_delete: true,

            default_transition: "fade".to_string(),
            transition_duration: 0.5,
            cue_numbering: true,
            auto_advance: false,
            loop_presentation: false,

            primary_display: "main".to_string(),
            stage_display_enabled: true,
            confidence_monitor_enabled: false,
            network_streaming_enabled: false,
            display_resolution: "1920x1080".to_string(),

            master_volume: 80,
            cue_volume: 70,
            background_volume: 50,
            audio_device: "default".to_string(),

            video_quality: "high".to_string(),
            frame_rate: 30,
            video_codec: "h264".to_string(),
            hardware_acceleration: true,

            shortcuts: ShortcutSettings::default(),

            network_port: 5004,
            multicast_enabled: false,
            discovery_enabled: true,

            high_contrast: false,
            large_text: false,
            screen_reader: false,
            keyboard_navigation: true,

            max_cache_size: 1024,
            preload_media: true,
            low_power_mode: false,

            auto_backup: true,
            backup_interval: 30,
            backup_location: "~/Documents/ProPresenter/Backups".to_string(),
            max_backups: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShortcutSettings {
    pub play_pause: String,
    pub next_cue: String,
    pub prev_cue: String,
    pub fullscreen: String,
    pub stage_display: String,
}

impl Default for ShortcutSettings {
    fn default() -> Self {
        Self {
            play_pause: "Space".to_string(),
            next_cue: "ArrowRight".to_string(),
            prev_cue: "ArrowLeft".to_string(),
            fullscreen: "F11".to_string(),
            stage_display: "S".to_string(),
        }
    }
}
