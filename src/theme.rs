use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

use crate::{
    event::UiEvent,
    storage::{LocalStore, keys},
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    #[default]
    Dark,
}

impl ThemeMode {
    pub fn toggled(self) -> Self {
        match self {
            ThemeMode::Light => ThemeMode::Dark,
            ThemeMode::Dark => ThemeMode::Light,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColorSet {
    pub main: String,
    pub light: String,
    pub dark: String,
    pub contrast_text: String,
}

impl ColorSet {
    fn new(main: &str, light: &str, dark: &str, contrast_text: &str) -> Self {
        Self {
            main: main.to_string(),
            light: light.to_string(),
            dark: dark.to_string(),
            contrast_text: contrast_text.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Palette {
    pub mode: ThemeMode,
    pub primary: ColorSet,
    pub secondary: ColorSet,
    pub success: ColorSet,
    pub error: ColorSet,
    pub warning: ColorSet,
    pub info: ColorSet,
    pub background: String,
    pub paper: String,
    pub paper_elevated: String,
    pub text_primary: String,
    pub text_secondary: String,
    pub text_disabled: String,
    pub divider: String,
}

impl Palette {
    pub fn for_mode(mode: ThemeMode) -> Self {
        let (background, paper, paper_elevated, text_primary, text_secondary, text_disabled, divider) = match mode {
            ThemeMode::Dark => ("#0E0E10", "#1F1F23", "#26262C", "#EFEFF1", "#ADADB8", "#7D7D8A", "#2D2D35"),
            ThemeMode::Light => ("#FFFFFF", "#F7F7F8", "#EFEFF1", "#0E0E10", "#53535F", "#ADADB8", "#E5E5EA"),
        };

        Self {
            mode,
            primary: ColorSet::new("#9147FF", "#B07AFF", "#7B2CFF", "#FFFFFF"),
            secondary: ColorSet::new("#00C6FF", "#5CDBFF", "#0099CC", "#0A0A0A"),
            success: ColorSet::new("#00B36B", "#33C285", "#008F5A", "#FFFFFF"),
            error: ColorSet::new("#FF4D4D", "#FF7070", "#E53E3E", "#FFFFFF"),
            warning: ColorSet::new("#FFB84D", "#FFC670", "#E69A2E", "#0A0A0A"),
            info: ColorSet::new("#4D9EFF", "#70B1FF", "#2D7BFF", "#FFFFFF"),
            background: background.to_string(),
            paper: paper.to_string(),
            paper_elevated: paper_elevated.to_string(),
            text_primary: text_primary.to_string(),
            text_secondary: text_secondary.to_string(),
            text_disabled: text_disabled.to_string(),
            divider: divider.to_string(),
        }
    }
}

/// Preset colour schemes for the live output.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrandTheme {
    #[default]
    Default,
    Corporate,
    Modern,
    Minimal,
    Vibrant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BrandColors {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
    pub accent_secondary: String,
    pub featured: String,
    pub text_primary: String,
    pub text_secondary: String,
}

impl BrandTheme {
    pub fn colors(self) -> BrandColors {
        let mut colors = BrandColors {
            primary: "#1a1a1a".to_string(),
            secondary: "#252526".to_string(),
            accent: "#81c784".to_string(),
            accent_secondary: "#64b5f6".to_string(),
            featured: "#ff9800".to_string(),
            text_primary: "#ffffff".to_string(),
            text_secondary: "#c0c0c0".to_string(),
        };
        let set = |slot: &mut String, value: &str| *slot = value.to_string();
        match self {
            BrandTheme::Default => {}
            BrandTheme::Corporate => {
                set(&mut colors.accent, "#0d47a1");
                set(&mut colors.accent_secondary, "#1976d2");
                set(&mut colors.featured, "#ffd600");
            }
            BrandTheme::Modern => {
                set(&mut colors.accent, "#00bcd4");
                set(&mut colors.accent_secondary, "#009688");
                set(&mut colors.featured, "#ff5722");
            }
            BrandTheme::Minimal => {
                set(&mut colors.primary, "#f5f5f5");
                set(&mut colors.secondary, "#e0e0e0");
                set(&mut colors.accent, "#1976d2");
                set(&mut colors.text_primary, "#212121");
                set(&mut colors.text_secondary, "#666666");
            }
            BrandTheme::Vibrant => {
                set(&mut colors.accent, "#ff6b6b");
                set(&mut colors.accent_secondary, "#4ecdc4");
                set(&mut colors.featured, "#ffd93d");
            }
        }
        colors
    }
}

#[derive(Clone)]
pub struct ThemeManager {
    store: LocalStore,
    mode: Arc<RwLock<ThemeMode>>,
    event_tx: broadcast::Sender<UiEvent>,
}

impl ThemeManager {
    pub fn new(store: LocalStore, event_tx: broadcast::Sender<UiEvent>) -> Self {
        Self {
            store,
            mode: Arc::new(RwLock::new(ThemeMode::default())),
            event_tx,
        }
    }

    pub async fn load(&self) {
        let mode = self.store.get::<ThemeMode>(keys::THEME).await.unwrap_or_default();
        *self.mode.write().await = mode;
    }

    pub async fn mode(&self) -> ThemeMode {
        *self.mode.read().await
    }

    pub async fn palette(&self) -> Palette {
        Palette::for_mode(self.mode().await)
    }

    pub async fn toggle(&self) -> Result<ThemeMode, anyhow::Error> {
        let next = self.mode().await.toggled();
        self.set_mode(next).await?;
        Ok(next)
    }

    pub async fn set_mode(&self, mode: ThemeMode) -> Result<(), anyhow::Error> {
        self.store.set(keys::THEME, &mode).await?;
        *self.mode.write().await = mode;
        log::info!("Theme set to {:?}", mode);
        self.emit(UiEvent::ThemeChanged { mode });
        Ok(())
    }

    pub async fn output_theme(&self) -> BrandTheme {
        self.store.get(keys::OUTPUT_THEME).await.unwrap_or_default()
    }

    /// Stores the preset name and its resolved colours for the output window.
    pub async fn apply_output_theme(&self, theme: BrandTheme) -> Result<BrandColors, anyhow::Error> {
        let colors = theme.colors();
        self.store.set(keys::BRAND_THEME, &colors).await?;
        self.store.set(keys::OUTPUT_THEME, &theme).await?;
        log::info!("Output theme set to {:?}", theme);
        self.emit(UiEvent::OutputThemeChanged { theme });
        Ok(colors)
    }

    fn emit(&self, event: UiEvent) {
        if self.event_tx.send(event).is_err() {
            log::trace!("No UI clients are listening to theme events.");
        }
    }
}
