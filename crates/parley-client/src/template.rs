//! The canonical default state.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::StateError;
use crate::state::{
    ApplicationState, AuthState, AutoDownload, AutoPlay, Background, BackgroundKind,
    DistanceUnit, EmojiSettings, NotificationSettings, SendShortcut, Settings, StateKey,
    StickerSettings, Theme, ThemeName, TimeFormat, UpdatesCursor,
};

const DAY_BACKGROUND_SLUG: &str = "ByxGo2lrMFAIAAAAmkJxZabh8eM";
const DAY_HIGHLIGHT: &str = "hsla(85.5319, 36.9171%, 40.402%, 0.4)";
const NIGHT_COLOR: &str = "#0f0f0f";
const NIGHT_HIGHLIGHT: &str = "hsla(0, 0%, 3.82353%, 0.4)";

/// Default state for this process, built once.
///
/// Holds the typed value and its JSON form; the load pipeline works on the
/// JSON form. Every default handed out is an owned copy.
#[derive(Debug, Clone)]
pub struct StateTemplate {
    state: ApplicationState,
    document: Map<String, Value>,
}

impl StateTemplate {
    /// Template stamped with the current time and a fresh random `stateId`.
    pub fn new(config: &ClientConfig) -> Result<Self, StateError> {
        Self::build(
            config,
            chrono::Utc::now().timestamp_millis(),
            rand::random::<u32>(),
        )
    }

    pub fn build(config: &ClientConfig, created_at_ms: i64, state_id: u32) -> Result<Self, StateError> {
        let state = ApplicationState {
            all_dialogs_loaded: BTreeMap::new(),
            pinned_orders: BTreeMap::new(),
            contacts_list: Vec::new(),
            updates: UpdatesCursor::default(),
            filters: BTreeMap::new(),
            max_seen_msg_id: 0,
            state_created_time: created_at_ms,
            recent_emoji: Vec::new(),
            top_peers_cache: BTreeMap::new(),
            recent_search: Vec::new(),
            version: config.app_version.clone(),
            build: config.build,
            auth_state: if config.mobile {
                AuthState::SignIn
            } else {
                AuthState::SignQr
            },
            hidden_pinned_messages: BTreeMap::new(),
            settings: default_settings(config.time_format),
            keep_signed: true,
            chat_context_menu_hint_was_shown: false,
            state_id,
        };

        let document = match serde_json::to_value(&state)? {
            Value::Object(map) => map,
            other => {
                return Err(StateError::InvalidPath {
                    path: String::new(),
                    reason: format!("template serialized to a non-object: {other}"),
                })
            }
        };

        Ok(Self { state, document })
    }

    pub fn state(&self) -> &ApplicationState {
        &self.state
    }

    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Owned copy of the default for one top-level key.
    pub fn default_value(&self, key: StateKey) -> Value {
        self.document
            .get(key.as_str())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Owned copy of the default theme list.
    pub fn default_themes(&self) -> Vec<Theme> {
        self.state.settings.themes.clone()
    }
}

pub fn default_settings(time_format: TimeFormat) -> Settings {
    Settings {
        messages_text_size: 16,
        distance_unit: DistanceUnit::Kilometers,
        send_shortcut: SendShortcut::Enter,
        animations_enabled: true,
        auto_download: AutoDownload {
            contacts: true,
            private: true,
            groups: true,
            channels: true,
        },
        auto_play: AutoPlay {
            gifs: true,
            videos: true,
        },
        stickers: StickerSettings {
            suggest: true,
            loop_playback: true,
        },
        emoji: EmojiSettings {
            suggest: true,
            big: true,
        },
        background: None,
        themes: default_themes(),
        theme: ThemeName::System,
        notifications: NotificationSettings { sound: false },
        night_theme: None,
        time_format,
        extra: Map::new(),
    }
}

fn default_themes() -> Vec<Theme> {
    vec![
        Theme {
            name: ThemeName::Day,
            background: Background {
                kind: BackgroundKind::Image,
                blur: false,
                highlightning_color: Some(DAY_HIGHLIGHT.to_string()),
                color: None,
                slug: Some(DAY_BACKGROUND_SLUG.to_string()),
            },
        },
        Theme {
            name: ThemeName::Night,
            background: Background {
                kind: BackgroundKind::Color,
                blur: false,
                highlightning_color: Some(NIGHT_HIGHLIGHT.to_string()),
                color: Some(NIGHT_COLOR.to_string()),
                slug: None,
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_has_every_key() {
        let template = StateTemplate::build(&ClientConfig::default(), 1_000, 7).unwrap();
        for key in StateKey::ALL {
            assert!(
                template.document().contains_key(key.as_str()),
                "missing {key}"
            );
        }
        assert_eq!(template.default_value(StateKey::StateId), Value::from(7));
        assert_eq!(template.default_value(StateKey::StateCreatedTime), Value::from(1_000));
    }

    #[test]
    fn test_auth_default_follows_platform() {
        let desktop = StateTemplate::build(&ClientConfig::default(), 0, 1).unwrap();
        assert_eq!(desktop.state().auth_state, AuthState::SignQr);

        let mobile = StateTemplate::build(
            &ClientConfig {
                mobile: true,
                ..ClientConfig::default()
            },
            0,
            1,
        )
        .unwrap();
        assert_eq!(mobile.state().auth_state, AuthState::SignIn);
    }

    #[test]
    fn test_default_themes() {
        let template = StateTemplate::new(&ClientConfig::default()).unwrap();
        let settings = &template.state().settings;
        assert_eq!(settings.theme, ThemeName::System);
        assert!(settings.theme_by_name(ThemeName::Day).is_some());
        assert_eq!(
            settings
                .theme_by_name(ThemeName::Night)
                .and_then(|t| t.background.color.as_deref()),
            Some(NIGHT_COLOR)
        );
        assert!(settings.background.is_none());
    }

    #[test]
    fn test_default_value_is_a_copy() {
        let template = StateTemplate::build(&ClientConfig::default(), 0, 1).unwrap();
        let mut settings = template.default_value(StateKey::Settings);
        settings["messagesTextSize"] = Value::from(99);
        assert_eq!(
            template.document()["settings"]["messagesTextSize"],
            Value::from(16)
        );
    }
}
