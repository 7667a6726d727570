//! The persisted application state.
//!
//! Each top-level field of [`ApplicationState`] is persisted as its own record
//! keyed by its camelCase name, so a change to one key never rewrites the rest.

use std::collections::BTreeMap;
use std::str::FromStr;

use parley_shared::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StateError;

/// Top-level keys in template order. The load pipeline reads them in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    AllDialogsLoaded,
    PinnedOrders,
    ContactsList,
    Updates,
    Filters,
    MaxSeenMsgId,
    StateCreatedTime,
    RecentEmoji,
    TopPeersCache,
    RecentSearch,
    Version,
    Build,
    AuthState,
    HiddenPinnedMessages,
    Settings,
    KeepSigned,
    ChatContextMenuHintWasShown,
    StateId,
}

impl StateKey {
    pub const ALL: [StateKey; 18] = [
        StateKey::AllDialogsLoaded,
        StateKey::PinnedOrders,
        StateKey::ContactsList,
        StateKey::Updates,
        StateKey::Filters,
        StateKey::MaxSeenMsgId,
        StateKey::StateCreatedTime,
        StateKey::RecentEmoji,
        StateKey::TopPeersCache,
        StateKey::RecentSearch,
        StateKey::Version,
        StateKey::Build,
        StateKey::AuthState,
        StateKey::HiddenPinnedMessages,
        StateKey::Settings,
        StateKey::KeepSigned,
        StateKey::ChatContextMenuHintWasShown,
        StateKey::StateId,
    ];

    /// Keys reset by the daily soft refresh.
    pub const REFRESH: [StateKey; 4] = [
        StateKey::ContactsList,
        StateKey::StateCreatedTime,
        StateKey::MaxSeenMsgId,
        StateKey::Filters,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::AllDialogsLoaded => "allDialogsLoaded",
            StateKey::PinnedOrders => "pinnedOrders",
            StateKey::ContactsList => "contactsList",
            StateKey::Updates => "updates",
            StateKey::Filters => "filters",
            StateKey::MaxSeenMsgId => "maxSeenMsgId",
            StateKey::StateCreatedTime => "stateCreatedTime",
            StateKey::RecentEmoji => "recentEmoji",
            StateKey::TopPeersCache => "topPeersCache",
            StateKey::RecentSearch => "recentSearch",
            StateKey::Version => "version",
            StateKey::Build => "build",
            StateKey::AuthState => "authState",
            StateKey::HiddenPinnedMessages => "hiddenPinnedMessages",
            StateKey::Settings => "settings",
            StateKey::KeepSigned => "keepSigned",
            StateKey::ChatContextMenuHintWasShown => "chatContextMenuHintWasShown",
            StateKey::StateId => "stateId",
        }
    }
}

impl FromStr for StateKey {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| StateError::UnknownKey(s.to_string()))
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    /// Folder id -> whether every dialog of the folder has been fetched.
    pub all_dialogs_loaded: BTreeMap<i32, bool>,
    /// Folder id -> pinned peers in display order.
    pub pinned_orders: BTreeMap<i32, Vec<PeerId>>,
    pub contacts_list: Vec<PeerId>,
    pub updates: UpdatesCursor,
    /// Filter id -> filter definition (opaque at this layer).
    pub filters: BTreeMap<i32, Value>,
    pub max_seen_msg_id: i64,
    /// Unix millis; drives the daily soft refresh.
    pub state_created_time: i64,
    pub recent_emoji: Vec<String>,
    /// Category (`correspondents`, `bots_inline`, ...) -> cached top peers.
    pub top_peers_cache: BTreeMap<String, TopPeersEntry>,
    pub recent_search: Vec<PeerId>,
    pub version: String,
    pub build: u32,
    pub auth_state: AuthState,
    /// Conversation -> id of the pinned message the user hid.
    pub hidden_pinned_messages: BTreeMap<PeerId, i64>,
    pub settings: Settings,
    pub keep_signed: bool,
    pub chat_context_menu_hint_was_shown: bool,
    /// Random per-install marker; a mismatch with the session store means
    /// the state was written by another session.
    pub state_id: u32,
}

/// Update sequence cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatesCursor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPeersEntry {
    pub peers: Vec<TopPeer>,
    pub cached_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPeer {
    pub id: PeerId,
    pub rating: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_")]
pub enum AuthState {
    #[serde(rename = "authStateSignIn")]
    SignIn,
    #[serde(rename = "authStateSignQr")]
    SignQr,
    #[serde(rename = "authStateAuthCode")]
    AuthCode,
    #[serde(rename = "authStatePassword")]
    Password,
    #[serde(rename = "authStateSignUp")]
    SignUp,
    #[serde(rename = "authStateSignedIn")]
    SignedIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub messages_text_size: u32,
    pub distance_unit: DistanceUnit,
    pub send_shortcut: SendShortcut,
    pub animations_enabled: bool,
    pub auto_download: AutoDownload,
    pub auto_play: AutoPlay,
    pub stickers: StickerSettings,
    pub emoji: EmojiSettings,
    /// Deprecated: single background from before per-theme backgrounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
    pub themes: Vec<Theme>,
    pub theme: ThemeName,
    pub notifications: NotificationSettings,
    /// Deprecated: replaced by `theme`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub night_theme: Option<bool>,
    pub time_format: TimeFormat,
    /// Fields this build does not know, kept so a rewrite does not drop them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    pub fn theme_by_name(&self, name: ThemeName) -> Option<&Theme> {
        self.themes.iter().find(|theme| theme.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Kilometers,
    Miles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SendShortcut {
    Enter,
    CtrlEnter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    H12,
    H23,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDownload {
    pub contacts: bool,
    pub private: bool,
    pub groups: bool,
    pub channels: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoPlay {
    pub gifs: bool,
    pub videos: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerSettings {
    pub suggest: bool,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiSettings {
    pub suggest: bool,
    pub big: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub sound: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeName {
    Day,
    Night,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub name: ThemeName,
    pub background: Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundKind {
    Color,
    Image,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Background {
    #[serde(rename = "type")]
    pub kind: BackgroundKind,
    pub blur: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlightning_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}
