//! Upgrades for settings written by older clients.

use serde_json::{Map, Value};

const KEY_THEME: &str = "theme";
const KEY_THEMES: &str = "themes";
const KEY_NIGHT_THEME: &str = "nightTheme";
const KEY_BACKGROUND: &str = "background";

/// Derive `theme` from the deprecated `nightTheme` flag.
///
/// Returns `true` if `settings` changed.
pub(crate) fn derive_theme(settings: &mut Map<String, Value>) -> bool {
    if settings.contains_key(KEY_THEME) {
        return false;
    }
    let Some(night) = settings.get(KEY_NIGHT_THEME) else {
        return false;
    };

    let name = if night.as_bool().unwrap_or(false) {
        "night"
    } else {
        "day"
    };
    settings.insert(KEY_THEME.to_string(), Value::from(name));
    true
}

/// Build `themes` from the default list, carrying the deprecated lone
/// `background` over to the theme named by `theme`.
///
/// Returns `true` only if the background found a matching theme.
pub(crate) fn derive_themes(settings: &mut Map<String, Value>, default_themes: &Value) -> bool {
    if settings.contains_key(KEY_THEMES) {
        return false;
    }
    let background = match settings.get(KEY_BACKGROUND) {
        Some(bg) if !bg.is_null() => bg.clone(),
        _ => return false,
    };

    let mut themes = default_themes.clone();
    let current = settings
        .get(KEY_THEME)
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut attached = false;
    if let (Some(current), Value::Array(list)) = (current, &mut themes) {
        if let Some(theme) = list
            .iter_mut()
            .find(|t| t.get("name").and_then(Value::as_str) == Some(current.as_str()))
            .and_then(Value::as_object_mut)
        {
            theme.insert(KEY_BACKGROUND.to_string(), background);
            attached = true;
        }
    }

    settings.insert(KEY_THEMES.to_string(), themes);
    attached
}
