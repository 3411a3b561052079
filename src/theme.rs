//! Light and dark colour palettes.
//!
//! The chosen theme is kept in a `theme` cookie. Without one, the
//! `Sec-CH-Prefers-Color-Scheme` client hint decides.

use std::fmt;
use std::str::FromStr;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

pub const THEME_COOKIE: &str = "theme";

const COLOR_SCHEME_HINT: &str = "sec-ch-prefers-color-scheme";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

const LIGHT: &[(&str, &str)] = &[
    ("primary", "#25D366"),
    ("primaryHover", "#1DA851"),
    ("primaryLight", "#25D36615"),
    ("secondary", "#00A884"),
    ("accent", "#10B981"),
    ("background", "#FAFAFA"),
    ("backgroundSecondary", "#F5F5F5"),
    ("surface", "#FFFFFF"),
    ("surfaceHover", "#F8F8F8"),
    ("textPrimary", "#1A1A1A"),
    ("textSecondary", "#525252"),
    ("textMuted", "#A3A3A3"),
    ("textLink", "#128C7E"),
    ("border", "#E5E5E5"),
    ("divider", "#EEEEEE"),
    ("success", "#10B981"),
    ("warning", "#F59E0B"),
    ("error", "#EF4444"),
    ("errorLight", "#EF444415"),
    ("info", "#00A884"),
    ("chatBackground", "#FFFFFF"),
    ("chatBubbleOwn", "#D1FAE5"),
    ("chatBubbleOther", "#F5F5F5"),
    ("chatInputBackground", "#FAFAFA"),
    ("chatInputBorder", "#E5E5E5"),
    ("sidebarBackground", "#F7F7F7"),
    ("sidebarHover", "#F0F0F0"),
    ("sidebarActive", "#E8E8E8"),
    ("overlay", "rgba(0, 0, 0, 0.45)"),
    ("modalBackground", "#FFFFFF"),
    ("gradientFrom", "#25D366"),
    ("gradientTo", "#10B981"),
    ("skeletonBase", "#F0F0F0"),
];

const DARK: &[(&str, &str)] = &[
    ("primary", "#128C7E"),
    ("primaryHover", "#0d6b5e"),
    ("primaryLight", "#128C7E33"),
    ("secondary", "#128C7E"),
    ("accent", "#128C7E"),
    ("background", "#0F0F0F"),
    ("backgroundSecondary", "#1A1A1A"),
    ("surface", "#1E1E1E"),
    ("surfaceHover", "#262626"),
    ("textPrimary", "#EDEDED"),
    ("textSecondary", "#B4B4B4"),
    ("textMuted", "#5A5A5A"),
    ("textLink", "#25D366"),
    ("border", "#2A2A2A"),
    ("divider", "#252525"),
    ("success", "#10B981"),
    ("warning", "#F59E0B"),
    ("error", "#EF4444"),
    ("errorLight", "#EF444433"),
    ("info", "#00A884"),
    ("chatBackground", "#0F0F0F"),
    ("chatBubbleOwn", "#10B981"),
    ("chatBubbleOther", "#1E1E1E"),
    ("chatInputBackground", "#1A1A1A"),
    ("chatInputBorder", "#2A2A2A"),
    ("sidebarBackground", "#141414"),
    ("sidebarHover", "#1E1E1E"),
    ("sidebarActive", "#262626"),
    ("overlay", "rgba(0, 0, 0, 0.85)"),
    ("modalBackground", "#1A1A1A"),
    ("gradientFrom", "#25D366"),
    ("gradientTo", "#10B981"),
    ("skeletonBase", "#1A1A1A"),
];

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }

    /// Named colours of this theme.
    pub fn palette(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Light => LIGHT,
            Self::Dark => DARK,
        }
    }

    /// Look up one colour by name.
    pub fn color(self, name: &str) -> Option<&'static str> {
        self.palette()
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }

    /// Palette as CSS custom properties on `:root`.
    pub fn css_variables(self) -> String {
        let mut css = String::from(":root {");
        for (name, value) in self.palette() {
            css.push_str(&format!(" --{name}: {value};"));
        }
        css.push_str(" }");
        css
    }

    /// Theme for a request: cookie first, then the colour-scheme hint.
    pub fn from_request(jar: &CookieJar, headers: &HeaderMap) -> Self {
        if let Some(theme) = jar
            .get(THEME_COOKIE)
            .and_then(|c| c.value().parse().ok())
        {
            return theme;
        }
        headers
            .get(COLOR_SCHEME_HINT)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim_matches('"').parse().ok())
            .unwrap_or_default()
    }

    /// Remember this theme in the browser.
    pub fn store(self, jar: CookieJar) -> CookieJar {
        jar.add(
            Cookie::build((THEME_COOKIE, self.as_str()))
                .path("/")
                .same_site(SameSite::Lax)
                .permanent()
                .build(),
        )
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}
