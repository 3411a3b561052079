//! Server-rendered HTML pages.
//!
//! Pages are plain HTML strings around a shared shell; the dashboard adds a
//! small inline script that talks to the JSON/SSE API.

pub mod auth;
pub mod dashboard;

use axum::{
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::theme::Theme;

const BASE_CSS: &str = r#"
* { box-sizing: border-box; }
body { margin: 0; font-family: system-ui, -apple-system, "Segoe UI", sans-serif;
  background: var(--background); color: var(--textPrimary); }
a { color: var(--textLink); }
button, .button { cursor: pointer; border: 0; border-radius: 12px; padding: 0.6rem 1rem;
  background: var(--primary); color: #fff; font: inherit; text-decoration: none; }
button:hover, .button:hover { background: var(--primaryHover); }
button.ghost { background: transparent; color: var(--textSecondary); }
button.ghost:hover { background: var(--surfaceHover); }
input, select, textarea { width: 100%; padding: 0.6rem 0.8rem; border-radius: 10px;
  border: 1px solid var(--chatInputBorder); background: var(--chatInputBackground);
  color: var(--textPrimary); font: inherit; }
label { display: block; margin: 0.8rem 0 0.3rem; font-size: 0.9rem; color: var(--textSecondary); }
.card { background: var(--surface); border: 1px solid var(--border); border-radius: 16px; padding: 1.5rem; }
.auth { max-width: 420px; margin: 6vh auto; }
.alert { padding: 0.7rem 1rem; border-radius: 10px; background: var(--errorLight);
  border-left: 3px solid var(--error); margin-bottom: 1rem; }
.field-error { color: var(--error); font-size: 0.85rem; margin-top: 0.3rem; }
.muted { color: var(--textMuted); font-size: 0.85rem; }
.app { display: grid; grid-template-columns: 280px 1fr; height: 100vh; }
.sidebar { background: var(--sidebarBackground); border-right: 1px solid var(--divider);
  padding: 1rem; overflow-y: auto; }
.sidebar a.session { display: block; padding: 0.6rem; border-radius: 10px; color: var(--textPrimary);
  text-decoration: none; }
.sidebar a.session:hover { background: var(--sidebarHover); }
.sidebar .session-row { display: flex; align-items: center; gap: 0.3rem; }
.main { display: flex; flex-direction: column; min-width: 0; }
header.top { display: flex; justify-content: space-between; align-items: center;
  padding: 0.8rem 1.2rem; border-bottom: 1px solid var(--divider); background: var(--surface); }
header.top form { display: inline; }
.messages { flex: 1; overflow-y: auto; padding: 1.2rem; background: var(--chatBackground); }
.bubble { max-width: 70%; padding: 0.7rem 1rem; border-radius: 16px; margin: 0.4rem 0;
  white-space: pre-wrap; }
.bubble.user { margin-left: auto; background: var(--chatBubbleOwn); }
.bubble.bot { background: var(--chatBubbleOther); }
.bubble img { max-width: 100%; border-radius: 10px; }
.prompts { display: flex; flex-wrap: wrap; gap: 0.5rem; padding: 0 1.2rem 0.6rem; }
.prompts button { background: var(--primaryLight); color: var(--textPrimary); }
.composer { display: flex; gap: 0.5rem; padding: 0.8rem 1.2rem; border-top: 1px solid var(--divider); }
.disclaimer { padding: 0 1.2rem 0.8rem; }
dialog { border: 1px solid var(--border); border-radius: 16px; background: var(--modalBackground);
  color: var(--textPrimary); width: min(640px, 95vw); }
dialog::backdrop { background: var(--overlay); }
table.records { width: 100%; border-collapse: collapse; }
table.records td { padding: 0.5rem; border-bottom: 1px solid var(--divider); vertical-align: top; }
"#;

/// Escape text for inclusion in HTML content or attribute values.
pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Generate the HTML shell around `content`.
pub fn html_shell(title: &str, theme: Theme, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en" data-theme="{theme}">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="AI health assistant">
    <title>{title} - Health Assistant</title>
    <style>{vars}{BASE_CSS}</style>
</head>
<body>
{content}
</body>
</html>"#,
        title = escape_html(title),
        vars = theme.css_variables(),
    )
}

/// Render a page with the given status.
pub fn page(status: StatusCode, title: &str, theme: Theme, content: &str) -> Response {
    (status, Html(html_shell(title, theme, content))).into_response()
}

/// POST /theme - Flip between light and dark, then go back.
pub async fn toggle_theme(jar: CookieJar, headers: HeaderMap) -> (CookieJar, Redirect) {
    let theme = Theme::from_request(&jar, &headers).toggle();
    tracing::debug!(theme = %theme, "Theme toggled");

    // Only same-site paths are followed back.
    let back = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(|r| url::Url::parse(r).ok())
        .map(|u| match u.query() {
            Some(q) => format!("{}?{q}", u.path()),
            None => u.path().to_string(),
        })
        .unwrap_or_else(|| "/".to_string());

    (theme.store(jar), Redirect::to(&back))
}
