//! The signed-in dashboard: history sidebar, chat panel, health records and
//! the profile editor.

use axum::{
    Extension,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::AppState;
use crate::api::history::{history_service, records_service};
use crate::api::profile::load_profile;
use crate::auth::Session;
use crate::auth::gate::clear_tokens;
use crate::backend::ChatLogEntry;
use crate::chat::history::format_time_ago;
use crate::chat::{ChatSession, new_session_id};
use crate::error::AppError;
use crate::profile::{BLOOD_GROUPS, GENDERS, UserProfile};
use crate::theme::Theme;

use super::{escape_html, page};

pub const QUICK_PROMPTS: [&str; 4] = [
    "I have a headache",
    "Feeling fatigued lately",
    "How to improve my sleep?",
    "Tips for staying healthy",
];

const DISCLAIMER: &str = "<strong>Medical Disclaimer:</strong> This AI provides general health \
information only. Always consult a qualified healthcare professional for diagnosis and treatment.";

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    /// `records` shows the health records instead of the chat.
    #[serde(default)]
    pub view: Option<String>,
    /// Past session to show in the chat panel.
    #[serde(default)]
    pub session: Option<String>,
    /// Bypass the records cache.
    #[serde(default)]
    pub refresh: bool,
}

/// Records panel contents.
enum RecordsView {
    Loaded {
        messages: Vec<ChatLogEntry>,
        from_cache: bool,
    },
    Failed,
}

fn signed_out(jar: CookieJar) -> Response {
    (clear_tokens(jar), Redirect::to("/signin")).into_response()
}

/// GET / - Dashboard.
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    jar: CookieJar,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let theme = Theme::from_request(&jar, &headers);

    let sessions = match history_service(&state, &session)
        .fetch(&session.access_token)
        .await
    {
        Ok(sessions) => sessions,
        Err(AppError::Unauthorized) => return signed_out(jar),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load chat history");
            Vec::new()
        }
    };

    let profile = match load_profile(&state, &session).await {
        Ok(profile) => profile,
        Err(AppError::Unauthorized) => return signed_out(jar),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load profile");
            UserProfile::default()
        }
    };

    let panel = if query.view.as_deref() == Some("records") {
        let records = records_service(&state, &session.subject);
        let view = if query.refresh {
            match records.get(&session.access_token, true).await {
                Ok(result) => RecordsView::Loaded {
                    messages: result.messages,
                    from_cache: result.from_cache,
                },
                Err(AppError::Unauthorized) => return signed_out(jar),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load health records");
                    RecordsView::Failed
                }
            }
        } else {
            // Cached records render at once; the refresh keeps running and
            // updates the cache for the next visit.
            let refresh = records.get_with_background_refresh(&session.access_token);
            match refresh.cached {
                Some(messages) => RecordsView::Loaded {
                    messages,
                    from_cache: true,
                },
                None => match refresh.fresh.await {
                    Ok(Ok(messages)) => RecordsView::Loaded {
                        messages,
                        from_cache: false,
                    },
                    Ok(Err(AppError::Unauthorized)) => return signed_out(jar),
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Failed to load health records");
                        RecordsView::Failed
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Health records task failed");
                        RecordsView::Failed
                    }
                },
            }
        };
        records_panel(&view)
    } else {
        let selected = query
            .session
            .as_deref()
            .and_then(|id| sessions.iter().find(|s| s.id == id));
        chat_panel(selected)
    };

    let now = chrono::Utc::now().timestamp_millis();
    let body = format!(
        r#"<div class="app">
    {sidebar}
    <div class="main">
        {header}
        {panel}
    </div>
</div>
{dialog}
<script>{DASHBOARD_SCRIPT}</script>"#,
        sidebar = sidebar(&sessions, query.session.as_deref(), now),
        header = header_bar(&profile),
        dialog = profile_dialog(&profile),
    );

    page(StatusCode::OK, "Health Assistant", theme, &body)
}

fn sidebar(sessions: &[ChatSession], selected: Option<&str>, now_ms: i64) -> String {
    let items: String = if sessions.is_empty() {
        r#"<p class="muted">No chat history found</p>"#.to_string()
    } else {
        sessions
            .iter()
            .map(|s| {
                let current = if Some(s.id.as_str()) == selected {
                    r#" style="background:var(--sidebarActive)""#
                } else {
                    ""
                };
                format!(
                    r#"<div class="session-row" data-session-row="{id}">
            <a class="session" href="/?session={id}"{current}>
                <div>{title}</div>
                <div class="muted">{last} · {ago}</div>
            </a>
            <button class="ghost" type="button" title="Delete chat" data-delete="{id}">✕</button>
        </div>"#,
                    id = escape_html(&s.id),
                    title = escape_html(&s.title),
                    last = escape_html(&crate::chat::history::truncate_text(&s.last_message, 40)),
                    ago = format_time_ago(s.timestamp, now_ms),
                )
            })
            .collect()
    };

    format!(
        r#"<aside class="sidebar">
        <p><a class="button" href="/">+ New chat</a></p>
        <p><a href="/?view=records">Health records</a></p>
        <h3>History</h3>
        {items}
    </aside>"#
    )
}

fn header_bar(profile: &UserProfile) -> String {
    let name = if profile.full_name.is_empty() {
        "Profile".to_string()
    } else {
        escape_html(&profile.full_name)
    };
    format!(
        r#"<header class="top">
            <strong>Health Assistant</strong>
            <div>
                <button class="ghost" type="button" id="open-profile">{name}</button>
                <form method="post" action="/theme"><button class="ghost" type="submit">Toggle theme</button></form>
                <form method="post" action="/signout"><button class="ghost" type="submit">Sign out</button></form>
            </div>
        </header>"#
    )
}

fn chat_panel(selected: Option<&ChatSession>) -> String {
    // Sidebar ids only group past messages; follow-ups start a new conversation.
    let session_id = new_session_id();
    let history = match selected {
        Some(session) => {
            let bubbles: String = session
                .messages
                .iter()
                .map(|m| {
                    let sender = if m.is_user { "user" } else { "bot" };
                    let image = m.image_url.as_deref().map_or_else(String::new, |url| {
                        format!(r#"<img src="{}" alt="Uploaded image">"#, escape_html(url))
                    });
                    format!(
                        r#"<div class="bubble {sender}">{image}{}</div>"#,
                        escape_html(&m.message)
                    )
                })
                .collect();
            bubbles
        }
        None => r#"<div class="bubble bot">Hello! Describe your symptoms or ask a health question, and I'll do my best to help.</div>"#
            .to_string(),
    };

    let prompts: String = QUICK_PROMPTS
        .iter()
        .map(|p| format!(r#"<button type="button" data-prompt="{p}">{p}</button>"#, p = escape_html(p)))
        .collect();

    format!(
        r#"<section class="messages" id="messages" data-session-id="{session_id}">
            {history}
        </section>
        <div class="prompts">{prompts}</div>
        <form class="composer" id="composer">
            <textarea id="message" rows="2" placeholder="Describe your symptoms or ask a health question..."></textarea>
            <label class="button" for="image-input" style="margin:0">Image</label>
            <input id="image-input" type="file" accept="image/*" hidden>
            <button type="submit" id="send">Send</button>
        </form>
        <p class="muted disclaimer">{DISCLAIMER}</p>"#,
        session_id = escape_html(&session_id),
    )
}

fn records_panel(view: &RecordsView) -> String {
    let content = match view {
        RecordsView::Failed => {
            r#"<div class="alert">Could not load your health records. Please try again.</div>"#
                .to_string()
        }
        RecordsView::Loaded { messages, .. } if messages.is_empty() => {
            r#"<p class="muted">No chat history found</p>"#.to_string()
        }
        RecordsView::Loaded {
            messages,
            from_cache,
        } => {
            let rows: String = messages
                .iter()
                .rev()
                .map(|m| {
                    format!(
                        r#"<tr><td class="muted">{time}</td><td>{who}</td><td>{text}</td></tr>"#,
                        time = escape_html(&m.timestamp),
                        who = if m.is_user { "You" } else { "Assistant" },
                        text = escape_html(&m.message),
                    )
                })
                .collect();
            let source = if *from_cache {
                "Showing cached records."
            } else {
                "Showing latest records."
            };
            format!(
                r#"<p class="muted">{count} messages. {source}</p>
            <table class="records">{rows}</table>"#,
                count = messages.len(),
            )
        }
    };

    format!(
        r#"<section class="messages">
            <h2>Health records</h2>
            <p><a href="/?view=records&refresh=true">Refresh</a></p>
            {content}
        </section>"#
    )
}

fn options(values: &[&str], selected: &str, placeholder: &str) -> String {
    let mut html = format!(r#"<option value="">{placeholder}</option>"#);
    for value in values {
        let mark = if *value == selected { " selected" } else { "" };
        html.push_str(&format!(r#"<option value="{value}"{mark}>{value}</option>"#));
    }
    html
}

fn number(value: Option<impl ToString>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn profile_dialog(profile: &UserProfile) -> String {
    format!(
        r#"<dialog id="profile-dialog">
    <form id="profile-form" method="dialog">
        <h2>Edit profile</h2>
        <div class="alert" id="profile-alert" hidden></div>
        <label for="p-full_name">Full name</label>
        <input id="p-full_name" name="full_name" value="{full_name}" placeholder="Enter your full name">
        <div class="field-error" data-error-for="full_name"></div>
        <label for="p-email">Email</label>
        <input id="p-email" value="{email}" placeholder="Email cannot be changed" disabled>
        <label for="p-age">Age</label>
        <input id="p-age" name="age" type="number" value="{age}" placeholder="Enter your age">
        <div class="field-error" data-error-for="age"></div>
        <label for="p-gender">Gender</label>
        <select id="p-gender" name="gender">{genders}</select>
        <div class="field-error" data-error-for="gender"></div>
        <label for="p-height_cm">Height (cm)</label>
        <input id="p-height_cm" name="height_cm" type="number" step="0.1" value="{height}" placeholder="Enter height in cm">
        <div class="field-error" data-error-for="height_cm"></div>
        <label for="p-weight_kg">Weight (kg)</label>
        <input id="p-weight_kg" name="weight_kg" type="number" step="0.1" value="{weight}" placeholder="Enter weight in kg">
        <div class="field-error" data-error-for="weight_kg"></div>
        <label for="p-blood_group">Blood group</label>
        <select id="p-blood_group" name="blood_group">{blood_groups}</select>
        <div class="field-error" data-error-for="blood_group"></div>
        <label for="p-allergies">Allergies</label>
        <textarea id="p-allergies" name="allergies" rows="3" placeholder="Enter any allergies or medical conditions, or write 'None' if not applicable">{allergies}</textarea>
        <div class="field-error" data-error-for="allergies"></div>
        <p>
            <button type="submit" id="save-profile">Save</button>
            <button type="button" class="ghost" id="close-profile">Cancel</button>
        </p>
    </form>
</dialog>"#,
        full_name = escape_html(&profile.full_name),
        email = escape_html(&profile.email),
        age = number(profile.age),
        genders = options(&GENDERS, &profile.gender, "Select gender"),
        height = number(profile.height_cm),
        weight = number(profile.weight_kg),
        blood_groups = options(&BLOOD_GROUPS, &profile.blood_group, "Select blood group"),
        allergies = escape_html(&profile.allergies),
    )
}

const DASHBOARD_SCRIPT: &str = r#"
(() => {
  const APOLOGY = "I apologize, but I'm having trouble responding right now. Please try again.";
  const SESSION_EXPIRED = "Your session has expired. Please login again.";
  const SIGNIN_DELAY_MS = 3000;
  const MAX_IMAGE_BYTES = 5 * 1024 * 1024;
  const messages = document.getElementById("messages");
  const composer = document.getElementById("composer");
  let busy = false;

  function bubble(sender, text) {
    const el = document.createElement("div");
    el.className = "bubble " + sender;
    el.textContent = text;
    messages.appendChild(el);
    messages.scrollTop = messages.scrollHeight;
    return el;
  }

  async function sessionExpired(res, target) {
    const body = await res.json().catch(() => ({}));
    const text = body.error || SESSION_EXPIRED;
    if (target) target.textContent = text; else bubble("bot", text);
    setTimeout(() => { window.location.href = "/signin"; }, SIGNIN_DELAY_MS);
  }

  function handleFrame(frame, bot) {
    const line = frame.split("\n").find((l) => l.startsWith("data: "));
    if (!line) return;
    const evt = JSON.parse(line.slice(6));
    switch (evt.type) {
      case "stream.start": messages.dataset.sessionId = evt.data.session_id; break;
      case "message.delta": bot.textContent += evt.data.text; break;
      case "error": bot.textContent = evt.data.message; break;
      case "done": bot.textContent = evt.data.text; break;
    }
    messages.scrollTop = messages.scrollHeight;
  }

  async function send(text) {
    if (busy || !text.trim()) return;
    busy = true;
    bubble("user", text);
    const bot = bubble("bot", "");
    try {
      const res = await fetch("/api/chat", {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify({ message: text, session_id: messages.dataset.sessionId }),
      });
      if (res.status === 401) { await sessionExpired(res, bot); return; }
      if (!res.ok) {
        const err = await res.json().catch(() => ({}));
        bot.textContent = err.error || APOLOGY;
        return;
      }
      const reader = res.body.getReader();
      const decoder = new TextDecoder("utf-8");
      let buffer = "";
      for (;;) {
        const { done, value } = await reader.read();
        if (done) break;
        buffer += decoder.decode(value, { stream: true });
        let idx;
        while ((idx = buffer.indexOf("\n\n")) >= 0) {
          handleFrame(buffer.slice(0, idx), bot);
          buffer = buffer.slice(idx + 2);
        }
      }
    } catch (e) {
      bot.textContent = APOLOGY;
    } finally {
      busy = false;
    }
  }

  async function sendImage(file) {
    if (!file.type.startsWith("image/")) { alert("Please select an image file"); return; }
    if (file.size > MAX_IMAGE_BYTES) { alert("Image size should be less than 5MB"); return; }
    busy = true;
    const form = new FormData();
    form.append("image", file);
    const pending = bubble("bot", "Analyzing image...");
    try {
      const res = await fetch("/api/image", { method: "POST", body: form });
      if (res.status === 401) { await sessionExpired(res, pending); return; }
      const body = await res.json().catch(() => ({}));
      if (!res.ok) { pending.textContent = body.error || APOLOGY; return; }
      const img = document.createElement("img");
      img.src = body.image;
      img.alt = "Uploaded image";
      const mine = bubble("user", "");
      mine.appendChild(img);
      messages.insertBefore(mine, pending);
      pending.textContent = body.reply;
    } catch (e) {
      pending.textContent = APOLOGY;
    } finally {
      busy = false;
    }
  }

  if (composer) {
    const input = document.getElementById("message");
    composer.addEventListener("submit", (e) => {
      e.preventDefault();
      const text = input.value;
      input.value = "";
      send(text);
    });
    document.getElementById("image-input").addEventListener("change", (e) => {
      const file = e.target.files[0];
      e.target.value = "";
      if (file) sendImage(file);
    });
    document.querySelectorAll("[data-prompt]").forEach((b) =>
      b.addEventListener("click", () => send(b.dataset.prompt)));
  }

  document.querySelectorAll("[data-delete]").forEach((b) =>
    b.addEventListener("click", async () => {
      const id = b.dataset.delete;
      const res = await fetch("/api/history/" + encodeURIComponent(id), { method: "DELETE" });
      if (res.status === 401) { await sessionExpired(res, null); return; }
      if (res.ok) {
        const row = document.querySelector(`[data-session-row="${CSS.escape(id)}"]`);
        if (row) row.remove();
      }
    }));

  const dialog = document.getElementById("profile-dialog");
  const profileForm = document.getElementById("profile-form");
  document.getElementById("open-profile").addEventListener("click", () => dialog.showModal());
  document.getElementById("close-profile").addEventListener("click", () => dialog.close());
  profileForm.addEventListener("submit", async (e) => {
    e.preventDefault();
    const data = Object.fromEntries(new FormData(profileForm));
    for (const key of ["age", "height_cm", "weight_kg"]) {
      data[key] = data[key] === "" ? null : Number.parseFloat(data[key]);
    }
    profileForm.querySelectorAll("[data-error-for]").forEach((el) => { el.textContent = ""; });
    const alertBox = document.getElementById("profile-alert");
    alertBox.hidden = true;
    const res = await fetch("/api/profile", {
      method: "PUT",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify(data),
    });
    if (res.status === 401) {
      dialog.close();
      await sessionExpired(res, null);
      return;
    }
    const body = await res.json().catch(() => ({}));
    if (!res.ok) {
      alertBox.textContent = body.error || "Failed to update profile. Please try again.";
      alertBox.hidden = false;
      for (const [field, message] of Object.entries(body.fields || {})) {
        const el = profileForm.querySelector(`[data-error-for="${field}"]`);
        if (el) el.textContent = message;
      }
      return;
    }
    document.getElementById("open-profile").textContent = body.full_name || "Profile";
    dialog.close();
  });
})();
"#;
