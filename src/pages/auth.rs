//! Sign-in, sign-up and sign-out.

use axum::{
    Form,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use validator::Validate;

use crate::AppState;
use crate::api::history::records_service;
use crate::auth::StoredTokens;
use crate::auth::gate::{clear_tokens, store_tokens};
use crate::auth::token::token_subject;
use crate::error::AppError;
use crate::profile::{GENDERS, SigninForm, SignupForm};
use crate::theme::Theme;

use super::{escape_html, page};

const UNEXPECTED: &str = "An unexpected error occurred.";

/// User-facing message and page status for a failed form submission.
///
/// Of several invalid fields, the one earliest in `order` is reported.
fn failure(err: &AppError, order: &[&str]) -> (StatusCode, String) {
    match err {
        AppError::Validation(fields) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            order
                .iter()
                .find_map(|name| fields.get(*name))
                .or_else(|| fields.values().next())
                .cloned()
                .unwrap_or_default(),
        ),
        AppError::Api { status, message } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
            message.clone(),
        ),
        other => (other.status_code(), UNEXPECTED.to_string()),
    }
}

fn alert(error: Option<&str>) -> String {
    error.map_or_else(String::new, |e| {
        format!(r#"<div class="alert" role="alert">{}</div>"#, escape_html(e))
    })
}

fn theme_button() -> &'static str {
    r#"<form method="post" action="/theme" style="text-align:right"><button class="ghost" type="submit">Toggle theme</button></form>"#
}

fn signin_html(email: &str, error: Option<&str>) -> String {
    format!(
        r#"<main class="auth">
    {toggle}
    <div class="card">
        <h1>Sign in</h1>
        {alert}
        <form method="post" action="/signin">
            <label for="email">Email</label>
            <input id="email" name="email" type="email" value="{email}" placeholder="Enter your email" autocomplete="email">
            <label for="password">Password</label>
            <input id="password" name="password" type="password" placeholder="Create a password" autocomplete="current-password">
            <p><button type="submit">Sign in</button></p>
        </form>
        <p class="muted">No account yet? <a href="/signup">Create one</a></p>
    </div>
</main>"#,
        toggle = theme_button(),
        alert = alert(error),
        email = escape_html(email),
    )
}

/// GET /signin
pub async fn signin_page(jar: CookieJar, headers: HeaderMap) -> Response {
    let theme = Theme::from_request(&jar, &headers);
    page(StatusCode::OK, "Sign in", theme, &signin_html("", None))
}

/// POST /signin - Exchange credentials for the token cookies.
pub async fn signin_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Form(form): Form<SigninForm>,
) -> Response {
    let theme = Theme::from_request(&jar, &headers);
    let render = |err: AppError| {
        let (status, message) = failure(&err, SigninForm::FIELDS);
        page(status, "Sign in", theme, &signin_html(&form.email, Some(&message)))
    };

    if let Err(e) = form.validate() {
        return render(e.into());
    }

    let pair = match state
        .api
        .auth()
        .obtain_token(form.email.trim(), &form.password)
        .await
    {
        Ok(pair) => pair,
        Err(e) => {
            tracing::info!(error = %e, "Sign-in rejected");
            return render(e);
        }
    };

    let Some(subject) = token_subject(&pair.access) else {
        tracing::warn!("Backend issued an access token without a subject");
        return render(AppError::Api {
            status: StatusCode::BAD_GATEWAY.as_u16(),
            message: "Signin failed. Please try again.".to_string(),
        });
    };
    tracing::info!(name: "auth.signed_in", subject = %subject, "User signed in");

    // Warm the records cache while the dashboard loads.
    let records = records_service(&state, &subject);
    let access = pair.access.clone();
    tokio::spawn(async move { records.prefetch(&access).await });

    let tokens = StoredTokens::new(pair.access, pair.refresh);
    let jar = store_tokens(jar, &tokens, state.config.auth.secure_cookies);
    (jar, Redirect::to("/")).into_response()
}

fn signup_html(form: &SignupForm, error: Option<&str>) -> String {
    let genders: String = GENDERS
        .iter()
        .map(|g| {
            let selected = if *g == form.gender { " selected" } else { "" };
            format!(r#"<option value="{g}"{selected}>{g}</option>"#)
        })
        .collect();

    format!(
        r#"<main class="auth">
    {toggle}
    <div class="card">
        <h1>Create Account</h1>
        {alert}
        <form method="post" action="/signup">
            <label for="username">Name</label>
            <input id="username" name="username" value="{username}" placeholder="Enter your name">
            <label for="email">Email</label>
            <input id="email" name="email" type="email" value="{email}" placeholder="Enter your email">
            <label for="password">Password</label>
            <input id="password" name="password" type="password" placeholder="Create a password">
            <label for="age">Age</label>
            <input id="age" name="age" type="number" min="1" max="150" value="{age}" placeholder="Enter your age">
            <label for="gender">Gender</label>
            <select id="gender" name="gender">
                <option value="">-- Select Gender --</option>
                {genders}
            </select>
            <label for="height_cm">Height (cm)</label>
            <input id="height_cm" name="height_cm" type="number" step="0.1" value="{height}" placeholder="Height in cm">
            <label for="weight_kg">Weight (kg)</label>
            <input id="weight_kg" name="weight_kg" type="number" step="0.1" value="{weight}" placeholder="Weight in kg">
            <label for="blood_group">Blood group</label>
            <input id="blood_group" name="blood_group" value="{blood_group}" placeholder="e.g., A+">
            <label for="allergies">Allergies</label>
            <textarea id="allergies" name="allergies" rows="3" placeholder="List any allergies you have (optional)">{allergies}</textarea>
            <p><button type="submit">Create Account</button></p>
        </form>
        <p class="muted">Already registered? <a href="/signin">Sign in</a></p>
    </div>
</main>"#,
        toggle = theme_button(),
        alert = alert(error),
        username = escape_html(&form.username),
        email = escape_html(&form.email),
        age = escape_html(&form.age),
        height = escape_html(&form.height_cm),
        weight = escape_html(&form.weight_kg),
        blood_group = escape_html(&form.blood_group),
        allergies = escape_html(&form.allergies),
    )
}

/// GET /signup
pub async fn signup_page(jar: CookieJar, headers: HeaderMap) -> Response {
    let theme = Theme::from_request(&jar, &headers);
    page(
        StatusCode::OK,
        "Create Account",
        theme,
        &signup_html(&SignupForm::default(), None),
    )
}

/// POST /signup - Register, then send the user to sign in.
pub async fn signup_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Form(form): Form<SignupForm>,
) -> Response {
    let theme = Theme::from_request(&jar, &headers);
    let render = |err: AppError, form: &SignupForm| {
        let (status, message) = failure(&err, SignupForm::FIELDS);
        page(status, "Create Account", theme, &signup_html(form, Some(&message)))
    };

    let request = match form.clone().into_request() {
        Ok(request) => request,
        Err(e) => return render(e, &form),
    };

    match state.api.auth().register(&request).await {
        Ok(()) => {
            tracing::info!(name: "auth.registered", "Account created");
            Redirect::to("/signin").into_response()
        }
        Err(e) => {
            tracing::info!(error = %e, "Sign-up rejected");
            render(e, &form)
        }
    }
}

/// POST /signout - Drop the token cookies.
pub async fn signout(jar: CookieJar) -> (CookieJar, Redirect) {
    tracing::info!(name: "auth.signed_out", "User signed out");
    (clear_tokens(jar), Redirect::to("/signin"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        let (status, message) = failure(&AppError::Api {
            status: 401,
            message: "No active account found".into(),
        }, &[]);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(message, "No active account found");

        let (status, message) = failure(&AppError::field("email", "Please enter your email"), SigninForm::FIELDS);
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(message, "Please enter your email");

        let (_, message) = failure(&AppError::BadRequest("x".into()), &[]);
        assert_eq!(message, UNEXPECTED);
    }

    #[test]
    fn test_signup_reports_first_field_in_form_order() {
        let err = SignupForm::default().into_request().unwrap_err();
        let (_, message) = failure(&err, SignupForm::FIELDS);
        assert_eq!(message, "Please enter your name");

        let form = SignupForm {
            username: "ada".into(),
            email: "ada@example.com".into(),
            ..Default::default()
        };
        let (_, message) = failure(&form.into_request().unwrap_err(), SignupForm::FIELDS);
        assert_eq!(message, "Please create a password");
    }

    #[test]
    fn test_signup_form_keeps_entered_values() {
        let form = SignupForm {
            username: "<ada>".into(),
            gender: "Other".into(),
            ..Default::default()
        };
        let html = signup_html(&form, Some("Please enter your email"));
        assert!(html.contains(r#"value="&lt;ada&gt;""#));
        assert!(html.contains(r#"<option value="Other" selected>"#));
        assert!(html.contains("Please enter your email"));
    }
}
