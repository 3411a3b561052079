//! User profile and the account forms.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::backend::RegisterRequest;
use crate::error::Result;

pub const GENDERS: [&str; 4] = ["Male", "Female", "Other", "Prefer not to say"];

pub const BLOOD_GROUPS: [&str; 8] = ["O+", "O-", "A+", "A-", "B+", "B-", "AB+", "AB-"];

/// Health profile as returned by `GET /user/profile/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub email: String,
    pub full_name: String,
    pub age: Option<u32>,
    pub gender: String,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub blood_group: String,
    pub allergies: String,
}

impl UserProfile {
    /// The editable part of the profile.
    pub fn to_update(&self) -> ProfileUpdate {
        ProfileUpdate {
            full_name: self.full_name.clone(),
            age: self.age,
            gender: self.gender.clone(),
            height_cm: self.height_cm,
            weight_kg: self.weight_kg,
            blood_group: self.blood_group.clone(),
            allergies: self.allergies.clone(),
        }
    }
}

/// Body of `PUT /user/profile/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,

    #[validate(
        required(message = "Age is required and must be between 1 and 150"),
        range(min = 1, max = 150, message = "Age is required and must be between 1 and 150")
    )]
    pub age: Option<u32>,

    #[validate(length(min = 1, message = "Gender is required"))]
    pub gender: String,

    #[validate(
        required(message = "Height is required and must be between 1 and 300 cm"),
        range(
            exclusive_min = 0.0,
            max = 300.0,
            message = "Height is required and must be between 1 and 300 cm"
        )
    )]
    pub height_cm: Option<f64>,

    #[validate(
        required(message = "Weight is required and must be between 1 and 500 kg"),
        range(
            exclusive_min = 0.0,
            max = 500.0,
            message = "Weight is required and must be between 1 and 500 kg"
        )
    )]
    pub weight_kg: Option<f64>,

    #[validate(length(min = 1, message = "Blood group is required"))]
    pub blood_group: String,

    #[validate(length(
        min = 1,
        message = "Please enter any allergies or write 'None' if not applicable"
    ))]
    pub allergies: String,
}

impl ProfileUpdate {
    /// Trim text fields and validate.
    ///
    /// Whitespace-only text counts as missing.
    pub fn cleaned(mut self) -> Result<Self> {
        for field in [
            &mut self.full_name,
            &mut self.gender,
            &mut self.blood_group,
            &mut self.allergies,
        ] {
            *field = field.trim().to_string();
        }
        self.validate()?;
        Ok(self)
    }
}

/// Sign-in form.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SigninForm {
    #[validate(length(min = 1, message = "Please enter your email"))]
    pub email: String,
    #[validate(length(min = 1, message = "Please create a password"))]
    pub password: String,
}

impl SigninForm {
    /// Field names in on-page order.
    pub const FIELDS: &'static [&'static str] = &["email", "password"];
}

/// Sign-up form as posted by the browser.
///
/// Numeric fields arrive as text and may be blank.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct SignupForm {
    #[validate(length(min = 1, message = "Please enter your name"))]
    pub username: String,
    #[validate(length(min = 1, message = "Please enter your email"))]
    pub email: String,
    #[validate(length(min = 1, message = "Please create a password"))]
    pub password: String,
    pub age: String,
    #[validate(length(min = 1, message = "Please select your gender"))]
    pub gender: String,
    pub height_cm: String,
    pub weight_kg: String,
    pub blood_group: String,
    pub allergies: String,
}

impl SignupForm {
    /// Field names in on-page order.
    pub const FIELDS: &'static [&'static str] = &[
        "username",
        "email",
        "password",
        "age",
        "gender",
        "height_cm",
        "weight_kg",
        "blood_group",
        "allergies",
    ];

    /// Validate and convert to the registration payload.
    pub fn into_request(self) -> Result<RegisterRequest> {
        self.validate()?;
        Ok(RegisterRequest {
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password,
            age: parse_optional(&self.age),
            gender: self.gender,
            height_cm: parse_optional(&self.height_cm),
            weight_kg: parse_optional(&self.weight_kg),
            blood_group: self.blood_group,
            allergies: self.allergies,
        })
    }
}

/// Blank or unparsable text becomes `None`.
fn parse_optional<T: std::str::FromStr>(raw: &str) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else {
        raw.parse().ok()
    }
}
