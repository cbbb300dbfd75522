use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    auth::password::MAX_PASSWORD_BYTES,
    users::{
        repo_types::{UserId, STATUS_ACTIVE},
        services::{ProfileChanges, Registration, ServiceError},
    },
};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 6;
const EMAIL_MAX: usize = 100;
const NICKNAME_MAX: usize = 50;
const AVATAR_MAX: usize = 255;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn invalid(msg: impl Into<String>) -> ServiceError {
    ServiceError::Validation(msg.into())
}

fn normalize_email(raw: &str) -> Result<String, ServiceError> {
    let email = raw.trim().to_lowercase();
    if email.chars().count() > EMAIL_MAX {
        return Err(invalid(format!("email must be at most {EMAIL_MAX} characters")));
    }
    if !is_valid_email(&email) {
        return Err(invalid("invalid email"));
    }
    Ok(email)
}

fn check_password_size(password: &str) -> Result<(), ServiceError> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(invalid(format!(
            "password must be at most {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    Ok(())
}

fn check_max(field: &str, value: &str, max: usize) -> Result<(), ServiceError> {
    if value.chars().count() > max {
        return Err(invalid(format!("{field} must be at most {max} characters")));
    }
    Ok(())
}

/// Blank strings mean "not supplied".
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, ServiceError> {
        let username = self.username.trim().to_string();
        if username.is_empty() {
            return Err(invalid("username is required"));
        }
        let len = username.chars().count();
        if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
            return Err(invalid(format!(
                "username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
            )));
        }
        if self.password.is_empty() {
            return Err(invalid("password is required"));
        }
        if self.password.chars().count() < PASSWORD_MIN {
            return Err(invalid(format!(
                "password must be at least {PASSWORD_MIN} characters"
            )));
        }
        check_password_size(&self.password)?;
        if self.email.trim().is_empty() {
            return Err(invalid("email is required"));
        }
        let email = normalize_email(&self.email)?;
        let nickname = non_blank(self.nickname);
        if let Some(n) = &nickname {
            check_max("nickname", n, NICKNAME_MAX)?;
        }

        Ok(Registration {
            username,
            password: self.password,
            email: Some(email),
            nickname,
            status: STATUS_ACTIVE,
        })
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.username.trim().is_empty() {
            return Err(invalid("username is required"));
        }
        if self.password.is_empty() {
            return Err(invalid("password is required"));
        }
        check_password_size(&self.password)
    }
}

/// Request body for a profile update. Omitted or empty fields stay unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UpdateProfileRequest {
    pub fn validate(self) -> Result<ProfileChanges, ServiceError> {
        let nickname = non_blank(self.nickname);
        if let Some(n) = &nickname {
            check_max("nickname", n, NICKNAME_MAX)?;
        }
        let avatar = non_blank(self.avatar);
        if let Some(a) = &avatar {
            check_max("avatar", a, AVATAR_MAX)?;
        }
        let email = non_blank(self.email)
            .map(|e| normalize_email(&e))
            .transpose()?;
        Ok(ProfileChanges {
            nickname,
            email,
            avatar,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
}

/// Subset of the user returned alongside a fresh token.
#[derive(Debug, Serialize)]
pub struct LoginUser {
    pub id: UserId,
    pub username: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: LoginUser,
}
