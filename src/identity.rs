// src/identity.rs
use crate::auth::{gravatar_url, hash_password, verify_password, TokenService};
use crate::db::UserStore;
use crate::error::{ApiError, FieldError};
use crate::models::{LoginBody, Principal, RegisterBody, User};
use chrono::Utc;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

const PASSWORD_RULE: &str =
    "Minimum 6 characters, at least one uppercase letter, one lowercase letter and one number";
const BAD_LOGIN: &str = "Invalid email or password";

/// Registration, login and resolution of bearer tokens to principals.
#[derive(Clone)]
pub struct IdentityService {
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
    bcrypt_cost: u32,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .filter(|part| !part.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn is_strong_password(password: &str) -> bool {
    password.len() >= 6
        && password.chars().all(|c| c.is_ascii_alphanumeric())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

fn check_email(email: &str, errors: &mut Vec<FieldError>, invalid_msg: &str) {
    if email.is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
    } else if !is_email(email) {
        errors.push(FieldError::new("email", invalid_msg));
    }
}

fn validate_registration(body: &RegisterBody) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if body.name.trim().is_empty() {
        errors.push(FieldError::new("name", "Name is required"));
    }
    check_email(&normalize_email(&body.email), &mut errors, "Invalid email address");

    if body.password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    } else if !is_strong_password(&body.password) {
        errors.push(FieldError::new("password", PASSWORD_RULE));
    }

    if body.confirm_password.is_empty() {
        errors.push(FieldError::new("confirmPassword", "Confirm password is required"));
    } else if body.confirm_password != body.password {
        errors.push(FieldError::new(
            "confirmPassword",
            "Password confirmation is not match",
        ));
    }
    errors
}

impl IdentityService {
    pub fn new(users: Arc<dyn UserStore>, tokens: Arc<TokenService>, bcrypt_cost: u32) -> Self {
        IdentityService {
            users,
            tokens,
            bcrypt_cost,
        }
    }

    /// Creates the account and returns a token for it.
    pub async fn register(&self, body: RegisterBody) -> Result<String, ApiError> {
        let errors = validate_registration(&body);
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }

        let email = normalize_email(&body.email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(ApiError::invalid("email", "Email already in use"));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            name: body.name.trim().to_string(),
            avatar: gravatar_url(&email),
            email,
            password: hash_password(body.password, self.bcrypt_cost).await?,
            date: Utc::now(),
        };
        if !self.users.insert_if_email_free(&user).await? {
            return Err(ApiError::invalid("email", "Email already in use"));
        }

        info!("Registered user {}", user.id);
        self.tokens.issue(&user.id)
    }

    pub async fn login(&self, body: LoginBody) -> Result<String, ApiError> {
        let email = normalize_email(&body.email);
        let mut errors = Vec::new();
        check_email(&email, &mut errors, "Email is invalid");
        if body.password.is_empty() {
            errors.push(FieldError::new("password", "Password is required"));
        }
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }

        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::invalid("email", BAD_LOGIN))?;
        if !verify_password(body.password, user.password.clone()).await? {
            return Err(ApiError::invalid("email", BAD_LOGIN));
        }

        info!("User {} logged in", user.id);
        self.tokens.issue(&user.id)
    }

    pub async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        let id = self.tokens.verify(token)?;
        self.users
            .find_by_id(&id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Token is not valid".into()))
    }

    pub async fn principal(&self, token: &str) -> Result<Principal, ApiError> {
        self.current_user(token).await.map(|u| u.principal())
    }
}
