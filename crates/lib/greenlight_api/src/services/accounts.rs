//! User registration, activation and authentication-token flows.

use greenlight_core::auth::AuthError;
use greenlight_core::auth::password::{self, MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};
use greenlight_core::auth::permissions::MOVIES_READ;
use greenlight_core::data::bounded;
use greenlight_core::mailer::{Message, Template};
use greenlight_core::models::auth::{IssuedToken, NewUser, Principal, TokenScope, User};
use greenlight_core::models::movie::ValidationErrors;
use serde_json::json;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::services::mail;

/// Maximum name length in bytes.
const MAX_NAME_BYTES: usize = 500;

/// Loose shape check: something before and after a single `@`, and a dot in the domain.
fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn check_email(v: &mut ValidationErrors, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(looks_like_email(email), "email", "must be a valid email address");
}

fn check_password(v: &mut ValidationErrors, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= MIN_PASSWORD_LEN,
        "password",
        "must be at least 8 bytes long",
    );
    v.check(
        password.len() <= MAX_PASSWORD_LEN,
        "password",
        "must not be more than 72 bytes long",
    );
}

fn activation_email(user: &User, token: &IssuedToken, template: Template) -> Message {
    Message {
        recipient: user.email.clone(),
        template,
        data: json!({
            "activationToken": token.plaintext,
            "userID": user.id,
        }),
    }
}

/// Create an unactivated user with `movies:read`, then email an activation token.
pub async fn register(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
) -> AppResult<User> {
    let mut v = ValidationErrors::default();
    v.check(!name.is_empty(), "name", "must be provided");
    v.check(
        name.len() <= MAX_NAME_BYTES,
        "name",
        "must not be more than 500 bytes long",
    );
    check_email(&mut v, email);
    check_password(&mut v, password);
    if !v.is_empty() {
        return Err(v.into());
    }

    let password_hash = password::hash_password(password)?;
    let user = bounded(
        "user insert",
        state.config.query_timeout,
        state.users.insert_user(NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash,
            activated: false,
        }),
    )
    .await?;

    state
        .pipeline
        .gate()
        .add_for_user(user.id, &[MOVIES_READ])
        .await?;

    let token = state
        .pipeline
        .tokens()
        .new_token(user.id, TokenScope::Activation)
        .await?;
    mail::dispatch(state, activation_email(&user, &token, Template::UserWelcome))?;

    info!(user_id = user.id, "registered user");
    Ok(user)
}

/// Consume an activation token: mark the user activated and revoke the
/// remaining activation tokens.
pub async fn activate(state: &AppState, plaintext: &str) -> AppResult<User> {
    let tokens = state.pipeline.tokens();
    let user = match tokens.get_user(plaintext, TokenScope::Activation).await {
        Ok(user) => user,
        Err(AuthError::AuthenticationFailed) => {
            return Err(AppError::invalid(
                "token",
                "invalid or expired activation token",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let user = state
        .versions
        .check_and_apply(state.users.as_ref(), user.id, user.version, |u: &mut User| {
            u.activated = true;
            Ok::<(), AppError>(())
        })
        .await?;

    tokens
        .delete_all_for_user(user.id, TokenScope::Activation)
        .await?;

    info!(user_id = user.id, "activated user");
    Ok(user)
}

/// Issue a fresh activation token for a user that is not yet activated.
pub async fn resend_activation(state: &AppState, email: &str) -> AppResult<()> {
    let mut v = ValidationErrors::default();
    check_email(&mut v, email);
    if !v.is_empty() {
        return Err(v.into());
    }

    let user = bounded(
        "user lookup",
        state.config.query_timeout,
        state.users.user_by_email(email),
    )
    .await?
    .ok_or_else(|| AppError::invalid("email", "no matching email address found"))?;

    if user.activated {
        return Err(AppError::invalid("email", "user has already been activated"));
    }

    let token = state
        .pipeline
        .tokens()
        .new_token(user.id, TokenScope::Activation)
        .await?;
    mail::dispatch(state, activation_email(&user, &token, Template::TokenActivation))?;
    Ok(())
}

/// Check credentials and issue an authentication token.
///
/// Unknown email and wrong password fail identically.
pub async fn login(state: &AppState, email: &str, password: &str) -> AppResult<IssuedToken> {
    let mut v = ValidationErrors::default();
    check_email(&mut v, email);
    check_password(&mut v, password);
    if !v.is_empty() {
        return Err(v.into());
    }

    let user = bounded(
        "user lookup",
        state.config.query_timeout,
        state.users.user_by_email(email),
    )
    .await?
    .ok_or(AppError::InvalidCredentials)?;

    if !password::verify_password(password, &user.password_hash)? {
        return Err(AppError::InvalidCredentials);
    }

    let token = state
        .pipeline
        .tokens()
        .new_token(user.id, TokenScope::Authentication)
        .await?;
    info!(user_id = user.id, "issued authentication token");
    Ok(token)
}

/// Revoke every authentication token of the calling user.
pub async fn logout(state: &AppState, principal: &Principal) -> AppResult<u64> {
    let user = principal.user().ok_or(AppError::Unauthenticated)?;
    let removed = state
        .pipeline
        .tokens()
        .delete_all_for_user(user.id, TokenScope::Authentication)
        .await?;
    info!(user_id = user.id, removed, "logged out");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(looks_like_email("alice@example.com"));
        assert!(!looks_like_email("alice"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("alice@localhost"));
        assert!(!looks_like_email("a@b@example.com"));
        assert!(!looks_like_email("alice@example."));
    }

    #[test]
    fn password_checks_keep_first_failure() {
        let mut v = ValidationErrors::default();
        check_password(&mut v, "");
        assert_eq!(v.0["password"], "must be provided");

        let mut v = ValidationErrors::default();
        check_password(&mut v, "short");
        assert_eq!(v.0["password"], "must be at least 8 bytes long");
    }
}
