use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use clockwork_db::{Database, is_constraint_violation};
use clockwork_types::api::{
    AccountResponse, AccountUpdateRequest, Claims, LoginRequest, LoginResponse, PasswordResetRequest,
    RegisterRequest, RegisterResponse, SetPasswordRequest,
};
use clockwork_types::models::Account;

use crate::accounts::{self, normalize_email};
use crate::error::{ApiError, FieldErrors};
use crate::middleware::{AUTH_COOKIE, create_token};
use crate::state::AppState;
use crate::tokens::{TokenGenerator, decode_uid, encode_uid};

const ACTIVATION_SUBJECT: &str = "Activate your account.";
const RESET_SUBJECT: &str = "Password reset on Clock Work";

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let username = req.username.trim().to_string();

    let mut errors = FieldErrors::new();
    if !accounts::is_valid_email(&email) {
        errors.entry("email".into()).or_default().push("Enter a valid email address.".into());
    }
    if username.is_empty() {
        errors.entry("username".into()).or_default().push("This field is required.".into());
    }
    accounts::validate_new_password(&req.password1, &req.password2, "password2", &mut errors);

    let (check_email, check_username) = (email.clone(), username.clone());
    let taken = state
        .db(move |db| taken_errors(db, &check_email, &check_username, None))
        .await?;
    for (field, messages) in taken {
        errors.entry(field).or_default().extend(messages);
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    // A concurrent registration can still take the address between the check and the insert
    let password = req.password1;
    let account = state
        .db(move |db| match accounts::create_user(db, &email, &username, &password) {
            Ok(account) => Ok(Ok(account)),
            Err(e) if is_constraint_violation(&e) => {
                let errors = taken_errors(db, &email, &username, None)?;
                if errors.is_empty() {
                    return Err(e);
                }
                Ok(Err(errors))
            }
            Err(e) => Err(e),
        })
        .await?
        .map_err(ApiError::Validation)?;

    let tokens = TokenGenerator::activation(&state.settings.secret, state.settings.password_reset_timeout);
    let link = state.link(&format!(
        "/activate/{}/{}/",
        encode_uid(account.id),
        tokens.make_token(&account)
    ));
    let body = format!(
        "Hi {},\n\nPlease click on the link to confirm your registration:\n{}\n",
        account.username, link
    );
    let to = [account.email.clone()];
    if let Err(e) = state
        .mailer
        .send_mail(ACTIVATION_SUBJECT, &body, &state.settings.from_email, &to, false)
        .await
    {
        warn!(error.cause_chain = ?e, "activation mail to {} failed", account.email);
    }

    info!("registered {} ({})", account.email, account.id);
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: account.id,
            message: "Please confirm your email address to complete the registration".into(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let account = state
        .db(move |db| db.get_account_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid login".into()))?;

    if !accounts::verify_password(&account.password, &req.password) {
        return Err(ApiError::Unauthorized("Invalid login".into()));
    }
    if !account.is_active {
        return Err(ApiError::Forbidden("Account is not active".into()));
    }

    sign_in(&state, jar, account).await
}

/// Record the login, issue a JWT and set it as the auth cookie.
async fn sign_in(
    state: &AppState,
    jar: CookieJar,
    account: Account,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let id = account.id;
    state.db(move |db| db.touch_last_login(id, Utc::now())).await?;

    let token = create_token(&state.settings.secret, account.id, &account.email)?;
    let cookie = Cookie::build((AUTH_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            user_id: account.id,
            email: account.email,
            username: account.username,
            token,
        }),
    ))
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(Cookie::build(AUTH_COOKIE).path("/"));
    (StatusCode::FOUND, jar, [(header::LOCATION, "/login/")])
}

pub async fn get_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .db(move |db| db.get_account_by_id(claims.sub))
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;
    Ok(Json(account.into()))
}

pub async fn update_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AccountUpdateRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let id = claims.sub;
    let email = normalize_email(&req.email);
    let username = req.username.trim().to_string();

    let mut errors = FieldErrors::new();
    if !accounts::is_valid_email(&email) {
        errors.entry("email".into()).or_default().push("Enter a valid email address.".into());
    }
    if username.is_empty() {
        errors.entry("username".into()).or_default().push("This field is required.".into());
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let account = state
        .db(move |db| {
            let errors = taken_errors(db, &email, &username, Some(id))?;
            if !errors.is_empty() {
                return Ok(Err(errors));
            }
            match db.update_account_profile(id, &email, &username) {
                Ok(()) => Ok(Ok(db.get_account_by_id(id)?)),
                Err(e) if is_constraint_violation(&e) => {
                    let errors = taken_errors(db, &email, &username, Some(id))?;
                    if errors.is_empty() {
                        return Err(e);
                    }
                    Ok(Err(errors))
                }
                Err(e) => Err(e),
            }
        })
        .await?
        .map_err(ApiError::Validation)?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    Ok(Json(account.into()))
}

/// Field errors for an email or username held by an account other than `exclude`.
fn taken_errors(db: &Database, email: &str, username: &str, exclude: Option<Uuid>) -> anyhow::Result<FieldErrors> {
    let mut errors = FieldErrors::new();
    if db.email_taken(email, exclude)? {
        errors
            .entry("email".into())
            .or_default()
            .push(format!("Email {} is already in use.", email));
    }
    if db.username_taken(username, exclude)? {
        errors
            .entry("username".into())
            .or_default()
            .push(format!("Username {} is already in use.", username));
    }
    Ok(errors)
}

/// Follow an activation link: activate the account and sign it in.
pub async fn activate(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((uidb64, token)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::BadRequest("Activation link is invalid!".into());

    let id = decode_uid(&uidb64).ok_or_else(invalid)?;
    let account = state
        .db(move |db| db.get_account_by_id(id))
        .await?
        .ok_or_else(invalid)?;

    let tokens = TokenGenerator::activation(&state.settings.secret, state.settings.password_reset_timeout);
    if !tokens.check_token(&account, &token) {
        return Err(invalid());
    }

    state.db(move |db| db.set_account_active(id, true)).await?;
    info!("activated {}", account.email);

    let account = Account {
        is_active: true,
        ..account
    };
    sign_in(&state, jar, account).await
}

/// Mail a reset link if the address belongs to an active account. The reply
/// is the same either way.
pub async fn password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let account = state.db(move |db| db.get_account_by_email(&email)).await?;

    if let Some(account) = account.filter(|a| a.is_active) {
        let tokens = TokenGenerator::password_reset(&state.settings.secret, state.settings.password_reset_timeout);
        let link = state.link(&format!(
            "/reset/{}/{}/",
            encode_uid(account.id),
            tokens.make_token(&account)
        ));
        let body = format!(
            "You're receiving this email because you requested a password reset for your user account.\n\n\
             Please go to the following page and choose a new password:\n{}\n\n\
             Your username, in case you've forgotten: {}\n",
            link, account.username
        );
        let to = [account.email.clone()];
        state
            .mailer
            .send_mail(RESET_SUBJECT, &body, &state.settings.from_email, &to, true)
            .await?;
    }

    Ok(Json(json!({
        "message": "We've emailed you instructions for setting your password, if an account exists with the email you entered."
    })))
}

pub async fn password_reset_confirm(
    State(state): State<AppState>,
    Path((uidb64, token)): Path<(String, String)>,
    Json(req): Json<SetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::BadRequest("The password reset link was invalid, possibly because it has already been used.".into());

    let id = decode_uid(&uidb64).ok_or_else(invalid)?;
    let account = state
        .db(move |db| db.get_account_by_id(id))
        .await?
        .ok_or_else(invalid)?;

    let tokens = TokenGenerator::password_reset(&state.settings.secret, state.settings.password_reset_timeout);
    if !tokens.check_token(&account, &token) {
        return Err(invalid());
    }

    let mut errors = FieldErrors::new();
    accounts::validate_new_password(&req.new_password1, &req.new_password2, "new_password2", &mut errors);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let password = req.new_password1;
    state
        .db(move |db| {
            let hash = accounts::hash_password(&password)?;
            db.set_account_password(id, &hash)
        })
        .await?;
    info!("password reset for {}", account.email);

    Ok(Json(json!({ "message": "Your password has been set. You may go ahead and log in now." })))
}
