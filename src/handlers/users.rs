use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    auth::{AuthContext, hash_password},
    error::{AppError, AppResult},
    handlers::{normalize_email, required},
    models::{
        AccessDecisionRequest, CreateUserRequest, CreatedUserResponse, NewUser, Role,
        UpdateUserRequest, User, UserChanges,
    },
    notifications::notify_new_member,
};

const MIN_PASSWORD_LEN: usize = 8;

/// Maps the `restricted` registration field to the initial role. Only a regular account or
/// a pending access request can be asked for; privileged roles are granted by an admin.
fn initial_role(restricted: i32) -> AppResult<Role> {
    match Role::try_from(restricted) {
        Ok(role @ (Role::Requested | Role::NonPrivileged)) => Ok(role),
        _ => Err(AppError::Validation(
            "restricted must be -1 (request access) or 0".to_string(),
        )),
    }
}

/// create_user
///
/// [Public] Registers an account. Fails with 409 when the email is taken, and notifies the
/// site admin in the background on success.
#[utoipa::path(
    post,
    path = "/api/user",
    request_body = CreateUserRequest,
    responses(
        (status = 200, description = "Account created", body = CreatedUserResponse),
        (status = 400, description = "Invalid registration data", body = crate::error::ErrorBody),
        (status = 409, description = "Email already registered", body = crate::error::ErrorBody)
    ),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<Json<CreatedUserResponse>> {
    let first_name = required("firstName", &payload.first_name)?;
    let last_name = required("lastName", &payload.last_name)?;
    let email = normalize_email(&payload.email)?;
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let role = initial_role(payload.restricted)?;

    if state.repo.get_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("email already registered".to_string()));
    }

    let password_hash = hash_password(payload.password).await?;
    // The unique index still guards against a concurrent registration of the same email.
    let user = state
        .repo
        .create_user(NewUser {
            first_name,
            last_name,
            email,
            password_hash,
            role,
            email_notification: payload.email_notification,
        })
        .await?;

    tracing::info!(user_id = user.id, role = ?user.role, "user registered");
    let id = user.id;
    notify_new_member(state.notifier.clone(), user);

    Ok(Json(CreatedUserResponse { id }))
}

/// get_current_user
///
/// [Authenticated] The caller's own account. Anonymous callers get 403.
#[utoipa::path(
    get,
    path = "/api/user",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 403, description = "Not signed in", body = crate::error::ErrorBody)
    ),
    tag = "users"
)]
pub async fn get_current_user(
    auth: AuthContext,
    State(state): State<AppState>,
) -> AppResult<Json<User>> {
    if !auth.authenticated {
        return Err(AppError::Forbidden("not signed in".to_string()));
    }

    state
        .repo
        .get_user(auth.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))
}

/// list_users
///
/// [Admin] Every account.
#[utoipa::path(
    get,
    path = "/api/user/list",
    responses(
        (status = 200, description = "All users", body = [User]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Not an admin")
    ),
    tag = "users"
)]
pub async fn list_users(
    auth: AuthContext,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<User>>> {
    auth.require_role(Role::CONTENT_MANAGERS)?;
    Ok(Json(state.repo.list_users().await?))
}

/// get_user
///
/// [Admin or self] A single account by id.
#[utoipa::path(
    get,
    path = "/api/user/{id}",
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Neither admin nor the account owner"),
        (status = 404, description = "No such user")
    ),
    tag = "users"
)]
pub async fn get_user(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<User>> {
    auth.require_authenticated()?;
    if !auth.is_user(id) && !auth.has_role(Role::CONTENT_MANAGERS) {
        return Err(AppError::Forbidden("cannot view another account".to_string()));
    }

    state
        .repo
        .get_user(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))
}

/// update_user
///
/// [Admin or self] Replaces the profile fields. Changing the role is admin-only, and an
/// admin cannot change their own role.
#[utoipa::path(
    put,
    path = "/api/user/{id}",
    params(("id" = i32, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 400, description = "Invalid profile data"),
        (status = 403, description = "Not allowed to make this change"),
        (status = 404, description = "No such user"),
        (status = 409, description = "Email already registered")
    ),
    tag = "users"
)]
pub async fn update_user(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    auth.require_authenticated()?;
    let is_self = auth.is_user(id);
    let is_admin = auth.has_role(Role::CONTENT_MANAGERS);
    if !is_self && !is_admin {
        return Err(AppError::Forbidden("cannot edit another account".to_string()));
    }

    let existing = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    let role = payload.role.unwrap_or(existing.role);
    if role != existing.role {
        if !is_admin {
            return Err(AppError::Forbidden("only an admin can change roles".to_string()));
        }
        if is_self {
            return Err(AppError::Forbidden(
                "admins cannot change their own role".to_string(),
            ));
        }
    }

    let changes = UserChanges {
        first_name: required("firstName", &payload.first_name)?,
        last_name: required("lastName", &payload.last_name)?,
        email: normalize_email(&payload.email)?,
        role,
        email_notification: payload
            .email_notification
            .unwrap_or(existing.email_notification),
    };

    let user = state
        .repo
        .update_user(id, changes)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    if user.role != existing.role {
        tracing::info!(
            user_id = id,
            by = auth.user_id,
            from = ?existing.role,
            to = ?user.role,
            "role changed"
        );
    }
    Ok(Json(user))
}

/// decide_access
///
/// [Admin] Resolves a pending access request: approve grants `Privileged`, deny falls back
/// to `NonPrivileged`. Only valid while the account is `Requested`.
#[utoipa::path(
    post,
    path = "/api/user/{id}/access",
    params(("id" = i32, Path, description = "User id")),
    request_body = AccessDecisionRequest,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such user"),
        (status = 409, description = "No pending access request")
    ),
    tag = "users"
)]
pub async fn decide_access(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<AccessDecisionRequest>,
) -> AppResult<Json<User>> {
    auth.require_role(Role::CONTENT_MANAGERS)?;

    let existing = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    if existing.role != Role::Requested {
        return Err(AppError::Conflict(
            "user has no pending access request".to_string(),
        ));
    }

    let role = payload.decision.resulting_role();
    let user = state
        .repo
        .set_user_role(id, role)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    tracing::info!(user_id = id, by = auth.user_id, decision = ?payload.decision, "access request decided");
    Ok(Json(user))
}

/// delete_user
///
/// [Admin] Removes an account. Admins cannot delete themselves.
#[utoipa::path(
    delete,
    path = "/api/user/{id}",
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not an admin, or deleting oneself"),
        (status = 404, description = "No such user"),
        (status = 409, description = "User still owns posts")
    ),
    tag = "users"
)]
pub async fn delete_user(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let caller = auth.require_role(Role::CONTENT_MANAGERS)?;
    if caller == id {
        return Err(AppError::Forbidden(
            "admins cannot delete their own account".to_string(),
        ));
    }

    if state.repo.delete_user(id).await? {
        tracing::info!(user_id = id, by = caller, "user deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("user not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_can_only_ask_for_regular_or_requested() {
        assert_eq!(initial_role(0).unwrap(), Role::NonPrivileged);
        assert_eq!(initial_role(-1).unwrap(), Role::Requested);
        assert!(initial_role(1).is_err());
        assert!(initial_role(2).is_err());
        assert!(initial_role(9).is_err());
    }
}
