//! 认证与授权

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use retina_core::utils::is_valid_email;
use retina_core::config::JwtConfig;
use retina_core::{RetinaError, Role, User};
use retina_store::{NewDoctor, NewPatient, NewUser};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handlers::{ApiError, ApiResult};
use crate::server::AppState;

/// 最短密码长度
pub const MIN_PASSWORD_LEN: usize = 6;

/// 注册请求
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    #[serde(default)]
    pub phone: String,
}

/// 登录请求
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// 个人信息更新请求
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// 登录/注册响应
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // 用户ID
    pub role: String, // 角色
    pub iat: i64,     // 签发时间
    pub exp: i64,     // 过期时间
    pub jti: String,  // JWT ID
}

/// 认证服务：密码哈希与令牌签发
pub struct AuthService {
    jwt_secret: String,
    token_expiry_hours: i64,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(config: &JwtConfig) -> Self {
        Self::with_cost(config, bcrypt::DEFAULT_COST)
    }

    /// 指定 bcrypt 代价因子
    pub fn with_cost(config: &JwtConfig, bcrypt_cost: u32) -> Self {
        Self {
            jwt_secret: config.secret.clone(),
            token_expiry_hours: config.expiry_hours,
            bcrypt_cost,
        }
    }

    /// 在阻塞线程池中计算密码哈希
    pub async fn hash_password(&self, password: String) -> Result<String, RetinaError> {
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| RetinaError::Internal(format!("hash task failed: {}", e)))?
            .map_err(|e| RetinaError::Internal(format!("failed to hash password: {}", e)))
    }

    pub async fn verify_password(&self, password: String, hash: String) -> Result<bool, RetinaError> {
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| RetinaError::Internal(format!("verify task failed: {}", e)))?
            .map_err(|e| RetinaError::Internal(format!("failed to verify password: {}", e)))
    }

    /// 生成JWT token
    pub fn generate_token(&self, user: &User) -> Result<String, RetinaError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.token_expiry_hours);

        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| RetinaError::Internal(format!("failed to sign token: {}", e)))
    }

    /// 验证JWT token，返回用户ID
    pub fn verify_token(&self, token: &str) -> Result<Uuid, RetinaError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| RetinaError::Unauthorized(format!("Invalid token: {}", e)))?;

        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| RetinaError::Unauthorized("Invalid token subject".to_string()))
    }
}

/// 角色检查
pub fn require_role(user: &User, roles: &[Role]) -> Result<(), ApiError> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        Err(RetinaError::Permission(format!("Role {} is not allowed here", user.role)).into())
    }
}

/// 认证中间件，校验通过后将当前用户放入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| RetinaError::Unauthorized("Missing token".to_string()))?;

    let user_id = state.auth.verify_token(token)?;
    let user = state
        .store
        .get_user_by_id(user_id)
        .await
        .map_err(|_| RetinaError::Unauthorized("User not found".to_string()))?;

    debug!("Authenticated user {} ({})", user.id, user.role);
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// 注册处理器
pub async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    info!("Registration attempt for {}", request.email);

    if !is_valid_email(&request.email) {
        return Err(RetinaError::Invalid("Invalid email address".to_string()).into());
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(RetinaError::Invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))
        .into());
    }
    if request.first_name.trim().is_empty() || request.last_name.trim().is_empty() {
        return Err(RetinaError::Invalid("First and last name are required".to_string()).into());
    }
    let role: Role = request.role.parse()?;
    if role == Role::Admin {
        return Err(RetinaError::Invalid("Role must be patient or doctor".to_string()).into());
    }

    let password_hash = state.auth.hash_password(request.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            email: request.email,
            password_hash,
            first_name: request.first_name,
            last_name: request.last_name,
            role,
            phone: request.phone,
        })
        .await?;

    match role {
        Role::Patient => {
            state.store.create_patient(NewPatient::for_user(user.id)).await?;
        }
        Role::Doctor => {
            state.store.create_doctor(NewDoctor::for_user(user.id)).await?;
        }
        Role::Admin => {}
    }

    let token = state.auth.generate_token(&user)?;
    info!("User registered: {} ({})", user.id, user.role);
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// 登录处理器
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    info!("Login attempt for user: {}", request.email);

    let invalid = || RetinaError::Unauthorized("Invalid email or password".to_string());

    let user = state
        .store
        .get_user_by_email(&request.email)
        .await
        .map_err(|_| invalid())?;

    let verified = state
        .auth
        .verify_password(request.password, user.password_hash.clone())
        .await?;
    if !verified {
        warn!("Login failed for {}", request.email);
        return Err(invalid().into());
    }

    let token = state.auth.generate_token(&user)?;
    info!("User logged in successfully: {}", user.id);
    Ok(Json(AuthResponse { token, user }))
}

/// 获取当前用户信息
pub async fn get_profile(Extension(user): Extension<User>) -> impl IntoResponse {
    Json(json!({ "user": user }))
}

/// 更新当前用户信息
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut updated = user;
    if let Some(first_name) = request.first_name.filter(|s| !s.trim().is_empty()) {
        updated.first_name = first_name;
    }
    if let Some(last_name) = request.last_name.filter(|s| !s.trim().is_empty()) {
        updated.last_name = last_name;
    }
    if let Some(phone) = request.phone {
        updated.phone = phone;
    }

    let user = state.store.update_user(updated).await?;
    Ok(Json(json!({ "user": user })))
}
