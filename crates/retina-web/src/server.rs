//! Web服务器

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use retina_core::AppConfig;
use retina_detection::DetectionPipeline;
use retina_store::EntityStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::appointments::{
    cancel_appointment, create_appointment, get_appointment, list_appointments, update_appointment,
};
use crate::auth::{auth_middleware, get_profile, login_handler, register_handler, update_profile, AuthService};
use crate::doctors::{get_doctor, get_doctor_profile, list_doctors, update_doctor_profile};
use crate::handlers::{analytics_stats, cnn_health, health};
use crate::images::{detect_image, get_image, list_images, review_result, serve_image_file, upload_image};
use crate::patients::{
    get_patient, get_patient_images, get_patient_profile, list_patients, update_patient_profile,
};

/// multipart 编码开销的余量
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EntityStore>,
    pub auth: Arc<AuthService>,
    pub detection: Arc<DetectionPipeline>,
    pub config: Arc<AppConfig>,
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: create_app(state),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start web server: {}", e))?;

        Ok(())
    }
}

/// 构建完整路由
pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.upload.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    let cors = cors_layer(&state.config.cors.allowed_origins);

    Router::new()
        // 健康检查
        .route("/health", get(health))
        // API路由
        .nest("/api/v1", public_routes().merge(protected_routes(state.clone())))
        // 全局中间件
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// 认证路由（无需token）
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
}

/// 需要认证的路由
fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        // 患者
        .route("/patients", get(list_patients))
        .route("/patients/profile", get(get_patient_profile).put(update_patient_profile))
        .route("/patients/:id", get(get_patient))
        .route("/patients/:id/images", get(get_patient_images))
        // 医生
        .route("/doctors", get(list_doctors))
        .route("/doctors/profile", get(get_doctor_profile).put(update_doctor_profile))
        .route("/doctors/:id", get(get_doctor))
        // 影像与检测
        .route("/images", get(list_images))
        .route("/images/upload", post(upload_image))
        .route("/images/detect", post(detect_image))
        .route("/images/:id", get(get_image))
        .route("/images/:id/file", get(serve_image_file))
        .route("/images/results/:id/review", post(review_result))
        // 预约
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route(
            "/appointments/:id",
            get(get_appointment).put(update_appointment).delete(cancel_appointment),
        )
        // 统计与服务状态
        .route("/analytics/stats", get(analytics_stats))
        .route("/cnn/health", get(cnn_health))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// 按配置的来源构建CORS，`*` 表示任意来源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
