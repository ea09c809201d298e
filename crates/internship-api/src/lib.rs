use axum::{http::StatusCode, response::IntoResponse};
use notifications::{NotificationService, SmsScheduler, SmsSender, Templates};
use std::sync::Arc;

mod admin;
mod auth;
mod error;
mod internships;
mod notification_routes;
mod sms;

pub use auth::hash_password;
pub use error::{ApiError, ApiErrorExt};

/// Audience of the access tokens issued and accepted by the API.
pub const TOKEN_AUDIENCE: &str = "authenticated";

/// Request wraps a JSON-deserialized request type T which
/// also implements the validator::Validate trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct Request<T>(pub T);

/// Claims are the JWT claims of platform access tokens.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: uuid::Uuid,
    pub email: String,
    pub role: models::Role,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Rejection is an error type of reasons why an API request may fail.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    JsonError(#[from] axum::extract::rejection::JsonRejection),
}

/// Sms is the SMS gateway, and the scheduler which escalates through it.
#[derive(Clone)]
pub struct Sms {
    pub sender: Arc<dyn SmsSender>,
    pub scheduler: Arc<SmsScheduler>,
}

struct App {
    jwt_decoding: jsonwebtoken::DecodingKey,
    jwt_encoding: jsonwebtoken::EncodingKey,
    jwt_validation: jsonwebtoken::Validation,
    token_lifetime: chrono::Duration,
    pg_pool: sqlx::PgPool,
    notifications: Arc<NotificationService>,
    templates: Templates,
    sms: Option<Sms>,
}

/// Build the platform's API router.
pub fn build_router(
    jwt_secret: Vec<u8>,
    token_lifetime: std::time::Duration,
    pg_pool: sqlx::PgPool,
    notifications: Arc<NotificationService>,
    sms: Option<Sms>,
    allow_origin: &[String],
) -> anyhow::Result<axum::Router<()>> {
    use anyhow::Context;

    let mut jwt_validation = jsonwebtoken::Validation::default();
    jwt_validation.set_audience(&[TOKEN_AUDIENCE]);

    let app = Arc::new(App {
        jwt_decoding: jsonwebtoken::DecodingKey::from_secret(&jwt_secret),
        jwt_encoding: jsonwebtoken::EncodingKey::from_secret(&jwt_secret),
        jwt_validation,
        token_lifetime: chrono::Duration::from_std(token_lifetime)
            .context("token lifetime is out of range")?,
        pg_pool,
        notifications,
        templates: Templates::new()?,
        sms,
    });

    let allow_origin = allow_origin
        .iter()
        .map(|o| o.parse())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse allowed origins")?;

    let allow_headers = [
        axum::http::header::ACCEPT,
        axum::http::header::AUTHORIZATION,
        axum::http::header::CACHE_CONTROL,
        axum::http::header::CONTENT_TYPE,
    ];

    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_origin(tower_http::cors::AllowOrigin::list(allow_origin))
        .allow_headers(allow_headers);

    use axum::http::{header, HeaderValue};
    use axum::routing::{delete, get, post, put};
    use tower_http::set_header::SetResponseHeaderLayer;

    let auth_router = axum::Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route(
            "/me",
            get(auth::me)
                .put(auth::update_me)
                .route_layer(axum::middleware::from_fn_with_state(app.clone(), authorize)),
        );

    let internships_router = axum::Router::new()
        .route("/", get(internships::list))
        .route("/applications/mine", get(internships::my_applications))
        .route("/applications/{id}", delete(internships::withdraw))
        .route("/{id}", get(internships::get))
        .route("/{id}/apply", post(internships::apply))
        .route_layer(axum::middleware::from_fn_with_state(app.clone(), authorize));

    let admin_router = axum::Router::new()
        .route("/stats", get(admin::stats))
        .route("/students", get(admin::students))
        .route(
            "/internships",
            get(admin::list_internships).post(admin::create_internship),
        )
        .route(
            "/internships/{id}",
            put(admin::update_internship).delete(admin::delete_internship),
        )
        .route("/applications", get(admin::list_applications))
        .route(
            "/applications/{id}/status",
            put(admin::update_application_status),
        )
        .route("/notifications", post(admin::send_notification))
        .route("/jobs", get(admin::list_jobs))
        .route_layer(axum::middleware::from_fn(require_admin))
        .route_layer(axum::middleware::from_fn_with_state(app.clone(), authorize));

    let notifications_router = axum::Router::new()
        .route("/", get(notification_routes::list))
        .route("/unread-count", get(notification_routes::unread_count))
        .route("/read-all", put(notification_routes::mark_all_read))
        .route("/{id}/read", put(notification_routes::mark_read))
        .route("/{id}", delete(notification_routes::delete))
        .route("/subscribe", post(notification_routes::subscribe))
        .route("/unsubscribe", post(notification_routes::unsubscribe))
        .route_layer(axum::middleware::from_fn_with_state(app.clone(), authorize))
        // Fetched by the service worker before the user signs in.
        .route(
            "/vapid-public-key",
            get(notification_routes::vapid_public_key),
        );

    let sms_router = axum::Router::new()
        .route("/status", get(sms::status))
        .route("/test", post(sms::test))
        .route("/process", post(sms::process))
        .route_layer(axum::middleware::from_fn(require_admin))
        .route_layer(axum::middleware::from_fn_with_state(app.clone(), authorize));

    let router = axum::Router::new()
        .route("/health", get(health))
        .nest("/api/auth", auth_router)
        .nest("/api/internships", internships_router)
        .nest("/api/admin", admin_router)
        .nest("/api/notifications", notifications_router)
        .nest("/api/sms", sms_router)
        // Hardening headers for browsers.
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app);

    Ok(router)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "time": chrono::Utc::now(),
    }))
}

impl<T, S> axum::extract::FromRequest<S> for Request<T>
where
    T: serde::de::DeserializeOwned + validator::Validate,
    S: Send + Sync,
    axum::extract::Json<T>:
        axum::extract::FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
{
    type Rejection = Rejection;

    async fn from_request(req: axum::extract::Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Json(value) = axum::extract::Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Request(value))
    }
}

impl axum::response::IntoResponse for Rejection {
    fn into_response(self) -> axum::response::Response {
        match self {
            Rejection::ValidationError(inner) => {
                let message = format!("Input validation error: [{inner}]").replace('\n', ", ");
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            Rejection::JsonError(inner) => inner.into_response(),
        }
    }
}

impl App {
    /// Issue an access token for `user`.
    fn issue_token(&self, user: &models::User) -> anyhow::Result<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            aud: TOKEN_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + self.token_lifetime).timestamp(),
        };

        Ok(jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &self.jwt_encoding,
        )?)
    }
}

// Middleware which validates JWT tokens before proceeding, and attaches verified Claims.
async fn authorize(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    bearer: Option<
        axum_extra::TypedHeader<
            axum_extra::headers::Authorization<axum_extra::headers::authorization::Bearer>,
        >,
    >,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let Some(axum_extra::TypedHeader(bearer)) = bearer else {
        return (StatusCode::UNAUTHORIZED, "missing bearer authorization token").into_response();
    };

    let token = match jsonwebtoken::decode::<Claims>(
        bearer.token(),
        &app.jwt_decoding,
        &app.jwt_validation,
    ) {
        Ok(claims) => claims,
        Err(err) => {
            return (
                StatusCode::UNAUTHORIZED,
                format!("failed to parse authorization token: {err}"),
            )
                .into_response();
        }
    };

    req.extensions_mut().insert(token.claims);
    next.run(req).await
}

// Middleware which requires verified Claims of an admin.
async fn require_admin(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    match req.extensions().get::<Claims>() {
        Some(claims) if claims.role == models::Role::Admin => next.run(req).await,
        Some(_) => ApiError::forbidden("access admin routes").into_response(),
        None => (StatusCode::UNAUTHORIZED, "missing authorization").into_response(),
    }
}

#[cfg(test)]
mod test;
