use crate::{
    api::{
        email::Mailer,
        events::{SessionEvent, SessionEvents},
        handlers::{
            health::HealthRoutes,
            registration::{RegistrationConfig, RegistrationRoutes, RegistrationWorkflow},
            session::{CookieConfig, SessionRoutes},
        },
        routes::{ConfigurationError, Dispatcher},
    },
    recaptcha::CaptchaVerifier,
    store::{AccountStore, SessionStore},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use url::Url;

pub mod email;
pub mod events;
pub mod handlers;
mod openapi;
pub mod routes;

pub use openapi::openapi;

/// Everything the endpoint families need, shared across requests.
#[derive(Clone)]
pub struct AppState {
    workflow: Arc<RegistrationWorkflow>,
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    events: SessionEvents,
    cookies: CookieConfig,
}

impl AppState {
    #[must_use]
    pub fn new(
        verifier: Arc<dyn CaptchaVerifier>,
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn Mailer>,
        config: RegistrationConfig,
        cookies: CookieConfig,
    ) -> Self {
        let events = SessionEvents::default();
        let workflow = Arc::new(RegistrationWorkflow::new(
            verifier,
            accounts.clone(),
            sessions.clone(),
            mailer,
            events.clone(),
            config,
        ));
        Self {
            workflow,
            accounts,
            sessions,
            events,
            cookies,
        }
    }

    #[must_use]
    pub fn workflow(&self) -> &Arc<RegistrationWorkflow> {
        &self.workflow
    }

    #[must_use]
    pub fn events(&self) -> &SessionEvents {
        &self.events
    }
}

/// Mount every endpoint family on a fresh dispatcher.
///
/// # Errors
/// Returns [`ConfigurationError`] when two families claim the same route.
pub fn router(state: &AppState) -> Result<Router, ConfigurationError> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.mount(&RegistrationRoutes)?;
    dispatcher.mount(&SessionRoutes)?;
    dispatcher.mount(&HealthRoutes)?;

    Ok(dispatcher
        .into_router()
        .layer(Extension(state.workflow.clone()))
        .layer(Extension(state.accounts.clone()))
        .layer(Extension(state.sessions.clone()))
        .layer(Extension(state.events.clone()))
        .layer(Extension(state.cookies.clone())))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: AppState) -> Result<()> {
    let origin = home_origin(state.workflow.config().home_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true);

    let app = router(&state).context("Failed to install routes")?.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let event_logger = spawn_session_event_logger(&state.events);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    event_logger.abort();

    Ok(())
}

fn spawn_session_event_logger(events: &SessionEvents) -> JoinHandle<()> {
    let mut subscription = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            match event {
                SessionEvent::Bound { username, .. } => {
                    info!(username = %username, "session bound");
                }
                SessionEvent::Destroyed { username } => {
                    info!(username = %username, "session destroyed");
                }
            }
        }
    })
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn home_origin(home_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(home_url).with_context(|| format!("Invalid home URL: {home_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Home URL must include a valid host: {home_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build home origin header")
}
