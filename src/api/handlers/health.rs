use crate::{
    api::routes::{HttpMethod, RouteFamily, RouteRegistry},
    store::AccountStore,
    GIT_COMMIT_HASH,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HealthRoutes;

impl RouteFamily for HealthRoutes {
    fn name(&self) -> &'static str {
        "health"
    }

    fn stage(&self, registry: &mut RouteRegistry) {
        registry.register(HttpMethod::Get, "/health", health);
    }
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Account store is healthy", body = Health),
        (status = 503, description = "Account store is unhealthy", body = Health)
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(accounts: Extension<Arc<dyn AccountStore>>) -> impl IntoResponse {
    let result = accounts.ping().await;
    if let Err(error) = &result {
        error!("Account store ping failed: {error:#}");
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(x_app_header_value) => {
            debug!("X-App header: {:?}", x_app_header_value);
            headers.insert("X-App", x_app_header_value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    let status = if result.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, headers, Json(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountRecord, MemoryAccountStore, PendingAccount, StoreError};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
        Router,
    };
    use tower::ServiceExt;

    fn app(accounts: Arc<dyn AccountStore>) -> Result<Router> {
        let mut dispatcher = crate::api::routes::Dispatcher::new();
        dispatcher.mount(&HealthRoutes)?;
        Ok(dispatcher.into_router().layer(Extension(accounts)))
    }

    #[tokio::test]
    async fn health_reports_ok() -> Result<()> {
        let response = app(Arc::new(MemoryAccountStore::new()))?
            .oneshot(Request::get("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body: Health = serde_json::from_slice(&bytes)?;
        assert_eq!(body.name, env!("CARGO_PKG_NAME"));
        assert_eq!(body.store, "ok");
        Ok(())
    }

    struct DownStore;

    #[async_trait]
    impl AccountStore for DownStore {
        async fn create(&self, _pending: PendingAccount) -> Result<(), StoreError> {
            Err(anyhow!("down").into())
        }

        async fn promote(&self, _: &str, _: &str) -> Result<AccountRecord, StoreError> {
            Err(anyhow!("down").into())
        }

        async fn demote(&self, _pending: PendingAccount) -> Result<(), StoreError> {
            Err(anyhow!("down").into())
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(anyhow!("connection refused").into())
        }
    }

    #[tokio::test]
    async fn health_reports_store_failure() -> Result<()> {
        let response = app(Arc::new(DownStore))?
            .oneshot(Request::get("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body: Health = serde_json::from_slice(&bytes)?;
        assert_eq!(body.store, "error");
        Ok(())
    }
}
