//! Route registry and dispatcher.
//!
//! Each endpoint family stages its `(method, path, handler)` tuples on its own
//! [`RouteRegistry`]. Staging never touches the live router; only
//! [`RouteRegistry::install`] attaches routes to the shared [`Dispatcher`].
//! The dispatcher mounts a family at most once and refuses any route whose
//! `(method, resolved path)` is already live. Both are startup errors.

use axum::{
    handler::Handler,
    routing::{on, MethodFilter, MethodRouter},
    Router,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    const fn filter(self) -> MethodFilter {
        match self {
            Self::Get => MethodFilter::GET,
            Self::Post => MethodFilter::POST,
            Self::Put => MethodFilter::PUT,
            Self::Patch => MethodFilter::PATCH,
            Self::Delete => MethodFilter::DELETE,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("route {method} {path} is already installed")]
    DuplicateRoute { method: HttpMethod, path: String },
    #[error("route {path} conflicts with installed template {existing}")]
    ConflictingTemplate { path: String, existing: String },
    #[error("endpoint family {0} is already mounted")]
    DuplicateFamily(&'static str),
}

/// Replace every parameter segment with a placeholder so templates that only
/// differ in parameter names compare equal. A trailing slash is kept: the
/// router treats `/a` and `/a/` as distinct routes.
#[must_use]
pub fn resolve_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.starts_with(':') {
                ":"
            } else if segment.starts_with('*') {
                "*"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub struct RouteDescriptor {
    pub method: HttpMethod,
    pub path: String,
    handler: MethodRouter,
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Staged routes of a single endpoint family.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    staged: Vec<RouteDescriptor>,
}

impl RouteRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a route; nothing is attached until [`Self::install`].
    pub fn register<H, T>(&mut self, method: HttpMethod, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.staged.push(RouteDescriptor {
            method,
            path: path.to_string(),
            handler: on(method.filter(), handler),
        });
        self
    }

    #[must_use]
    pub fn staged(&self) -> &[RouteDescriptor] {
        &self.staged
    }

    /// Attach every staged route, in staging order.
    ///
    /// Collisions are checked for the whole batch before anything is attached,
    /// so a failed install leaves the dispatcher unchanged.
    ///
    /// # Errors
    /// [`ConfigurationError::DuplicateRoute`] when a `(method, resolved path)`
    /// is already live or staged twice, [`ConfigurationError::ConflictingTemplate`]
    /// when a template differs from a live one only in parameter names.
    pub fn install(self, dispatcher: &mut Dispatcher) -> Result<(), ConfigurationError> {
        let mut batch_keys = HashSet::new();
        let mut batch_templates: HashMap<String, &str> = HashMap::new();

        for descriptor in &self.staged {
            let resolved = resolve_path(&descriptor.path);
            let key = (descriptor.method, resolved.clone());
            if dispatcher.live_routes.contains(&key) || !batch_keys.insert(key) {
                return Err(ConfigurationError::DuplicateRoute {
                    method: descriptor.method,
                    path: descriptor.path.clone(),
                });
            }

            let existing = dispatcher
                .templates
                .get(&resolved)
                .map(String::as_str)
                .or_else(|| batch_templates.get(&resolved).copied());
            if let Some(existing) = existing {
                if existing != descriptor.path {
                    return Err(ConfigurationError::ConflictingTemplate {
                        path: descriptor.path.clone(),
                        existing: existing.to_string(),
                    });
                }
            }
            batch_templates.insert(resolved, &descriptor.path);
        }

        for descriptor in self.staged {
            dispatcher.attach(descriptor);
        }
        Ok(())
    }
}

/// A group of routes mounted together, e.g. registration or session.
pub trait RouteFamily {
    /// Unique family name; a dispatcher mounts each name once.
    fn name(&self) -> &'static str;

    fn stage(&self, registry: &mut RouteRegistry);
}

/// Shared router that families install into.
#[derive(Default)]
pub struct Dispatcher {
    router: Router,
    live_routes: HashSet<(HttpMethod, String)>,
    templates: HashMap<String, String>,
    families: HashSet<&'static str>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage and install a family through a fresh registry.
    ///
    /// # Errors
    /// [`ConfigurationError::DuplicateFamily`] when the family is already
    /// mounted, or any install error from its routes.
    pub fn mount<F: RouteFamily>(&mut self, family: &F) -> Result<(), ConfigurationError> {
        let name = family.name();
        if self.families.contains(name) {
            return Err(ConfigurationError::DuplicateFamily(name));
        }

        let mut registry = RouteRegistry::new();
        family.stage(&mut registry);
        registry.install(self)?;

        self.families.insert(name);
        debug!("mounted endpoint family {name}");
        Ok(())
    }

    #[must_use]
    pub fn is_live(&self, method: HttpMethod, path: &str) -> bool {
        self.live_routes.contains(&(method, resolve_path(path)))
    }

    #[must_use]
    pub fn is_mounted(&self, family: &str) -> bool {
        self.families.contains(family)
    }

    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }

    fn attach(&mut self, descriptor: RouteDescriptor) {
        let RouteDescriptor {
            method,
            path,
            handler,
        } = descriptor;
        let resolved = resolve_path(&path);

        debug!("installing route {method} {path}");
        // Same-template routes with different methods merge in axum.
        self.router = std::mem::take(&mut self.router).route(&path, handler);
        self.live_routes.insert((method, resolved.clone()));
        self.templates.entry(resolved).or_insert(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    async fn ok() -> &'static str {
        "ok"
    }

    async fn created() -> StatusCode {
        StatusCode::CREATED
    }

    struct Demo;

    impl RouteFamily for Demo {
        fn name(&self) -> &'static str {
            "demo"
        }

        fn stage(&self, registry: &mut RouteRegistry) {
            registry
                .register(HttpMethod::Get, "/items/:id", ok)
                .register(HttpMethod::Post, "/items/:id", created);
        }
    }

    #[test]
    fn resolve_path_replaces_parameters() {
        assert_eq!(resolve_path("/a/:x/b"), "/a/:/b");
        assert_eq!(resolve_path("/a/:y/b/"), "/a/:/b/");
        assert_eq!(resolve_path("/files/*rest"), "/files/*");
        assert_eq!(resolve_path("/"), "/");
    }

    #[test]
    fn register_only_stages() {
        let mut registry = RouteRegistry::new();
        registry.register(HttpMethod::Get, "/a", ok);
        assert_eq!(registry.staged().len(), 1);
        assert_eq!(registry.staged()[0].method, HttpMethod::Get);

        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.is_live(HttpMethod::Get, "/a"));
        drop(registry);
        assert!(!dispatcher.is_live(HttpMethod::Get, "/a"));
    }

    #[test]
    fn install_rejects_live_duplicate() {
        let mut dispatcher = Dispatcher::new();
        let mut first = RouteRegistry::new();
        first.register(HttpMethod::Get, "/users/:name", ok);
        assert!(first.install(&mut dispatcher).is_ok());

        let mut second = RouteRegistry::new();
        second.register(HttpMethod::Get, "/users/:name", ok);
        assert_eq!(
            second.install(&mut dispatcher),
            Err(ConfigurationError::DuplicateRoute {
                method: HttpMethod::Get,
                path: "/users/:name".to_string(),
            })
        );
    }

    #[test]
    fn install_rejects_duplicate_within_batch_atomically() {
        let mut dispatcher = Dispatcher::new();
        let mut registry = RouteRegistry::new();
        registry
            .register(HttpMethod::Post, "/fresh", created)
            .register(HttpMethod::Get, "/twice", ok)
            .register(HttpMethod::Get, "/twice", ok);

        assert!(matches!(
            registry.install(&mut dispatcher),
            Err(ConfigurationError::DuplicateRoute { .. })
        ));
        assert!(!dispatcher.is_live(HttpMethod::Post, "/fresh"));
    }

    #[test]
    fn install_rejects_renamed_parameters() {
        let mut dispatcher = Dispatcher::new();
        let mut first = RouteRegistry::new();
        first.register(HttpMethod::Get, "/users/:name", ok);
        assert!(first.install(&mut dispatcher).is_ok());

        let mut same_method = RouteRegistry::new();
        same_method.register(HttpMethod::Get, "/users/:id", ok);
        assert!(matches!(
            same_method.install(&mut dispatcher),
            Err(ConfigurationError::DuplicateRoute { .. })
        ));

        let mut other_method = RouteRegistry::new();
        other_method.register(HttpMethod::Delete, "/users/:id", ok);
        assert_eq!(
            other_method.install(&mut dispatcher),
            Err(ConfigurationError::ConflictingTemplate {
                path: "/users/:id".to_string(),
                existing: "/users/:name".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn trailing_slash_is_a_distinct_route() -> Result<()> {
        let mut dispatcher = Dispatcher::new();
        let mut registry = RouteRegistry::new();
        registry
            .register(HttpMethod::Get, "/a", ok)
            .register(HttpMethod::Get, "/a/", created);
        registry.install(&mut dispatcher)?;
        assert!(dispatcher.is_live(HttpMethod::Get, "/a"));
        assert!(dispatcher.is_live(HttpMethod::Get, "/a/"));

        let router = dispatcher.into_router();
        let response = router
            .clone()
            .oneshot(Request::get("/a").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let response = router
            .oneshot(Request::get("/a/").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        Ok(())
    }

    #[test]
    fn mount_rejects_second_instance_of_family() {
        let mut dispatcher = Dispatcher::new();
        assert!(dispatcher.mount(&Demo).is_ok());
        assert!(dispatcher.is_mounted("demo"));
        assert_eq!(
            dispatcher.mount(&Demo),
            Err(ConfigurationError::DuplicateFamily("demo"))
        );
    }

    #[tokio::test]
    async fn installed_routes_dispatch_by_method() -> Result<()> {
        let mut dispatcher = Dispatcher::new();
        dispatcher.mount(&Demo)?;
        let router = dispatcher.into_router();

        let response = router
            .clone()
            .oneshot(Request::get("/items/7").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(Request::post("/items/7").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(Request::delete("/items/7").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        Ok(())
    }
}
