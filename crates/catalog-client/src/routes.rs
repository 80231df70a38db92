//! Endpoint paths for one list view.

use std::collections::HashMap;

use catalog_engine::RowKey;
use reqwest::Method;

/// HTTP verb used by a mutation route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMethod {
    /// `POST`
    Post,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl MutationMethod {
    pub(crate) fn as_method(self) -> Method {
        match self {
            Self::Post => Method::POST,
            Self::Patch => Method::PATCH,
            Self::Delete => Method::DELETE,
        }
    }
}

/// Verb and resource path of one mutation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRoute {
    /// HTTP verb.
    pub method: MutationMethod,
    /// Path below the service root.
    pub resource: String,
}

impl MutationRoute {
    /// `POST {resource}`.
    #[must_use]
    pub fn post(resource: impl Into<String>) -> Self {
        Self {
            method: MutationMethod::Post,
            resource: resource.into(),
        }
    }

    /// `PATCH {resource}`.
    #[must_use]
    pub fn patch(resource: impl Into<String>) -> Self {
        Self {
            method: MutationMethod::Patch,
            resource: resource.into(),
        }
    }

    /// `DELETE {resource}`.
    #[must_use]
    pub fn delete(resource: impl Into<String>) -> Self {
        Self {
            method: MutationMethod::Delete,
            resource: resource.into(),
        }
    }
}

/// Mutation routes keyed by the changed field, with a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRoutes {
    fallback: MutationRoute,
    by_field: HashMap<String, MutationRoute>,
}

impl MutationRoutes {
    /// Routes sending every field change to `fallback`.
    #[must_use]
    pub fn new(fallback: MutationRoute) -> Self {
        Self {
            fallback,
            by_field: HashMap::new(),
        }
    }

    /// Send changes of `field` to `route` instead.
    #[must_use]
    pub fn route_field(mut self, field: impl Into<String>, route: MutationRoute) -> Self {
        self.by_field.insert(field.into(), route);
        self
    }

    /// Route handling changes of `field`.
    #[must_use]
    pub fn for_field(&self, field: &str) -> &MutationRoute {
        self.by_field.get(field).unwrap_or(&self.fallback)
    }
}

/// Everything a view needs to reach its data.
#[derive(Debug, Clone)]
pub struct ServiceRoutes {
    /// Collection path for list requests.
    pub collection: String,
    /// Fields identifying a row in list items.
    pub row_key: RowKey,
    /// Mutation endpoints; `None` for read-only views.
    pub mutations: Option<MutationRoutes>,
    /// Job path (`{job}/generate`, `{job}/status`); `None` without a job.
    pub job: Option<String>,
}

impl ServiceRoutes {
    /// Read-only routes for `collection`, keyed by `id`.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            row_key: RowKey::single("id"),
            mutations: None,
            job: None,
        }
    }

    /// Identify rows by `key` instead of `id`.
    #[must_use]
    pub fn row_key(mut self, key: RowKey) -> Self {
        self.row_key = key;
        self
    }

    /// Enable mutations through `routes`.
    #[must_use]
    pub fn mutations(mut self, routes: MutationRoutes) -> Self {
        self.mutations = Some(routes);
        self
    }

    /// Enable the generation job at `path`.
    #[must_use]
    pub fn job(mut self, path: impl Into<String>) -> Self {
        self.job = Some(path.into());
        self
    }
}
