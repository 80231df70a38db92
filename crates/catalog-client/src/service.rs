//! `reqwest` implementation of the engine's endpoint traits.
//!
//! # Design
//! - One service per view: routes name the collection, mutation and job
//!   paths the view talks to.
//! - Every call races the caller's token (list fetches) or the service's
//!   own shutdown token (mutations, jobs) and yields `Cancelled` when the
//!   token fires first, including while the body is being read.
//! - Non-2xx answers become `EngineError::Server`; transport and decoding
//!   failures become `EngineError::Network`.

use async_trait::async_trait;
use catalog_api_models::{
    GenerateJobRequest, JobStatusResponse, ListResponse, MutationReply, MutationRequest,
};
use catalog_config::EngineConfig;
use catalog_engine::{
    CancellationToken, EngineError, EngineResult, FetchRequest, FetchResult, JobEndpoint,
    ListSource, MutationEndpoint, MutationIntent, RowId,
};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use tracing::{debug, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::problem::classify_problem;
use crate::routes::{MutationRoute, ServiceRoutes};

/// Header carrying the per-request correlation id.
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// Header carrying the configured API key.
pub const HEADER_API_KEY: &str = "x-catalog-api-key";

/// Remote data service for one view.
#[derive(Clone)]
pub struct HttpDataService {
    client: Client,
    base: Url,
    routes: ServiceRoutes,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for HttpDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDataService")
            .field("base", &self.base.as_str())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl HttpDataService {
    /// Service rooted at `config.base_url`, authenticating with
    /// `config.api_key` when present.
    ///
    /// # Errors
    ///
    /// Returns an error when the base URL cannot carry paths, the API key is
    /// not a valid header value, or the HTTP client cannot be built.
    pub fn new(config: &EngineConfig, routes: ServiceRoutes) -> ClientResult<Self> {
        let base = parse_base(&config.base_url)?;

        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref() {
            let value = HeaderValue::from_str(key).map_err(|_| ClientError::InvalidApiKey)?;
            headers.insert(HEADER_API_KEY, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|source| ClientError::HttpClient { source })?;

        Ok(Self {
            client,
            base,
            routes,
            shutdown: CancellationToken::new(),
        })
    }

    /// Routes this service talks to.
    #[must_use]
    pub const fn routes(&self) -> &ServiceRoutes {
        &self.routes
    }

    /// Abort outstanding and future mutation and job calls.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn url(&self, path: &str) -> EngineResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| EngineError::network("url", "base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn job_url(&self, action: &str) -> EngineResult<Url> {
        let job = self.routes.job.as_deref().ok_or_else(|| EngineError::Validation {
            field: "job".into(),
            reason: "no job route configured".into(),
        })?;
        self.url(&format!("{job}/{action}"))
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<u8>> {
        let request_id = Uuid::new_v4().to_string();
        let request = request.header(HEADER_REQUEST_ID, &request_id);

        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|err| EngineError::network(operation, err))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|err| EngineError::network(operation, err))?;
            Ok::<_, EngineError>((status, body))
        };

        let (status, body) = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                trace!(operation, request_id = %request_id, "request cancelled");
                return Err(EngineError::Cancelled);
            }
            result = exchange => result?,
        };

        if status.is_success() {
            debug!(operation, request_id = %request_id, status = status.as_u16(), "request succeeded");
            Ok(body.to_vec())
        } else {
            let err = classify_problem(status, &body);
            warn!(operation, request_id = %request_id, status = status.as_u16(), error = %err, "request rejected");
            Err(err)
        }
    }

    fn to_result(&self, request: &FetchRequest, response: ListResponse) -> FetchResult {
        let received = response.items.len();
        let items: Vec<_> = response
            .items
            .into_iter()
            .filter_map(|item| self.routes.row_key.row(item))
            .collect();
        if items.len() < received {
            warn!(
                collection = %self.routes.collection,
                dropped = received - items.len(),
                "list items without an identifier were dropped"
            );
        }
        FetchResult {
            items,
            total: response.total,
            page: response.page,
            page_size: if response.page_size == 0 {
                request.page_size
            } else {
                response.page_size
            },
        }
    }
}

fn parse_base(value: &str) -> ClientResult<Url> {
    let url = Url::parse(value).map_err(|err| ClientError::InvalidBaseUrl {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidBaseUrl {
            value: value.to_string(),
            reason: "URL cannot carry a path".into(),
        });
    }
    Ok(url)
}

fn decode<T: serde::de::DeserializeOwned>(operation: &'static str, body: &[u8]) -> EngineResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| EngineError::network(operation, format!("invalid response body: {err}")))
}

#[async_trait]
impl ListSource for HttpDataService {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: CancellationToken,
    ) -> EngineResult<FetchResult> {
        let mut url = self.url(&self.routes.collection)?;
        if !request.query.is_empty() {
            url.set_query(Some(&request.query));
        }
        debug!(seq = request.seq, url = %url, "list request");
        let body = self.send("list", self.client.get(url), &cancel).await?;
        let response: ListResponse = decode("list", &body)?;
        Ok(self.to_result(request, response))
    }
}

#[async_trait]
impl MutationEndpoint for HttpDataService {
    async fn mutate(&self, intent: &MutationIntent) -> EngineResult<MutationReply> {
        let MutationRoute { method, resource } = self
            .routes
            .mutations
            .as_ref()
            .map(|routes| routes.for_field(&intent.field).clone())
            .ok_or_else(|| EngineError::Validation {
                field: "mutations".into(),
                reason: "no mutation route configured".into(),
            })?;
        let url = self.url(&resource)?;
        let payload = MutationRequest {
            id: intent.target.to_string(),
            field: intent.field.clone(),
            value: intent.next_value.clone(),
        };
        debug!(row_id = %intent.target, field = %intent.field, url = %url, "mutation request");
        let request = self.client.request(method.as_method(), url).json(&payload);
        let body = self.send("mutate", request, &self.shutdown).await?;
        Ok(MutationReply::from_body(&body))
    }
}

#[async_trait]
impl JobEndpoint for HttpDataService {
    async fn start(&self, targets: Option<&[RowId]>) -> EngineResult<()> {
        let url = self.job_url("generate")?;
        let payload = GenerateJobRequest {
            ids: targets.map(|ids| ids.iter().map(ToString::to_string).collect()),
        };
        let request = self.client.request(Method::POST, url).json(&payload);
        self.send("job_start", request, &self.shutdown).await?;
        Ok(())
    }

    async fn status(&self) -> EngineResult<JobStatusResponse> {
        let url = self.job_url("status")?;
        let body = self
            .send("job_status", self.client.get(url), &self.shutdown)
            .await?;
        decode("job_status", &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(base: &str) -> ClientResult<HttpDataService> {
        let config = EngineConfig {
            base_url: base.to_string(),
            ..EngineConfig::default()
        };
        HttpDataService::new(&config, ServiceRoutes::new("products").job("jobs/drafts"))
    }

    #[test]
    fn paths_are_joined_below_the_base() -> anyhow::Result<()> {
        let service = service("http://catalog.test/api/")?;
        assert_eq!(
            service.url("/products")?.as_str(),
            "http://catalog.test/api/products"
        );
        assert_eq!(
            service.job_url("status")?.as_str(),
            "http://catalog.test/api/jobs/drafts/status"
        );
        Ok(())
    }

    #[test]
    fn base_without_trailing_slash_keeps_its_path() -> anyhow::Result<()> {
        let service = service("http://catalog.test/api")?;
        assert_eq!(
            service.url("products")?.as_str(),
            "http://catalog.test/api/products"
        );
        Ok(())
    }

    #[test]
    fn unusable_base_urls_are_rejected() {
        assert!(matches!(
            service("not a url"),
            Err(ClientError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            service("mailto:ops@catalog.test"),
            Err(ClientError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn api_keys_must_be_header_safe() {
        let config = EngineConfig {
            api_key: Some("bad\nkey".into()),
            ..EngineConfig::default()
        };
        assert!(matches!(
            HttpDataService::new(&config, ServiceRoutes::new("products")),
            Err(ClientError::InvalidApiKey)
        ));
    }

    #[test]
    fn missing_page_size_falls_back_to_the_request() -> anyhow::Result<()> {
        let service = service("http://catalog.test")?;
        let schema = catalog_engine::FilterSchema::new(Vec::new())?;
        let request = FetchRequest {
            seq: 1,
            filter: schema.defaults(),
            query: String::new(),
            page: 1,
            page_size: 25,
        };
        let response = ListResponse {
            items: vec![serde_json::json!({"id": "a"}), serde_json::json!({"title": "no id"})],
            total: 2,
            page: 1,
            page_size: 0,
        };
        let result = service.to_result(&request, response);
        assert_eq!(result.page_size, 25);
        assert_eq!(result.items.len(), 1);
        Ok(())
    }
}
