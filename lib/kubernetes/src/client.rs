use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use retry::{Classify, ErrorKind};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::ObjectList;
use super::config::{self, Auth, Config};
use super::resource::Resource;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(config::Error),
    #[error("build http request failed, {0}")]
    BuildRequest(http::Error),
    #[error("read http response failed, {0}")]
    ReadResponse(hyper::Error),
    #[error(transparent)]
    Http(hyper_util::client::legacy::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid request, {0}")]
    Validation(String),
    #[error("api server error, status: {}, reason: {}, message: {}", .0.code, .0.reason, .0.message)]
    Api(ErrorResponse),
    #[error("serialize request failed, {0}")]
    Serialize(serde_json::Error),
    #[error("deserialize response failed, {0}")]
    Deserialize(serde_json::Error),
    #[error("refresh token failed, {0}")]
    RefreshToken(std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialize(err)
    }
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::ReadResponse(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::BuildRequest(err)
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Api(resp) => resp.kind(),
            Error::Http(_) | Error::ReadResponse(_) | Error::Timeout(_) => ErrorKind::Transport,
            Error::Config(_) | Error::Validation(_) => ErrorKind::InvalidConfiguration,
            Error::RefreshToken(_) => ErrorKind::PermissionDenied,
            Error::BuildRequest(_) | Error::Serialize(_) | Error::Deserialize(_) => {
                ErrorKind::Other
            }
        }
    }
}

/// An error response from the API, a `Status` object with status `Failure`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorResponse {
    /// The status
    #[serde(default)]
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error, e.g. `Conflict`, `NotFound` or `AlreadyExists`
    #[serde(default)]
    pub reason: String,
    /// The error code
    #[serde(default)]
    pub code: u16,
}

impl ErrorResponse {
    /// Used when the server answered with a body that is not a `Status`.
    fn from_status(status: StatusCode, body: &[u8]) -> Self {
        ErrorResponse {
            status: String::from("Failure"),
            message: String::from_utf8_lossy(body).trim().to_string(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            code: status.as_u16(),
        }
    }

    /// Both a stale `resourceVersion` and a create with an existing name are
    /// answered with 409, only the former is a write conflict.
    fn kind(&self) -> ErrorKind {
        match (self.code, self.reason.as_str()) {
            (409, "AlreadyExists") => ErrorKind::Other,
            (409, _) => ErrorKind::Conflict,
            (404, _) | (410, _) => ErrorKind::NotFound,
            (401, _) | (403, _) => ErrorKind::PermissionDenied,
            (429, _) | (500..=599, _) => ErrorKind::Transport,
            _ => ErrorKind::Other,
        }
    }
}

/// Controls how the resource version parameter is applied for list calls
///
/// Not specifying a `VersionMatch` strategy will give you different semantics
/// depending on what `resource_version`, `limit`, `continue_token` you include
/// with the list request.
///
/// See <https://kubernetes.io/docs/reference/using-api/api-concepts/#semantics-for-get-and-list> for details.
#[derive(Debug, PartialEq)]
pub enum VersionMatch {
    /// Returns data at least as new as the provided resource version.
    NotOlderThan,

    /// Return data at the exact resource version provided.
    ///
    /// Note that `Exact` cannot be used with resource version "0".
    Exact,
}

/// Common query parameters used in list calls on collections
#[derive(Debug, Default)]
pub struct ListParams {
    /// A selector to restrict the list of returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict the list of returned objects by their fields.
    pub field_selector: Option<String>,

    /// Limit the number of results
    ///
    /// If there are more results, the server will respond with a continue token
    /// which can be used to fetch another page of results.
    pub limit: Option<u32>,

    /// Fetch a second page of results.
    pub continue_token: Option<String>,

    /// Determines how resourceVersion is matched applied to list calls
    pub version_match: Option<VersionMatch>,

    /// An explicit resourceVersion using the given `VersionMatch` strategy
    ///
    /// See <https://kubernetes.io/docs/reference/using-api/api-concepts/#resource-versions> for details.
    pub resource_version: Option<String>,
}

impl ListParams {
    fn validate(&self) -> Result<(), Error> {
        if let Some(rv) = &self.resource_version {
            if self.version_match == Some(VersionMatch::Exact) && rv == "0" {
                return Err(Error::Validation(
                    "A non-zero resource_version is required when using an Exact match".into(),
                ));
            }
        } else if self.version_match.is_some() {
            return Err(Error::Validation(
                "A resource_version is required when using an explicit match".into(),
            ));
        }

        Ok(())
    }

    fn query(&self) -> String {
        let mut builder = form_urlencoded::Serializer::new(String::new());

        if let Some(field_selector) = &self.field_selector {
            builder.append_pair("fieldSelector", field_selector);
        }
        if let Some(label_selector) = &self.label_selector {
            builder.append_pair("labelSelector", label_selector);
        }
        if let Some(limit) = &self.limit {
            builder.append_pair("limit", &limit.to_string());
        }
        if let Some(continue_token) = &self.continue_token {
            builder.append_pair("continue", continue_token);
        } else if let Some(resource_version) = &self.resource_version {
            // When there's a continue token, we don't want to set resourceVersion
            if resource_version != "0" || self.limit.is_none() {
                builder.append_pair("resourceVersion", resource_version);

                match self.version_match {
                    None => {}
                    Some(VersionMatch::NotOlderThan) => {
                        builder.append_pair("resourceVersionMatch", "NotOlderThan");
                    }
                    Some(VersionMatch::Exact) => {
                        builder.append_pair("resourceVersionMatch", "Exact");
                    }
                }
            }
        }

        builder.finish()
    }
}

/// A client bound to one namespace. Cloning is cheap, clones share the
/// connection pool.
#[derive(Clone)]
pub struct Client {
    http_client: HttpClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    auth: Auth,
    endpoint: String,
    namespace: String,
    timeout: Duration,
}

impl Client {
    /// Load the configuration (see [`Config::load`]) and build a client for
    /// `namespace`, or the configured default namespace.
    pub fn new(kubeconfig: Option<&Path>, namespace: Option<String>) -> Result<Self, Error> {
        let config = Config::load(kubeconfig).map_err(Error::Config)?;

        Ok(Self::from_config(config, namespace))
    }

    pub fn from_config(config: Config, namespace: Option<String>) -> Self {
        let builder = HttpsConnectorBuilder::new()
            .with_tls_config(config.tls)
            .https_or_http();
        let mut inner = HttpConnector::new();
        inner.enforce_http(false);
        let connector = builder.enable_http1().wrap_connector(inner);

        let http_client = HttpClient::builder(TokioExecutor::new()).build(connector);
        let endpoint = config
            .cluster_url
            .to_string()
            .trim_end_matches('/')
            .to_string();

        Client {
            http_client,
            endpoint,
            auth: config.auth,
            namespace: namespace.unwrap_or(config.default_namespace),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Deadline for a whole request, response body included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn collection_uri<R: Resource>(&self, query: Option<String>) -> String {
        let path = R::url_path(Some(&self.namespace));

        match query {
            Some(query) if !query.is_empty() => format!("{}{path}?{query}", self.endpoint),
            _ => format!("{}{path}", self.endpoint),
        }
    }

    fn object_uri<R: Resource>(&self, name: &str) -> Result<String, Error> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::Validation(format!("invalid object name {name:?}")));
        }

        Ok(format!(
            "{}{}/{name}",
            self.endpoint,
            R::url_path(Some(&self.namespace))
        ))
    }

    /// Fetch a single object by name
    pub async fn get<R: Resource>(&self, name: &str) -> Result<R, Error> {
        let uri = self.object_uri::<R>(name)?;
        let body = self.send(Method::GET, uri, None).await?;

        serde_json::from_slice(&body).map_err(Error::Deserialize)
    }

    /// List a collection of a resource
    pub async fn list<R: Resource>(&self, params: &ListParams) -> Result<ObjectList<R>, Error> {
        params.validate()?;

        let uri = self.collection_uri::<R>(Some(params.query()));
        let body = self.send(Method::GET, uri, None).await?;

        serde_json::from_slice::<ObjectList<R>>(&body).map_err(Error::Deserialize)
    }

    /// Create a new object, the server may assign the name from
    /// `metadata.generateName`.
    pub async fn create<R: Resource>(&self, object: &R) -> Result<R, Error> {
        let uri = self.collection_uri::<R>(None);
        let body = encode(object)?;
        let body = self.send(Method::POST, uri, Some(body)).await?;

        serde_json::from_slice(&body).map_err(Error::Deserialize)
    }

    /// Replace the object named `name` with `object`.
    ///
    /// `metadata.resourceVersion` of `object` must be the current version on
    /// the server, otherwise it answers 409 Conflict.
    pub async fn replace<R: Resource>(&self, name: &str, object: &R) -> Result<R, Error> {
        if object.metadata().resource_version.is_none() {
            return Err(Error::Validation(format!(
                "{} {name} has no resourceVersion to replace",
                R::KIND
            )));
        }

        let uri = self.object_uri::<R>(name)?;
        let body = encode(object)?;
        let body = self.send(Method::PUT, uri, Some(body)).await?;

        serde_json::from_slice(&body).map_err(Error::Deserialize)
    }

    /// Delete the object named `name`.
    pub async fn delete<R: Resource>(&self, name: &str) -> Result<(), Error> {
        let uri = self.object_uri::<R>(name)?;
        self.send(Method::DELETE, uri, None).await?;

        Ok(())
    }

    async fn send(&self, method: Method, uri: String, body: Option<Bytes>) -> Result<Bytes, Error> {
        trace!(message = "doing http request", %method, uri);

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(header::ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let mut req = builder.body(Full::new(body.unwrap_or_default()))?;

        self.auth.apply(&mut req).map_err(Error::RefreshToken)?;

        let (status, body) = tokio::time::timeout(self.timeout, async {
            let resp = self.http_client.request(req).await.map_err(Error::Http)?;
            let (parts, incoming) = resp.into_parts();
            let body = incoming.collect().await?.to_bytes();

            Ok::<_, Error>((parts.status, body))
        })
        .await
        .map_err(|_elapsed| Error::Timeout(self.timeout))??;

        if status.is_success() {
            return Ok(body);
        }

        let err = match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(resp) if resp.code != 0 => resp,
            _ => ErrorResponse::from_status(status, &body),
        };
        debug!(
            message = "api server rejected request",
            %method,
            uri,
            code = err.code,
            reason = err.reason
        );

        Err(Error::Api(err))
    }
}

/// Serialize `object` with `apiVersion` and `kind` filled in.
fn encode<R: Resource>(object: &R) -> Result<Bytes, Error> {
    let mut value = serde_json::to_value(object).map_err(Error::Serialize)?;
    if let Value::Object(map) = &mut value {
        map.insert("apiVersion".into(), Value::String(R::api_version()));
        map.insert("kind".into(), Value::String(R::KIND.into()));
    }

    serde_json::to_vec(&value)
        .map(Bytes::from)
        .map_err(Error::Serialize)
}
