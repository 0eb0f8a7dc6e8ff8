//! Runtime side of a generated client: settings, authentication providers,
//! the transport seam, and request-builder navigation over the assembled
//! tree.
//!
//! Transports and token acquisition are external; this module only defines
//! the interfaces they plug into.
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::bind::ParameterLocation;
use crate::document::HttpMethod;
use crate::path_de;
use crate::tree::{split_path, PathSegment, RequestBuilderTree, PLACEHOLDER};
use crate::untyped::UntypedValue;

// ————————————————————————————————————————————————————————————————————————————
// SETTINGS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub custom_headers: IndexMap<String, String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_seconds: 100,
            max_retries: 3,
            custom_headers: IndexMap::new(),
        }
    }
}

impl ClientSettings {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ERRORS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestBuildError {
    #[error("{path}: no segment `{segment}`")]
    UnknownSegment { path: String, segment: String },
    #[error("{path}: no templated child")]
    NoTemplateChild { path: String },
    #[error("{path}: `{segment}` expects {expected} value(s), got {got}")]
    ParameterCount {
        path: String,
        segment: String,
        expected: usize,
        got: usize,
    },
    #[error("{path}: no {method} operation")]
    NoSuchOperation { path: String, method: HttpMethod },
    #[error("{path}: required query parameter `{name}` missing")]
    MissingQueryParameter { path: String, name: String },
    #[error("{path}: no value for path parameter `{name}`")]
    MissingPathParameter { path: String, name: String },
    #[error("invalid base URL {base:?}: {message}")]
    InvalidBaseUrl { base: String, message: String },
    #[error("could not encode request body: {message}")]
    Body { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("refusing to send credentials over {scheme} to {host}")]
    InsecureScheme { scheme: String, host: String },
    #[error("credential unavailable: {message}")]
    Unavailable { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {message}")]
    Failed { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Build(#[from] RequestBuildError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server answered {status}")]
    Status { status: u16, body: Vec<u8> },
    #[error("response body does not match the expected type: {0}")]
    Decode(#[from] path_de::PathError),
}

// ————————————————————————————————————————————————————————————————————————————
// REQUEST INFORMATION
// ————————————————————————————————————————————————————————————————————————————

/// A request before the base URL, settings and credentials are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInformation {
    pub method: HttpMethod,
    /// e.g. `/authors/{olid}`
    pub path_template: String,
    pub path_params: IndexMap<String, String>,
    pub query: IndexMap<String, String>,
    pub headers: IndexMap<String, String>,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl RequestInformation {
    pub fn new(method: HttpMethod, path_template: impl Into<String>) -> Self {
        Self {
            method,
            path_template: path_template.into(),
            path_params: IndexMap::new(),
            query: IndexMap::new(),
            headers: IndexMap::new(),
            content_type: None,
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body);
        self
    }

    pub fn with_json_body<T: Serialize>(self, body: &T) -> Result<Self, RequestBuildError> {
        let bytes = serde_json::to_vec(body).map_err(|e| RequestBuildError::Body { message: e.to_string() })?;
        Ok(self.with_body("application/json", bytes))
    }

    /// Absolute URL: base, then the template with placeholders substituted
    /// and percent-encoded, then the query.
    pub fn url(&self, base: &str) -> Result<Url, RequestBuildError> {
        let invalid = |message: String| RequestBuildError::InvalidBaseUrl { base: base.to_string(), message };
        let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| invalid("cannot be a base".to_string()))?;
            segments.pop_if_empty();
            for text in split_path(&self.path_template) {
                segments.push(&self.substitute(text)?);
            }
        }
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }

    /// One pass over the segment; substituted values are never rescanned.
    /// Percent-encoding happens once, when the segment is pushed.
    fn substitute(&self, segment: &str) -> Result<String, RequestBuildError> {
        let mut missing = None;
        let out = PLACEHOLDER.replace_all(segment, |caps: &regex::Captures<'_>| {
            match self.path_params.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(RequestBuildError::MissingPathParameter {
                path: self.path_template.clone(),
                name,
            }),
            None => Ok(out.into_owned()),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// AUTHENTICATION
// ————————————————————————————————————————————————————————————————————————————

/// Credential material for one outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Header { name: String, value: String },
    Query { name: String, value: String },
}

/// Produces credentials for a target URL. `Ok(None)` sends the request
/// without any.
pub trait AuthenticationProvider: Send + Sync {
    fn credential(&self, target: &Url) -> Result<Option<Credential>, AuthError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousAuthenticationProvider;

impl AuthenticationProvider for AnonymousAuthenticationProvider {
    fn credential(&self, _target: &Url) -> Result<Option<Credential>, AuthError> {
        Ok(None)
    }
}

/// Hosts a credential may be sent to. Empty allows every host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedHosts(Vec<String>);

impl AllowedHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(hosts.into_iter().map(|h| h.into().to_ascii_lowercase()).collect())
    }

    pub fn allows(&self, target: &Url) -> bool {
        match target.host_str() {
            Some(host) => self.0.is_empty() || self.0.iter().any(|h| h.eq_ignore_ascii_case(host)),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiKeyLocation {
    Header,
    Query,
}

#[derive(Debug, Clone)]
pub struct ApiKeyAuthenticationProvider {
    key: String,
    parameter_name: String,
    location: ApiKeyLocation,
    allowed_hosts: AllowedHosts,
}

impl ApiKeyAuthenticationProvider {
    pub fn new(key: impl Into<String>, parameter_name: impl Into<String>, location: ApiKeyLocation) -> Self {
        Self {
            key: key.into(),
            parameter_name: parameter_name.into(),
            location,
            allowed_hosts: AllowedHosts::default(),
        }
    }

    pub fn allowed_hosts(mut self, hosts: AllowedHosts) -> Self {
        self.allowed_hosts = hosts;
        self
    }
}

impl AuthenticationProvider for ApiKeyAuthenticationProvider {
    fn credential(&self, target: &Url) -> Result<Option<Credential>, AuthError> {
        if !self.allowed_hosts.allows(target) {
            return Ok(None);
        }
        require_https(target)?;
        let name = self.parameter_name.clone();
        let value = self.key.clone();
        Ok(Some(match self.location {
            ApiKeyLocation::Header => Credential::Header { name, value },
            ApiKeyLocation::Query => Credential::Query { name, value },
        }))
    }
}

#[derive(Debug, Clone)]
pub struct BearerTokenAuthenticationProvider {
    token: String,
    allowed_hosts: AllowedHosts,
}

impl BearerTokenAuthenticationProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), allowed_hosts: AllowedHosts::default() }
    }

    pub fn allowed_hosts(mut self, hosts: AllowedHosts) -> Self {
        self.allowed_hosts = hosts;
        self
    }
}

impl AuthenticationProvider for BearerTokenAuthenticationProvider {
    fn credential(&self, target: &Url) -> Result<Option<Credential>, AuthError> {
        if !self.allowed_hosts.allows(target) {
            tracing::debug!(host = target.host_str(), "host not allowed, no bearer token attached");
            return Ok(None);
        }
        require_https(target)?;
        if self.token.is_empty() {
            return Err(AuthError::Unavailable { message: "empty bearer token".to_string() });
        }
        Ok(Some(Credential::Header {
            name: "Authorization".to_string(),
            value: format!("Bearer {}", self.token),
        }))
    }
}

/// Credentials go over https only; loopback hosts are exempt.
fn require_https(target: &Url) -> Result<(), AuthError> {
    let host = target.host_str().unwrap_or_default();
    let loopback = matches!(host, "localhost" | "127.0.0.1" | "[::1]");
    if target.scheme() == "https" || loopback {
        Ok(())
    } else {
        Err(AuthError::InsecureScheme {
            scheme: target.scheme().to_string(),
            host: host.to_string(),
        })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TRANSPORT
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: IndexMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Policy knobs for the transport to honor.
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: IndexMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request. Retries and timeouts are the implementor's business.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Joins settings, credentials and a transport.
pub struct RequestAdapter {
    settings: ClientSettings,
    auth: Arc<dyn AuthenticationProvider>,
    transport: Arc<dyn HttpTransport>,
}

impl RequestAdapter {
    pub fn new(
        settings: ClientSettings,
        auth: Arc<dyn AuthenticationProvider>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self { settings, auth, transport }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn prepare(&self, info: &RequestInformation) -> Result<HttpRequest, ClientError> {
        let mut url = info.url(&self.settings.base_url)?;
        let mut headers = self.settings.custom_headers.clone();
        headers.extend(info.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(content_type) = &info.content_type {
            headers.insert("Content-Type".to_string(), content_type.clone());
        }
        match self.auth.credential(&url)? {
            None => {}
            Some(Credential::Header { name, value }) => {
                headers.insert(name, value);
            }
            Some(Credential::Query { name, value }) => {
                url.query_pairs_mut().append_pair(&name, &value);
            }
        }
        Ok(HttpRequest {
            method: info.method,
            url,
            headers,
            body: info.body.clone(),
            timeout: self.settings.timeout(),
            max_retries: self.settings.max_retries,
        })
    }

    /// Send and return the raw response; non-2xx is an error.
    pub fn send_bytes(&self, info: &RequestInformation) -> Result<HttpResponse, ClientError> {
        let request = self.prepare(info)?;
        tracing::debug!(method = %request.method, url = %request.url, "sending request");
        let response = self.transport.send(&request)?;
        if !response.is_success() {
            return Err(ClientError::Status { status: response.status, body: response.body });
        }
        Ok(response)
    }

    /// Decode into a typed model. An empty body decodes to `None`.
    pub fn send_typed<T: DeserializeOwned>(&self, info: &RequestInformation) -> Result<Option<T>, ClientError> {
        let response = self.send_bytes(info)?;
        if response.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(path_de::from_slice_with_path(&response.body)?))
    }

    /// Decode without a schema. An empty body is `Null`.
    pub fn send_untyped(&self, info: &RequestInformation) -> Result<UntypedValue, ClientError> {
        Ok(self.send_typed::<UntypedValue>(info)?.unwrap_or_default())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// NAVIGATION
// ————————————————————————————————————————————————————————————————————————————

/// Position in the request-builder tree plus the path values collected on
/// the way down.
#[derive(Debug, Clone)]
pub struct RequestBuilder<'t> {
    node: &'t PathSegment,
    path: String,
    path_params: IndexMap<String, String>,
}

impl<'t> RequestBuilder<'t> {
    pub fn new(tree: &'t RequestBuilderTree) -> Self {
        Self {
            node: tree.root(),
            path: String::new(),
            path_params: IndexMap::new(),
        }
    }

    pub fn node(&self) -> &'t PathSegment {
        self.node
    }

    /// Template from the root, e.g. `/authors/{olid}`.
    pub fn path(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }

    fn descend(&self, child: &'t PathSegment) -> Self {
        Self {
            node: child,
            path: format!("{}/{}", self.path, child.text()),
            path_params: self.path_params.clone(),
        }
    }

    /// Step into a literal child.
    pub fn segment(&self, text: &str) -> Result<Self, RequestBuildError> {
        match self.node.children().iter().find(|c| !c.is_template() && c.text() == text) {
            Some(child) => Ok(self.descend(child)),
            None => Err(RequestBuildError::UnknownSegment {
                path: self.path().to_string(),
                segment: text.to_string(),
            }),
        }
    }

    /// Step into the templated child, binding its single placeholder. With
    /// affixed siblings (`{olid}`, `{olid}.json`) the bare one is taken; see
    /// [`RequestBuilder::templated`].
    pub fn item(&self, value: impl Into<String>) -> Result<Self, RequestBuildError> {
        let value = value.into();
        let child = self.template_child()?;
        let [name] = child.params() else {
            return Err(RequestBuildError::ParameterCount {
                path: self.path().to_string(),
                segment: child.text().to_string(),
                expected: child.params().len(),
                got: 1,
            });
        };
        let mut next = self.descend(child);
        next.path_params.insert(name.clone(), value);
        Ok(next)
    }

    /// Step into the templated child, binding placeholders by name.
    pub fn item_with(&self, values: &[(&str, &str)]) -> Result<Self, RequestBuildError> {
        let child = self.template_child()?;
        self.bind(child, values)
    }

    /// Step into the templated child whose text is `text`, e.g.
    /// `{olid}.json` next to `{olid}`.
    pub fn templated(&self, text: &str, values: &[(&str, &str)]) -> Result<Self, RequestBuildError> {
        match self.node.template_children().find(|c| c.text() == text) {
            Some(child) => self.bind(child, values),
            None => Err(RequestBuildError::UnknownSegment {
                path: self.path().to_string(),
                segment: text.to_string(),
            }),
        }
    }

    fn bind(&self, child: &'t PathSegment, values: &[(&str, &str)]) -> Result<Self, RequestBuildError> {
        let mut next = self.descend(child);
        for name in child.params() {
            let Some((_, value)) = values.iter().find(|(n, _)| n == name) else {
                return Err(RequestBuildError::ParameterCount {
                    path: self.path().to_string(),
                    segment: child.text().to_string(),
                    expected: child.params().len(),
                    got: values.len(),
                });
            };
            next.path_params.insert(name.clone(), value.to_string());
        }
        Ok(next)
    }

    fn template_child(&self) -> Result<&'t PathSegment, RequestBuildError> {
        self.node.template_child().ok_or_else(|| RequestBuildError::NoTemplateChild {
            path: self.path().to_string(),
        })
    }

    /// Build the request for one of this node's operations. Required query
    /// parameters must be present in `query`.
    pub fn request(&self, method: HttpMethod, query: &[(&str, &str)]) -> Result<RequestInformation, RequestBuildError> {
        let op = self.node.operation(method).ok_or_else(|| RequestBuildError::NoSuchOperation {
            path: self.path().to_string(),
            method,
        })?;
        for parameter in op.parameters_in(ParameterLocation::Query).filter(|p| p.required) {
            if !query.iter().any(|(name, _)| *name == parameter.name) {
                return Err(RequestBuildError::MissingQueryParameter {
                    path: self.path().to_string(),
                    name: parameter.name.clone(),
                });
            }
        }
        let mut info = RequestInformation::new(method, self.path());
        info.path_params = self.path_params.clone();
        info.query = query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Ok(info)
    }
}
