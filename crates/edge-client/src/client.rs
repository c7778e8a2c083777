use crate::error::FetchError;
use crate::response::FetchResponse;
use crate::ProxyEndpoint;
use core_tagging::{tag_with, RoutingTag, TagFormat, GROUP_HEADER};
use core_trust::TrustEvaluator;
use reqwest::header::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ProxyClientBuilder {
    evaluator: Arc<TrustEvaluator>,
    endpoint: ProxyEndpoint,
    group_header: String,
    timeout: Duration,
    tag_format: TagFormat,
}

impl ProxyClientBuilder {
    pub fn endpoint(mut self, endpoint: ProxyEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn group_header(mut self, name: impl Into<String>) -> Self {
        self.group_header = name.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tag_format(mut self, format: TagFormat) -> Self {
        self.tag_format = format;
        self
    }

    pub fn build(self) -> Result<ProxyClient, FetchError> {
        let group_header = HeaderName::from_bytes(self.group_header.as_bytes())
            .map_err(|e| FetchError::Config(format!("group header '{}': {e}", self.group_header)))?;
        let proxy = reqwest::Proxy::all(self.endpoint.url())
            .map_err(|e| FetchError::Config(format!("proxy {}: {e}", self.endpoint.url())))?;
        let tls = core_trust::client_config(Arc::clone(&self.evaluator), &["http/1.1"]);
        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;
        info!(proxy = %self.endpoint.authority(), header = %group_header, "proxy client ready");
        Ok(ProxyClient {
            http,
            evaluator: self.evaluator,
            endpoint: self.endpoint,
            group_header,
            tag_format: self.tag_format,
        })
    }
}

/// Cheap to clone; clones share the connection pool and the trust anchors.
#[derive(Clone)]
pub struct ProxyClient {
    http: reqwest::Client,
    evaluator: Arc<TrustEvaluator>,
    endpoint: ProxyEndpoint,
    group_header: HeaderName,
    tag_format: TagFormat,
}

impl ProxyClient {
    pub fn builder(evaluator: Arc<TrustEvaluator>) -> ProxyClientBuilder {
        ProxyClientBuilder {
            evaluator,
            endpoint: ProxyEndpoint::default(),
            group_header: GROUP_HEADER.to_string(),
            timeout: DEFAULT_TIMEOUT,
            tag_format: TagFormat::default(),
        }
    }

    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn evaluator(&self) -> &Arc<TrustEvaluator> {
        &self.evaluator
    }

    /// Tag `url` the way this client is configured to.
    pub fn tag(&self, url: &str) -> RoutingTag {
        tag_with(url, self.tag_format)
    }

    /// GET `url` through the proxy, sending `tag` in the group header.
    /// An empty tag sends no header.
    pub async fn fetch(&self, url: &str, tag: &RoutingTag) -> Result<FetchResponse, FetchError> {
        let target = parse_target(url)?;
        if target.scheme() == "https" {
            // fail before dialing if the anchor is not there yet
            let anchors = self.evaluator.accepted_issuers()?;
            debug!(anchors = anchors.len(), "trust anchors ready");
        }

        let mut req = self.http.get(target);
        if !tag.is_empty() {
            match HeaderValue::from_str(tag.as_str()) {
                Ok(v) => req = req.header(self.group_header.clone(), v),
                Err(_) => warn!(%tag, "tag is not a valid header value; sent untagged"),
            }
        }

        info!(%url, %tag, "fetch");
        let result = match req.send().await {
            Ok(resp) => FetchResponse::read(resp).await.map_err(FetchError::from),
            Err(e) => Err(FetchError::from(e)),
        };
        match &result {
            Ok(resp) => info!(%url, status = resp.status.as_u16(), bytes = resp.body.len(), "fetch done"),
            Err(e) => warn!(%url, kind = e.type_name(), error = %e, "fetch failed"),
        }
        result
    }

    /// [`fetch`](Self::fetch) with the tag derived from `url`.
    pub async fn fetch_tagged(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let tag = self.tag(url);
        self.fetch(url, &tag).await
    }

    /// Run the fetch on its own task and hand the outcome to `callback`.
    pub fn fetch_with<F>(&self, url: impl Into<String>, tag: RoutingTag, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<FetchResponse, FetchError>) + Send + 'static,
    {
        let this = self.clone();
        let url = url.into();
        tokio::spawn(async move {
            let result = this.fetch(&url, &tag).await;
            callback(result);
        })
    }
}

fn parse_target(url: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUrl { url: url.to_string(), reason };
    let parsed = Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}
