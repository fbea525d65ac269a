//! Document store over a JSON REST API.
//!
//! Layout: `{base}/{collection}/{id}` for single documents and
//! `{base}/{collection}?field=value` for filtered listings.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Report, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{DocumentStore, Filter, Unreachable};
use crate::config::{Config, StoreConfig};

#[derive(Clone)]
pub struct RestDocumentStore {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl RestDocumentStore {
  pub fn new(config: &StoreConfig, token: Option<String>) -> Result<Self> {
    let base =
      Url::parse(&config.url).map_err(|e| eyre!("Invalid store url '{}': {}", config.url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Store url '{}' cannot be used as a base", config.url));
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  /// Build a store from configuration, reading the token from the environment.
  pub fn from_config(config: &Config) -> Result<Self> {
    Self::new(&config.store, Config::get_api_token())
  }

  fn url(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn query_url(&self, collection: &str, filters: &[Filter]) -> Url {
    let mut url = self.url(&[collection]);
    if !filters.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for filter in filters {
        let value = match &filter.value {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        pairs.append_pair(&filter.field, &value);
      }
    }
    url
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let request = self.client.request(method, url);
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
    let response = request.send().await.map_err(|e| transport_error(e, what))?;

    let status = response.status();
    if is_gateway_status(status) {
      return Err(Report::new(Unreachable(format!("{}: HTTP {}", what, status))));
    }
    Ok(response)
  }
}

/// Map a reqwest failure to an error report, marking transport failures.
fn transport_error(e: reqwest::Error, what: &str) -> Report {
  if e.is_connect() || e.is_timeout() || e.is_request() {
    Report::new(Unreachable(format!("{}: {}", what, e)))
  } else {
    eyre!("Failed to {}: {}", what, e)
  }
}

/// Statuses that mean the store is temporarily out of reach.
fn is_gateway_status(status: StatusCode) -> bool {
  matches!(
    status,
    StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
  )
}

fn check_status(response: Response, what: &str) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    Ok(response)
  } else {
    Err(eyre!("Failed to {}: HTTP {}", what, status))
  }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
  async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    let what = format!("get {}/{}", collection, id);
    let response = self
      .send(self.request(Method::GET, self.url(&[collection, id])), &what)
      .await?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }

    let doc = check_status(response, &what)?
      .json::<Value>()
      .await
      .map_err(|e| eyre!("Failed to parse {}: {}", what, e))?;
    Ok(Some(doc))
  }

  async fn set_document(
    &self,
    collection: &str,
    id: &str,
    data: Value,
    merge: bool,
  ) -> Result<()> {
    let what = format!("write {}/{}", collection, id);
    let method = if merge { Method::PATCH } else { Method::PUT };
    let request = self
      .request(method, self.url(&[collection, id]))
      .json(&data);

    check_status(self.send(request, &what).await?, &what)?;
    Ok(())
  }

  async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
    let what = format!("delete {}/{}", collection, id);
    let response = self
      .send(self.request(Method::DELETE, self.url(&[collection, id])), &what)
      .await?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(());
    }
    check_status(response, &what)?;
    Ok(())
  }

  async fn query_collection(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Value>> {
    let what = format!("query {}", collection);
    let response = self
      .send(
        self.request(Method::GET, self.query_url(collection, filters)),
        &what,
      )
      .await?;

    check_status(response, &what)?
      .json::<Vec<Value>>()
      .await
      .map_err(|e| eyre!("Failed to parse {} results: {}", collection, e))
  }

  async fn ping(&self) -> Result<()> {
    // Any HTTP answer means the store is reachable
    self
      .send(self.request(Method::HEAD, self.base.clone()), "reach store")
      .await?;
    Ok(())
  }
}
