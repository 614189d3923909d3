//! Blocking HTTP client for the orchestration API.

use super::types::{Instance, InstanceSpec, Interface, NamespaceEntry, Network, NetworkSpec};
use super::CloudApi;
use crate::config::ApiConfig;
use crate::error::{HarnessError, Result};
use crate::events::{Event, EventSource};
use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
}

/// API client, optionally authenticated into a namespace.
///
/// Without a namespace and key requests go out unauthenticated. With both, a
/// bearer token is fetched from `POST /auth` on first use and refreshed once
/// if the server rejects it.
pub struct ApiClient {
    http: Client,
    base_url: String,
    namespace: Option<String>,
    key: Option<String>,
    request_timeout: Duration,
    token: Mutex<Option<String>>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Self::with_credentials(
            &config.base_url,
            config.namespace.clone(),
            config.key.clone(),
            config.request_timeout,
        )
    }

    pub fn with_credentials(
        base_url: &str,
        namespace: Option<String>,
        key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace,
            key,
            request_timeout,
            token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.namespace, &self.key) {
            (Some(namespace), Some(key)) => Some((namespace.as_str(), key.as_str())),
            _ => None,
        }
    }

    fn token(&self) -> Result<Option<String>> {
        let Some((namespace, key)) = self.credentials() else {
            return Ok(None);
        };

        let mut cached = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref() {
            return Ok(Some(token.clone()));
        }

        let response = self
            .http
            .post(self.url("/auth"))
            .json(&json!({ "namespace": namespace, "key": key }))
            .send()?;
        let auth: AuthResponse = Self::check(&Method::POST, "/auth", response)?.json()?;
        debug!(namespace, "authenticated against API");

        *cached = Some(auth.access_token.clone());
        Ok(Some(auth.access_token))
    }

    fn forget_token(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn check(method: &Method, path: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(HarnessError::Api {
            method: method.to_string(),
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    fn send_once(&self, method: &Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = self.token()? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        debug!(%method, path, "API request");
        Ok(request.send()?)
    }

    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let response = self.send_once(&method, path, body)?;
        if response.status() == StatusCode::UNAUTHORIZED && self.credentials().is_some() {
            debug!(path, "token rejected, authenticating again");
            self.forget_token();
            let retry = self.send_once(&method, path, body)?;
            return Self::check(&method, path, retry);
        }
        Self::check(&method, path, response)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.send(Method::GET, path, None)?.json()?)
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        Ok(self.send(Method::POST, path, Some(body))?.json()?)
    }

    fn post_unit(&self, path: &str, body: &Value) -> Result<()> {
        self.send(Method::POST, path, Some(body))?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, None)?;
        Ok(())
    }

    /// Serialize `spec` and tag it with our namespace, if we have one.
    fn namespaced<S: Serialize>(&self, spec: &S) -> Result<Value> {
        let mut body = serde_json::to_value(spec)?;
        if let (Some(namespace), Value::Object(map)) = (&self.namespace, &mut body) {
            map.insert("namespace".to_string(), Value::String(namespace.clone()));
        }
        Ok(body)
    }
}

impl EventSource for ApiClient {
    fn instance_events(&self, instance: &str) -> Result<Vec<Event>> {
        self.get(&format!("/instances/{}/events", instance))
    }
}

impl CloudApi for ApiClient {
    fn namespaces(&self) -> Result<Vec<String>> {
        let entries: Vec<NamespaceEntry> = self.get("/auth/namespaces")?;
        Ok(entries.into_iter().map(NamespaceEntry::into_name).collect())
    }

    fn create_namespace(&self, name: &str) -> Result<()> {
        self.post_unit("/auth/namespaces", &json!({ "namespace": name }))
    }

    fn delete_namespace(&self, name: &str) -> Result<()> {
        self.delete(&format!("/auth/namespaces/{}", name))
    }

    fn add_namespace_key(&self, namespace: &str, key_name: &str, key: &str) -> Result<()> {
        self.post_unit(
            &format!("/auth/namespaces/{}/keys", namespace),
            &json!({ "key_name": key_name, "key": key }),
        )
    }

    fn networks(&self) -> Result<Vec<Network>> {
        self.get("/networks")
    }

    fn allocate_network(&self, spec: &NetworkSpec) -> Result<Network> {
        let body = self.namespaced(spec)?;
        self.post("/networks", &body)
    }

    fn delete_network(&self, uuid: &str) -> Result<()> {
        self.delete(&format!("/networks/{}", uuid))
    }

    fn instances(&self) -> Result<Vec<Instance>> {
        self.get("/instances")
    }

    fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        let body = self.namespaced(spec)?;
        self.post("/instances", &body)
    }

    fn delete_instance(&self, uuid: &str) -> Result<()> {
        self.delete(&format!("/instances/{}", uuid))
    }

    fn instance_interfaces(&self, uuid: &str) -> Result<Vec<Interface>> {
        self.get(&format!("/instances/{}/interfaces", uuid))
    }

    fn scoped(&self, namespace: &str, key: &str) -> Result<Box<dyn CloudApi>> {
        Ok(Box::new(Self::with_credentials(
            &self.base_url,
            Some(namespace.to_string()),
            Some(key.to_string()),
            self.request_timeout,
        )?))
    }
}
