//! HTTP session against a switch's REST API.

use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use nos_fabric_common::{FabricError, FabricResult, Secret, SwitchConnection, TimeoutConfig};

/// Login resource.
pub const LOGIN_OBJ: &str = "nos/api/login/";

/// Login attempts before the switch is reported unreachable.
pub const LOGIN_ATTEMPTS: usize = 3;

/// A parsed JSON response and where it came from.
#[derive(Debug, Clone)]
pub struct JsonDocument {
    pub url: String,
    pub json: Value,
}

impl JsonDocument {
    /// Returns a top-level field, or `JsonFieldNotFound`.
    pub fn field(&self, name: &str) -> FabricResult<&Value> {
        self.json.get(name).ok_or_else(|| self.missing(name))
    }

    /// Error for a field that is absent or has the wrong shape.
    pub fn missing(&self, name: &str) -> FabricError {
        FabricError::JsonFieldNotFound {
            field: name.to_string(),
            url: self.url.clone(),
            json: self.json.to_string(),
        }
    }
}

/// Cookie-keeping HTTP session with basic auth on every request.
pub struct RestClient {
    switch: String,
    base: Url,
    http: Client,
    username: String,
    password: Secret,
    request_timeout: Duration,
}

impl RestClient {
    /// Builds a client; no request is made until [`RestClient::login`].
    pub fn new(switch: &str, conn: &SwitchConnection, timeouts: &TimeoutConfig) -> FabricResult<Self> {
        let scheme = if conn.rest.use_tls { "https" } else { "http" };
        let base = Url::parse(&format!("{}://{}:{}/", scheme, switch, conn.rest.tcp_port))
            .map_err(|e| {
                FabricError::invalid_config(format!("switches.{}.rest", switch), e.to_string())
            })?;
        let http = Client::builder()
            .cookie_store(true)
            .connect_timeout(timeouts.connect())
            .timeout(timeouts.request())
            .build()
            .map_err(|e| FabricError::connect_failed(switch, e))?;

        Ok(Self {
            switch: switch.to_string(),
            base,
            http,
            username: conn.username.clone(),
            password: conn.password.clone(),
            request_timeout: timeouts.request(),
        })
    }

    /// Absolute URL of a resource.
    pub fn url(&self, obj: &str) -> FabricResult<Url> {
        self.base
            .join(obj)
            .map_err(|e| FabricError::invalid_config(obj, e.to_string()))
    }

    /// Opens the session, retrying a fixed number of times.
    #[instrument(skip(self), fields(switch = %self.switch))]
    pub async fn login(&self) -> FabricResult<()> {
        let mut last = None;
        for attempt in 1..=LOGIN_ATTEMPTS {
            match self.send(Method::GET, LOGIN_OBJ, None).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!(switch = %self.switch, attempt, error = %err, "REST login failed");
                    last = Some(err);
                }
            }
        }
        Err(FabricError::connect_failed(
            self.switch.clone(),
            last.map_or_else(|| "login failed".to_string(), |e| e.to_string()),
        ))
    }

    pub async fn get(&self, obj: &str) -> FabricResult<JsonDocument> {
        let (url, text) = self.send(Method::GET, obj, None).await?;
        let json = serde_json::from_str(&text).map_err(|_| FabricError::JsonFieldNotFound {
            field: "<document>".to_string(),
            url: url.clone(),
            json: text.clone(),
        })?;
        Ok(JsonDocument { url, json })
    }

    pub async fn post(&self, obj: &str, body: &Value) -> FabricResult<()> {
        self.send(Method::POST, obj, Some(body)).await.map(|_| ())
    }

    pub async fn put(&self, obj: &str, body: &Value) -> FabricResult<()> {
        self.send(Method::PUT, obj, Some(body)).await.map(|_| ())
    }

    pub async fn delete(&self, obj: &str) -> FabricResult<()> {
        self.send(Method::DELETE, obj, None).await.map(|_| ())
    }

    /// Sends one request and returns the URL and body of a 2xx response.
    async fn send(
        &self,
        method: Method,
        obj: &str,
        body: Option<&Value>,
    ) -> FabricResult<(String, String)> {
        let url = self.url(obj)?;
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .basic_auth(&self.username, Some(self.password.expose()));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(&method, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(&method, e))?;
        debug!(
            switch = %self.switch,
            %method,
            url = %url,
            request = ?body,
            status = status.as_u16(),
            response = %text,
            "REST exchange"
        );

        if !status.is_success() {
            return Err(FabricError::RestHttp {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                method: method.to_string(),
                url: url.to_string(),
                body: text,
            });
        }
        Ok((url.to_string(), text))
    }

    /// Ends the session; its cookies and pooled connections go with it.
    pub fn close(self) {
        debug!(switch = %self.switch, "REST session closed");
    }

    fn transport_error(&self, method: &Method, err: reqwest::Error) -> FabricError {
        if err.is_timeout() {
            FabricError::timeout(
                self.switch.clone(),
                format!("REST {}", method),
                self.request_timeout,
            )
        } else {
            FabricError::connect_failed(self.switch.clone(), err)
        }
    }
}
