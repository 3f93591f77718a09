use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::model::{InitiateRestoreReq, PutParameterReq, RestoreJobResp};
use super::{ParameterGateway, RestoreGateway};
use crate::config::Config;
use crate::error::GatewayError;
use crate::model::RestoreJob;

/// Upper bound for one store call; well under the engine's step lease.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the restore store and the parameter store.
#[derive(Clone)]
pub struct StoreClient {
    http: Client,
    restore_url: Url,
    parameter_url: Url,
    token: String,
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient")
            .field("restore_url", &self.restore_url)
            .field("parameter_url", &self.parameter_url)
            .finish_non_exhaustive()
    }
}

impl StoreClient {
    pub fn new(restore_url: Url, parameter_url: Url, token: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent("backup-restorer/0.1")
            .no_proxy()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            restore_url,
            parameter_url,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let restore_url = Url::parse(&cfg.store.restore_url).context("invalid store.restore_url")?;
        let parameter_url =
            Url::parse(&cfg.store.parameter_url).context("invalid store.parameter_url")?;
        Self::new(restore_url, parameter_url, cfg.store.token.clone())
    }

    pub fn build_request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&T>,
    ) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.build().context("failed to build store request")
    }

    pub fn restores_url(&self) -> Result<Url> {
        endpoint(&self.restore_url, &["restores"])
    }

    pub fn restore_status_url(&self, target_name: &str) -> Result<Url> {
        endpoint(&self.restore_url, &["restores", target_name])
    }

    pub fn parameter_url(&self, name: &str) -> Result<Url> {
        endpoint(&self.parameter_url, &["parameters", name])
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Response, GatewayError> {
        debug!(method = %request.method(), url = %request.url(), "sending store request");
        self.http
            .execute(request)
            .await
            .map_err(|err| transport_error(err, "failed to reach store"))
    }

    async fn read_job(&self, res: Response) -> Result<RestoreJob, GatewayError> {
        let body: RestoreJobResp = res
            .json()
            .await
            .map_err(|err| transport_error(err, "unreadable store response"))?;
        let status = body.status.clone();
        body.into_job()
            .ok_or_else(|| GatewayError::Other(anyhow!("unknown restore status {status:?}")))
    }
}

#[async_trait]
impl RestoreGateway for StoreClient {
    async fn initiate_restore(
        &self,
        recovery_point_id: &str,
        target_name: &str,
    ) -> Result<RestoreJob, GatewayError> {
        let body = InitiateRestoreReq {
            recovery_point_id,
            target_name,
        };
        let request = self.build_request(Method::POST, self.restores_url()?, Some(&body))?;
        let res = self.execute(request).await?;
        if !res.status().is_success() {
            return Err(classify(res, target_name).await);
        }
        self.read_job(res).await
    }

    async fn restore_status(&self, target_name: &str) -> Result<RestoreJob, GatewayError> {
        let request =
            self.build_request::<()>(Method::GET, self.restore_status_url(target_name)?, None)?;
        let res = self.execute(request).await?;
        if !res.status().is_success() {
            return Err(classify(res, target_name).await);
        }
        self.read_job(res).await
    }
}

#[async_trait]
impl ParameterGateway for StoreClient {
    async fn publish_parameter(&self, name: &str, value: &str) -> Result<(), GatewayError> {
        let body = PutParameterReq {
            value,
            overwrite: true,
            typ: "String",
        };
        let request = self.build_request(Method::PUT, self.parameter_url(name)?, Some(&body))?;
        let res = self.execute(request).await?;
        if !res.status().is_success() {
            return Err(classify(res, name).await);
        }
        Ok(())
    }
}

/// Transport and body failures are retryable.
fn transport_error(err: reqwest::Error, what: &str) -> GatewayError {
    if err.is_timeout()
        || err.is_connect()
        || err.is_request()
        || err.is_body()
        || err.is_decode()
    {
        GatewayError::Transient(format!("{what}: {err}"))
    } else {
        GatewayError::Other(anyhow!(err).context(what.to_string()))
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("store URL {base} cannot be a base"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn classify(res: Response, subject: &str) -> GatewayError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    warn!(%status, subject, body = %body, "store returned error");
    let detail = format!("{subject}: {status}: {body}");
    match status {
        StatusCode::CONFLICT => GatewayError::Conflict(detail),
        StatusCode::NOT_FOUND => GatewayError::NotFound(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            GatewayError::InvalidArgument(detail)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            GatewayError::Transient(detail)
        }
        s if s.is_server_error() => GatewayError::Transient(detail),
        _ => GatewayError::Other(anyhow!("store error {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn client() -> StoreClient {
        StoreClient::new(
            Url::parse("https://store.example/api/").unwrap(),
            Url::parse("https://params.example").unwrap(),
            "token".into(),
        )
        .unwrap()
    }

    #[test]
    fn restore_request_carries_recovery_point_and_target() {
        let client = client();
        let body = InitiateRestoreReq {
            recovery_point_id: "rp-123",
            target_name: "Orders-restored-20210304-05-06-07",
        };
        let request = client
            .build_request(Method::POST, client.restores_url().unwrap(), Some(&body))
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/api/restores");
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        let json: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(json["recoveryPointId"], "rp-123");
        assert_eq!(json["targetName"], "Orders-restored-20210304-05-06-07");
    }

    #[test]
    fn status_url_appends_target_name() {
        let url = client().restore_status_url("Orders-x").unwrap();
        assert_eq!(url.as_str(), "https://store.example/api/restores/Orders-x");
    }

    #[test]
    fn parameter_name_slashes_are_escaped() {
        let url = client().parameter_url("/restore/latest").unwrap();
        assert_eq!(
            url.as_str(),
            "https://params.example/parameters/%2Frestore%2Flatest"
        );
    }

    #[test]
    fn parameter_request_overwrites() {
        let client = client();
        let body = PutParameterReq {
            value: "arn:aws:dynamodb:us-east-1:1:table/Orders-x",
            overwrite: true,
            typ: "String",
        };
        let request = client
            .build_request(Method::PUT, client.parameter_url("p").unwrap(), Some(&body))
            .unwrap();
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        let json: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(json["overwrite"], true);
        assert_eq!(json["type"], "String");
    }
}
