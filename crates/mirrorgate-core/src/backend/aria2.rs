//! aria2 JSON-RPC adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use ulid::Ulid;

use super::{BackendError, BackendTransfer, Throughput, TransferBackend, TransferState};
use crate::config::Aria2Settings;

/// Bulk listing page size for `tellWaiting` / `tellStopped`.
const PAGE: u64 = 1000;

pub struct Aria2Client {
    http: reqwest::Client,
    url: String,
    secret: Option<String>,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlobalStat {
    download_speed: String,
    upload_speed: String,
}

#[derive(Deserialize)]
struct Status {
    gid: String,
    status: String,
}

impl Aria2Client {
    pub fn new(settings: &Aria2Settings, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: settings.url.clone(),
            secret: settings.secret.clone(),
        })
    }

    fn request_body(&self, method: &str, params: Vec<Value>) -> Value {
        let mut all = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all.push(Value::String(format!("token:{secret}")));
        }
        all.extend(params);
        json!({
            "jsonrpc": "2.0",
            "id": Ulid::new().to_string(),
            "method": format!("aria2.{method}"),
            "params": all,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, BackendError> {
        let response = self
            .http
            .post(&self.url)
            .json(&self.request_body(method, params))
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        decode_response(status.as_u16(), &body)
    }

    async fn list(&self, method: &str, paged: bool) -> Result<Vec<BackendTransfer>, BackendError> {
        let keys = json!(["gid", "status"]);
        let params = if paged {
            vec![json!(0), json!(PAGE), keys]
        } else {
            vec![keys]
        };
        let statuses: Vec<Status> = self.call(method, params).await?;
        Ok(statuses
            .into_iter()
            .map(|s| BackendTransfer::new(s.gid, map_state(&s.status)))
            .collect())
    }

    async fn expect_ok(&self, method: &str, params: Vec<Value>) -> Result<(), BackendError> {
        let _: Value = self.call(method, params).await?;
        Ok(())
    }
}

/// Turn an HTTP status and body into the RPC result. aria2 reports RPC
/// errors with a 4xx status and an `error` object, so the body is read first.
fn decode_response<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, BackendError> {
    let parsed: Result<RpcResponse<T>, _> = serde_json::from_slice(body);
    match parsed {
        Ok(RpcResponse {
            error: Some(RpcError { code, message }),
            ..
        }) => Err(BackendError::Rejected { code, message }),
        Ok(RpcResponse {
            result: Some(result),
            ..
        }) if (200..300).contains(&status) => Ok(result),
        _ if !(200..300).contains(&status) => Err(BackendError::Http { status }),
        Ok(_) => Err(BackendError::Protocol("response carries no result".into())),
        Err(err) => Err(BackendError::Protocol(err.to_string())),
    }
}

fn map_state(status: &str) -> TransferState {
    match status {
        "active" => TransferState::Active,
        "waiting" => TransferState::Waiting,
        "paused" => TransferState::Paused,
        "complete" => TransferState::Complete,
        "removed" => TransferState::Removed,
        _ => TransferState::Error,
    }
}

fn parse_speed(value: &str) -> Result<u64, BackendError> {
    value
        .parse()
        .map_err(|_| BackendError::Protocol(format!("invalid speed {value:?}")))
}

#[async_trait]
impl TransferBackend for Aria2Client {
    fn name(&self) -> &str {
        "aria2"
    }

    async fn global_stat(&self) -> Result<Throughput, BackendError> {
        let stat: GlobalStat = self.call("getGlobalStat", vec![]).await?;
        Ok(Throughput {
            download: parse_speed(&stat.download_speed)?,
            upload: parse_speed(&stat.upload_speed)?,
        })
    }

    async fn list_transfers(&self) -> Result<Vec<BackendTransfer>, BackendError> {
        let mut all = self.list("tellActive", false).await?;
        all.extend(self.list("tellWaiting", true).await?);
        all.extend(self.list("tellStopped", true).await?);
        Ok(all)
    }

    async fn pause_all(&self) -> Result<(), BackendError> {
        self.expect_ok("forcePauseAll", vec![]).await
    }

    async fn force_remove(&self, id: &str) -> Result<(), BackendError> {
        self.expect_ok("forceRemove", vec![json!(id)]).await
    }

    async fn purge_result(&self, id: &str) -> Result<(), BackendError> {
        self.expect_ok("removeDownloadResult", vec![json!(id)]).await
    }

    async fn change_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError> {
        self.expect_ok("changeOption", vec![json!(id), json!({ key: value })])
            .await
    }

    async fn change_global_option(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.expect_ok("changeGlobalOption", vec![json!({ key: value })])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(secret: Option<&str>) -> Aria2Client {
        let settings = Aria2Settings {
            url: "http://127.0.0.1:6800/jsonrpc".into(),
            secret: secret.map(str::to_string),
        };
        Aria2Client::new(&settings, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn secret_is_sent_as_first_param() {
        let body = client(Some("s3cret")).request_body("forceRemove", vec![json!("2089b05ecca3d829")]);
        assert_eq!(body["method"], "aria2.forceRemove");
        assert_eq!(body["params"], json!(["token:s3cret", "2089b05ecca3d829"]));

        let body = client(None).request_body("getGlobalStat", vec![]);
        assert_eq!(body["params"], json!([]));
    }

    #[test]
    fn rpc_error_is_a_rejection() {
        let body = br#"{"id":"1","jsonrpc":"2.0","error":{"code":1,"message":"GID 2089b05ecca3d829 is not found"}}"#;
        let result: Result<Value, _> = decode_response(400, body);
        assert!(matches!(result, Err(BackendError::Rejected { code: 1, .. })));
    }

    #[test]
    fn global_stat_result_is_decoded() {
        let body = br#"{"id":"1","jsonrpc":"2.0","result":{"downloadSpeed":"21846","uploadSpeed":"0","numActive":"2"}}"#;
        let stat: GlobalStat = decode_response(200, body).unwrap();
        assert_eq!(parse_speed(&stat.download_speed).unwrap(), 21846);
    }

    #[test]
    fn gateway_failure_is_http_error() {
        let result: Result<Value, _> = decode_response(502, b"<html>bad gateway</html>");
        assert!(matches!(result, Err(BackendError::Http { status: 502 })));
    }

    #[test]
    fn garbled_body_is_protocol_error() {
        let result: Result<Value, _> = decode_response(200, b"{\"result\":");
        assert!(matches!(result, Err(BackendError::Protocol(_))));
    }
}
