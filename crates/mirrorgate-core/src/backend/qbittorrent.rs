//! qBittorrent WebUI (API v2) adapter.
//!
//! The session cookie is kept by reqwest's cookie store. A 403 means the
//! session expired: the client logs in again and reports a transient error
//! so the retry policy repeats the call with the fresh cookie.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    BackendError, BackendTransfer, Throughput, TransferBackend, TransferState, parse_rate,
};
use crate::config::QbittorrentSettings;

pub struct QbittorrentClient {
    http: reqwest::Client,
    base: String,
    username: String,
    password: String,
    /// Serialises logins so concurrent 403s do not stampede the WebUI.
    login_lock: Mutex<()>,
}

#[derive(Deserialize)]
struct TransferInfo {
    dl_info_speed: u64,
    up_info_speed: u64,
}

#[derive(Deserialize)]
struct TorrentInfo {
    hash: String,
    state: String,
}

impl QbittorrentClient {
    pub fn new(settings: &QbittorrentSettings, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            http,
            base: settings.url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            login_lock: Mutex::new(()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{path}", self.base)
    }

    pub async fn login(&self) -> Result<(), BackendError> {
        let _guard = self.login_lock.lock().await;
        let response = self
            .http
            .post(self.endpoint("auth/login"))
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(http_error(status));
        }
        if body.trim() != "Ok." {
            return Err(BackendError::Rejected {
                code: i64::from(status.as_u16()),
                message: "login refused".into(),
            });
        }
        debug!(backend = "qbittorrent", "logged in");
        Ok(())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let response = self
            .http
            .get(self.endpoint(path))
            .query(query)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.endpoint(path))
            .form(form)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            self.login().await?;
            return Err(BackendError::Protocol("session expired, logged in again".into()));
        }
        if !status.is_success() {
            return Err(http_error(status));
        }
        Ok(response)
    }

    async fn delete(&self, hash: &str, delete_files: bool) -> Result<(), BackendError> {
        let delete_files = if delete_files { "true" } else { "false" };
        self.post(
            "torrents/delete",
            &[("hashes", hash), ("deleteFiles", delete_files)],
        )
        .await
    }
}

fn http_error(status: StatusCode) -> BackendError {
    BackendError::Http {
        status: status.as_u16(),
    }
}

fn map_state(state: &str) -> TransferState {
    match state {
        "downloading" | "forcedDL" | "metaDL" | "forcedMetaDL" | "stalledDL" | "allocating"
        | "checkingDL" | "checkingResumeData" | "moving" => TransferState::Active,
        "queuedDL" | "queuedUP" => TransferState::Waiting,
        "pausedDL" | "stoppedDL" => TransferState::Paused,
        "uploading" | "forcedUP" | "stalledUP" | "checkingUP" | "pausedUP" | "stoppedUP" => {
            TransferState::Complete
        }
        _ => TransferState::Error,
    }
}

/// Translate an aria2-style global option into WebUI preferences.
fn preferences(key: &str, value: &str) -> Result<Value, BackendError> {
    let (name, value) = match key {
        "max-overall-download-limit" => ("dl_limit", rate_value(value)?),
        "max-overall-upload-limit" => ("up_limit", rate_value(value)?),
        "max-concurrent-downloads" => ("max_active_downloads", number_value(value)?),
        _ => return Err(BackendError::Unsupported),
    };
    let mut prefs = Map::new();
    prefs.insert(name.to_string(), value);
    Ok(Value::Object(prefs))
}

fn rate_value(value: &str) -> Result<Value, BackendError> {
    parse_rate(value)
        .map(Value::from)
        .ok_or(BackendError::Unsupported)
}

fn number_value(value: &str) -> Result<Value, BackendError> {
    value
        .trim()
        .parse::<u64>()
        .map(Value::from)
        .map_err(|_| BackendError::Unsupported)
}

#[async_trait]
impl TransferBackend for QbittorrentClient {
    fn name(&self) -> &str {
        "qbittorrent"
    }

    async fn global_stat(&self) -> Result<Throughput, BackendError> {
        let info: TransferInfo = self.get("transfer/info", &[]).await?;
        Ok(Throughput {
            download: info.dl_info_speed,
            upload: info.up_info_speed,
        })
    }

    async fn list_transfers(&self) -> Result<Vec<BackendTransfer>, BackendError> {
        let torrents: Vec<TorrentInfo> = self.get("torrents/info", &[]).await?;
        Ok(torrents
            .into_iter()
            .map(|t| BackendTransfer::new(t.hash, map_state(&t.state)))
            .collect())
    }

    async fn pause_all(&self) -> Result<(), BackendError> {
        match self.post("torrents/pause", &[("hashes", "all")]).await {
            // WebUI 5 renamed pause to stop.
            Err(BackendError::Http { status: 404 }) => {
                self.post("torrents/stop", &[("hashes", "all")]).await
            }
            other => other,
        }
    }

    async fn force_remove(&self, id: &str) -> Result<(), BackendError> {
        self.delete(id, true).await
    }

    async fn purge_result(&self, id: &str) -> Result<(), BackendError> {
        self.delete(id, false).await
    }

    async fn change_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError> {
        let path = match key {
            "max-download-limit" => "torrents/setDownloadLimit",
            "max-upload-limit" => "torrents/setUploadLimit",
            _ => return Err(BackendError::Unsupported),
        };
        let limit = parse_rate(value)
            .ok_or(BackendError::Unsupported)?
            .to_string();
        self.post(path, &[("hashes", id), ("limit", limit.as_str())])
            .await
    }

    async fn change_global_option(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let prefs = preferences(key, value)?.to_string();
        self.post("app/setPreferences", &[("json", prefs.as_str())])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("downloading", TransferState::Active)]
    #[case("stalledDL", TransferState::Active)]
    #[case("queuedDL", TransferState::Waiting)]
    #[case("pausedDL", TransferState::Paused)]
    #[case("uploading", TransferState::Complete)]
    #[case("missingFiles", TransferState::Error)]
    fn torrent_states(#[case] raw: &str, #[case] expected: TransferState) {
        assert_eq!(map_state(raw), expected);
    }

    #[test]
    fn global_limits_become_preferences() {
        assert_eq!(
            preferences("max-overall-download-limit", "2M").unwrap(),
            json!({ "dl_limit": 2 * 1024 * 1024 })
        );
        assert_eq!(
            preferences("max-concurrent-downloads", "4").unwrap(),
            json!({ "max_active_downloads": 4 })
        );
        assert!(matches!(
            preferences("seed-ratio", "1.0"),
            Err(BackendError::Unsupported)
        ));
    }

    #[test]
    fn base_url_is_normalised() {
        let settings = QbittorrentSettings {
            url: "http://127.0.0.1:8090/".into(),
            username: "admin".into(),
            password: "adminadmin".into(),
        };
        let client = QbittorrentClient::new(&settings, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint("transfer/info"),
            "http://127.0.0.1:8090/api/v2/transfer/info"
        );
    }
}
