//! Wire messages exchanged with the registry and with peers
//!
//! Every JSON body crossing the network has a struct here. Unknown fields
//! are ignored on input so the registry and peers may add to their payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Header carrying the number of redirects a request has been through
pub const HOP_COUNT_HEADER: &str = "X-Redirect-Count";

/// `POST {registry}/register`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    pub address: String,
}

/// One element of the `GET {registry}/nodes` array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEntry {
    pub address: String,
}

/// `GET {node}/load`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadReport {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "cpuLoad")]
    pub cpu_load: f64,
}

/// `GET {node}/health`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// `GET {node}/ping`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pong {
    pub status: String,
    pub address: String,
}

/// `GET {node}/a_m_r/botlist`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Botlist {
    #[serde(default)]
    pub address: Option<String>,
    pub peers: Vec<String>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `POST {node}/a_m_r/sync` request body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRequest {
    pub peers: Vec<String>,
}

/// `POST {node}/a_m_r/sync` response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResponse {
    pub status: String,
    pub added: usize,
    pub total_peers: usize,
}

/// `GET url` with a per-request timeout, requiring 200 and a JSON body of `T`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<T> {
    let response = client.get(url).timeout(timeout).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(Error::UnexpectedStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response.json::<T>().await?)
}

/// `GET url` with a per-request timeout, requiring only a 200 status.
pub(crate) async fn get_ok(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<()> {
    let response = client.get(url).timeout(timeout).send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::OK {
        Ok(())
    } else {
        Err(Error::UnexpectedStatus {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}
