//! Outbound client for the replica RPC.
//!
//! Connects with a 5 second connect timeout; body reads run to the
//! caller's cancellation. Transport failures surface as
//! `peer-rpc-failed` — the caller decides whether they are retryable.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use orama_core::{Error, Result};

use crate::protocol::*;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for calling peer nodes' replica endpoints.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    auth_token: String,
    port: u16,
}

impl PeerClient {
    /// `port` is the fleet-wide internal server port; peers are addressed
    /// by their registry IP.
    pub fn new(auth_token: impl Into<String>, port: u16) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(format!("failed to build peer client: {e}")))?;
        Ok(Self {
            http,
            auth_token: auth_token.into(),
            port,
        })
    }

    pub async fn setup(
        &self,
        peer_ip: &str,
        req: &SetupRequest,
        cancel: &CancellationToken,
    ) -> Result<SetupResponse> {
        self.post(peer_ip, "setup", req, cancel).await
    }

    pub async fn update(
        &self,
        peer_ip: &str,
        req: &UpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<AckResponse> {
        self.post(peer_ip, "update", req, cancel).await
    }

    pub async fn rollback(
        &self,
        peer_ip: &str,
        req: &UpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<AckResponse> {
        self.post(peer_ip, "rollback", req, cancel).await
    }

    pub async fn teardown(
        &self,
        peer_ip: &str,
        req: &TeardownRequest,
        cancel: &CancellationToken,
    ) -> Result<AckResponse> {
        self.post(peer_ip, "teardown", req, cancel).await
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        peer_ip: &str,
        endpoint: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<R> {
        let url = format!(
            "http://{peer_ip}:{}/internal/v1/replica/{endpoint}",
            self.port
        );
        debug!(%url, "peer rpc");

        let request = self
            .http
            .post(&url)
            .header(INTERNAL_AUTH_HEADER, &self.auth_token)
            .json(body)
            .send();

        let response = tokio::select! {
            result = request => result.map_err(|e| {
                Error::peer_rpc(format!("replica/{endpoint} to {peer_ip} failed: {e}"))
            })?,
            _ = cancel.cancelled() => {
                return Err(Error::internal(format!(
                    "replica/{endpoint} to {peer_ip} cancelled"
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_else(|_| "no error body".to_string());
            return Err(Error::peer_rpc(format!(
                "replica/{endpoint} to {peer_ip} returned {status}: {detail}"
            )));
        }

        tokio::select! {
            parsed = response.json::<R>() => parsed.map_err(|e| {
                Error::peer_rpc(format!("replica/{endpoint} to {peer_ip}: bad response body: {e}"))
            }),
            _ = cancel.cancelled() => Err(Error::internal(format!(
                "replica/{endpoint} to {peer_ip} cancelled"
            ))),
        }
    }
}
