//! HTTP client for the mirror's JSON API.
//!
//! Routes:
//! - `POST /api/stakes/upsert`
//! - `POST /api/stakes/delete`
//! - `GET  /api/pools/by-token/{mint}`
//! - `POST /api/pools/reserve`
//! - `POST /api/admin/pools/create-user-pool`

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use staking_common::{PoolDescriptor, PoolSummary, RateMode};
use tracing::debug;

use crate::mirror::{MirrorError, StakeMirror};

/// Pool row as returned by the by-token lookup. Unknown fields ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolRow {
    pool_id: u32,
    #[serde(default)]
    is_initialized: Option<bool>,
}

#[derive(Clone)]
pub struct HttpMirror {
    base: String,
    client: Client,
}

impl HttpMirror {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::Request(e.to_string()))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), MirrorError> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "mirror post");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MirrorError::Request(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }
}

async fn check_status(resp: Response) -> Result<Response, MirrorError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(MirrorError::Status { status: status.as_u16(), body })
    }
}

#[async_trait]
impl StakeMirror for HttpMirror {
    async fn upsert_stake_record(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
        principal: u64,
        record_address: &Pubkey,
    ) -> Result<(), MirrorError> {
        let body = serde_json::json!({
            "userWallet": owner.to_string(),
            "tokenMint": mint.to_string(),
            "poolId": pool_slot,
            "amount": principal.to_string(),
            "stakePda": record_address.to_string(),
            "lastUpdated": Utc::now().to_rfc3339(),
        });
        self.post("/api/stakes/upsert", body).await
    }

    async fn delete_stake_record(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
    ) -> Result<(), MirrorError> {
        let body = serde_json::json!({
            "userWallet": owner.to_string(),
            "tokenMint": mint.to_string(),
            "poolId": pool_slot,
        });
        self.post("/api/stakes/delete", body).await
    }

    async fn find_pools_by_mint(&self, mint: &Pubkey) -> Result<Vec<PoolSummary>, MirrorError> {
        let url = format!("{}/api/pools/by-token/{}", self.base, mint);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MirrorError::Request(e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let rows = check_status(resp)
            .await?
            .json::<Vec<PoolRow>>()
            .await
            .map_err(|e| MirrorError::Decode(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| PoolSummary {
                mint: *mint,
                pool_slot: row.pool_id,
                pending: row.is_initialized == Some(false),
            })
            .collect())
    }

    async fn reserve_pool_slot(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        creator: &Pubkey,
    ) -> Result<(), MirrorError> {
        let body = serde_json::json!({
            "tokenMint": mint.to_string(),
            "poolId": pool_slot,
            "creatorWallet": creator.to_string(),
            "isInitialized": false,
        });
        self.post("/api/pools/reserve", body).await
    }

    async fn record_pool(&self, d: &PoolDescriptor) -> Result<(), MirrorError> {
        let pool_type = if d.lockup_seconds > 0 { "locked" } else { "unlocked" };
        let body = serde_json::json!({
            "tokenMint": d.asset.mint.to_string(),
            "poolId": d.pool_slot,
            "type": pool_type,
            "lockPeriod": d.lockup_seconds / 86_400,
            "rateMode": match d.rate_mode { RateMode::Fixed => "fixed", RateMode::Dynamic => "dynamic" },
            "apy": d.rate_bps_per_year as f64 / 100.0,
            "tokenProgram": d.asset.token_program().to_string(),
            "hasExternalReflections": d.reflection_asset.is_some(),
            "externalReflectionMint": d.reflection_asset.map(|r| r.mint.to_string()),
            "isInitialized": true,
            "isPaused": false,
            "creatorWallet": d.admin.to_string(),
            "projectPda": d.addresses.pool.to_string(),
        });
        self.post("/api/admin/pools/create-user-pool", body).await
    }
}
