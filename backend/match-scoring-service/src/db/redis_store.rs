//! Redis-backed result store
//!
//! Key layout:
//! - score:{user_id}:{weights_name}:{version} → hash of job_id → ScoreResult JSON
//! - batch_run:{run_id} → serialized BatchRun

use super::ResultStore;
use crate::config::RedisConfig;
use crate::error::{Result, ScoringError};
use crate::models::{BatchRun, ScoreResult, WeightsVersion};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisResultStore {
    client: Arc<ConnectionManager>,
    result_ttl_secs: u64,
    batch_ttl_secs: u64,
}

impl RedisResultStore {
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            ScoringError::DataUnavailable(format!("Failed to create Redis client: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            ScoringError::DataUnavailable(format!("Failed to create Redis connection: {}", e))
        })?;

        Ok(Self {
            client: Arc::new(manager),
            result_ttl_secs: config.result_ttl_secs,
            batch_ttl_secs: config.batch_ttl_secs,
        })
    }

    fn score_key(user_id: Uuid, weights_version: &WeightsVersion) -> String {
        format!(
            "score:{}:{}:{}",
            user_id, weights_version.name, weights_version.version
        )
    }

    fn batch_key(run_id: Uuid) -> String {
        format!("batch_run:{}", run_id)
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn save_score_results(&self, results: &[ScoreResult]) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        let mut touched: Vec<String> = Vec::new();
        for result in results {
            let key = Self::score_key(result.user_id, &result.weights_version);
            let value = serde_json::to_string(result)?;
            pipe.cmd("HSET")
                .arg(&key)
                .arg(result.job_id.to_string())
                .arg(value)
                .ignore();
            if !touched.contains(&key) {
                touched.push(key);
            }
        }
        for key in &touched {
            pipe.cmd("EXPIRE")
                .arg(key)
                .arg(self.result_ttl_secs)
                .ignore();
        }

        pipe.query_async::<_, ()>(&mut self.client.as_ref().clone())
            .await
            .map_err(|e| {
                warn!("Redis pipeline failed saving {} results: {}", results.len(), e);
                ScoringError::from(e)
            })?;

        debug!(count = results.len(), keys = touched.len(), "Saved score results");
        Ok(())
    }

    async fn get_score_results(
        &self,
        user_id: Uuid,
        weights_version: &WeightsVersion,
    ) -> Result<Vec<ScoreResult>> {
        let key = Self::score_key(user_id, weights_version);
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&key)
            .query_async(&mut self.client.as_ref().clone())
            .await?;

        let mut results = Vec::with_capacity(raw.len());
        for (job_id, value) in raw {
            match serde_json::from_str::<ScoreResult>(&value) {
                Ok(result) => results.push(result),
                Err(e) => warn!(%user_id, %job_id, "Dropping undecodable score result: {}", e),
            }
        }
        Ok(results)
    }

    async fn save_batch_run(&self, run: &BatchRun) -> Result<()> {
        let value = serde_json::to_string(run)?;
        redis::cmd("SETEX")
            .arg(Self::batch_key(run.id))
            .arg(self.batch_ttl_secs)
            .arg(value)
            .query_async::<_, ()>(&mut self.client.as_ref().clone())
            .await
            .map_err(|e| {
                warn!(run_id = %run.id, "Redis SETEX failed: {}", e);
                ScoringError::from(e)
            })
    }

    async fn get_batch_run(&self, run_id: Uuid) -> Result<Option<BatchRun>> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::batch_key(run_id))
            .query_async(&mut self.client.as_ref().clone())
            .await?;

        match raw {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let user_id = Uuid::nil();
        let version = WeightsVersion::new("default", 3);
        assert_eq!(
            RedisResultStore::score_key(user_id, &version),
            "score:00000000-0000-0000-0000-000000000000:default:3"
        );
        assert_eq!(
            RedisResultStore::batch_key(user_id),
            "batch_run:00000000-0000-0000-0000-000000000000"
        );
    }
}
