//! # HuggingFace Hub Access
//!
//! Both models are fetched from the HuggingFace hub on startup (and cached
//! locally afterwards). This module builds the shared API client and wraps the
//! download call with useful error messages. Large checkpoints are often split
//! into shards, so weights are fetched through [`fetch_weights`].
//!
//! ## Environment Variables:
//! - `HF_TOKEN`: access token for gated or private repositories
//! - `HF_HUB_CACHE`: cache directory (takes precedence)
//! - `HF_HOME`: cache directory is `$HF_HOME/hub`

use anyhow::{anyhow, Context, Result};
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// Build the hub client from the environment.
pub fn build_api() -> Result<Api> {
    let mut builder = ApiBuilder::new().with_progress(false);

    if let Ok(token) = std::env::var("HF_TOKEN") {
        debug!("Setting HF token (length: {})", token.len());
        builder = builder.with_token(Some(token));
    }

    if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
        debug!("Using cache dir from HF_HUB_CACHE: {}", cache_dir);
        builder = builder.with_cache_dir(cache_dir.into());
    } else if let Ok(hf_home) = std::env::var("HF_HOME") {
        let cache_path = PathBuf::from(hf_home).join("hub");
        debug!("Using cache dir from HF_HOME: {:?}", cache_path);
        builder = builder.with_cache_dir(cache_path);
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to create HuggingFace API client: {}", e))
}

/// Handle to a model repository at a given revision.
pub fn model_repo(api: &Api, repo_id: &str, revision: &str) -> ApiRepo {
    api.repo(Repo::with_revision(
        repo_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ))
}

/// Download (or reuse the cached copy of) a single file.
pub async fn fetch(repo: &ApiRepo, repo_id: &str, filename: &str) -> Result<PathBuf> {
    let path = repo
        .get(filename)
        .await
        .map_err(|e| anyhow!("failed to download {} from {}: {}", filename, repo_id, e))?;
    info!("Fetched {} from {}", filename, repo_id);
    Ok(path)
}

/// Download model weights, either `model.safetensors` or every shard listed in
/// `model.safetensors.index.json`.
pub async fn fetch_weights(repo: &ApiRepo, repo_id: &str) -> Result<Vec<PathBuf>> {
    if let Ok(path) = repo.get("model.safetensors").await {
        info!("Fetched model.safetensors from {}", repo_id);
        return Ok(vec![path]);
    }

    debug!("{} has no model.safetensors, trying the sharded layout", repo_id);
    let index_path = fetch(repo, repo_id, "model.safetensors.index.json").await?;
    let index = std::fs::read_to_string(&index_path)
        .with_context(|| format!("failed to read {}", index_path.display()))?;

    let mut paths = Vec::new();
    for shard in shard_names(&index)? {
        paths.push(fetch(repo, repo_id, &shard).await?);
    }
    Ok(paths)
}

/// Distinct shard file names from a safetensors index, in sorted order.
fn shard_names(index_json: &str) -> Result<Vec<String>> {
    let index: serde_json::Value =
        serde_json::from_str(index_json).context("failed to parse safetensors index")?;

    let names: BTreeSet<String> = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow!("safetensors index has no weight_map"))?
        .values()
        .filter_map(|v| v.as_str())
        .map(str::to_owned)
        .collect();

    if names.is_empty() {
        return Err(anyhow!("safetensors index lists no shards"));
    }
    Ok(names.into_iter().collect())
}
