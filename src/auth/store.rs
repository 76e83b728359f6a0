// Token persistence: in-memory TokenSet mirrored to a JSON file

use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::types::{TokenError, TokenSet};

/// Durable store for the single TokenSet
pub struct TokenStore {
    /// Path to the JSON token file
    path: PathBuf,

    /// In-memory copy, only replaced through `commit` or `load`
    tokens: RwLock<TokenSet>,
}

impl TokenStore {
    /// Create an empty store backed by `path`. Nothing is read until `load`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tokens: RwLock::new(TokenSet::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the token file into memory
    ///
    /// A missing file leaves the store empty. A file that cannot be read or
    /// parsed is logged and also leaves the store empty.
    pub async fn load(&self) -> TokenSet {
        let loaded = match read_token_file(&self.path).await {
            Ok(Some(tokens)) => {
                tracing::info!("Loaded saved tokens from {}", self.path.display());
                tokens
            }
            Ok(None) => {
                tracing::info!("No saved tokens found at {}, login required", self.path.display());
                TokenSet::default()
            }
            Err(e) => {
                tracing::error!("Failed to load tokens, starting unauthenticated: {}", e);
                TokenSet::default()
            }
        };

        let mut tokens = self.tokens.write().await;
        *tokens = loaded.clone();
        loaded
    }

    /// Copy of the current TokenSet
    pub async fn snapshot(&self) -> TokenSet {
        self.tokens.read().await.clone()
    }

    /// Replace the TokenSet and flush it to disk
    ///
    /// The write lock is held across the flush, so readers never see a value
    /// before its write has finished. A failed write keeps the new value in
    /// memory and returns the error.
    pub async fn commit(&self, new_tokens: TokenSet) -> Result<(), TokenError> {
        let mut tokens = self.tokens.write().await;
        *tokens = new_tokens;
        write_token_file(&self.path, &tokens).await
    }
}

async fn read_token_file(path: &Path) -> Result<Option<TokenSet>, TokenError> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(TokenError::Persistence {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let tokens: TokenSet = serde_json::from_str(&data)?;
    Ok(Some(tokens))
}

async fn write_token_file(path: &Path, tokens: &TokenSet) -> Result<(), TokenError> {
    let persistence_error = |source: std::io::Error| TokenError::Persistence {
        path: path.display().to_string(),
        source,
    };

    let json = serde_json::to_string_pretty(tokens)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(persistence_error)?;
    }

    // Write beside the target and rename over it
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(persistence_error)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(persistence_error)?;

    tracing::debug!("Tokens saved to {}", path.display());
    Ok(())
}
