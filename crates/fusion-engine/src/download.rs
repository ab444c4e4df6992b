use std::path::{Path, PathBuf};

use fusion_contracts::codec::{decode_payload, strip_data_prefix};
use fusion_contracts::FusionError;
use reqwest::Client as HttpClient;
use tracing::info;

/// Client-local "save as" for a fusion result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveAction {
    pub url: String,
    pub file_name: String,
}

impl SaveAction {
    pub fn for_result(url: &str) -> Self {
        Self {
            url: url.to_string(),
            file_name: format!("fusion-{}.png", chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Writes the result into `dir`. `data:image/...` URLs are decoded in
    /// place; anything else is fetched.
    pub async fn save_to(&self, dir: &Path, http: &HttpClient) -> Result<PathBuf, FusionError> {
        let bytes = if strip_data_prefix(&self.url).len() != self.url.len() {
            decode_payload(&self.url)?
        } else {
            self.fetch(http).await?
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| io_error(dir, source))?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| io_error(&path, source))?;
        info!(path = %path.display(), bytes = bytes.len(), "fusion result saved");
        Ok(path)
    }

    async fn fetch(&self, http: &HttpClient) -> Result<Vec<u8>, FusionError> {
        let response = http
            .get(&self.url)
            .send()
            .await
            .map_err(|err| FusionError::Transport(format!("result download failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FusionError::Transport(format!(
                "result download failed ({})",
                status.as_u16()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FusionError::Transport(format!("result download failed: {err}")))?;
        Ok(bytes.to_vec())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FusionError {
    FusionError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::Router;

    use super::*;
    use crate::media::fixtures::png_bytes;

    #[test]
    fn file_name_is_timestamped_png() {
        let action = SaveAction::for_result("https://cdn/f.png");
        assert!(action.file_name.starts_with("fusion-"));
        assert!(action.file_name.ends_with(".png"));
        assert_eq!(action.url, "https://cdn/f.png");
    }

    #[tokio::test]
    async fn saves_fetched_result() -> anyhow::Result<()> {
        let app = Router::new().route("/f.png", get(|| async { png_bytes("result") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let temp = tempfile::tempdir()?;
        let action = SaveAction::for_result(&format!("http://{addr}/f.png"));
        let path = action.save_to(&temp.path().join("out"), &HttpClient::new()).await?;
        assert_eq!(std::fs::read(path)?, png_bytes("result"));

        let missing = SaveAction::for_result(&format!("http://{addr}/nope.png"));
        let err = missing.save_to(temp.path(), &HttpClient::new()).await.unwrap_err();
        assert!(matches!(err, FusionError::Transport(ref text) if text.contains("404")));
        Ok(())
    }

    #[tokio::test]
    async fn saves_inline_data_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let action = SaveAction::for_result("data:image/png;base64,YWJj");
        let path = action.save_to(temp.path(), &HttpClient::new()).await?;
        assert_eq!(std::fs::read(path)?, b"abc");
        Ok(())
    }
}
