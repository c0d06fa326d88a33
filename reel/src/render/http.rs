use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{FrameLocation, RenderRequest, Renderer};
use crate::error::RenderError;

/// Renderer that POSTs [`RenderRequest`]s as JSON to `{base}/render`.
#[derive(Clone, Debug)]
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderer {
    /// Build a renderer for the service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RenderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/render", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render_frame(
        &self,
        request: &RenderRequest,
    ) -> Result<FrameLocation, RenderError> {
        debug!(task = %request.key, endpoint = %self.endpoint, "requesting frame");

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| RenderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RenderError::Failed(format!("{status}: {body}")));
        }

        response
            .json::<FrameLocation>()
            .await
            .map_err(|e| RenderError::Failed(format!("bad render response: {e}")))
    }
}
