//! WebSocket proxying.
//!
//! Only instance selection is performed; tunneling the upgraded connection
//! is not implemented.

use url::Url;

use crate::error::{GatewayError, Result};
use crate::proxy::request::ProxyRequestConfig;
use crate::proxy::rewrite::{build_target_url, rewrite_path};
use crate::proxy::service::ServiceProxy;

/// Where a WebSocket upgrade for a service would be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketTarget {
    pub instance_id: String,
    pub url: Url,
}

impl ServiceProxy {
    pub fn select_websocket_target(&self, request: &ProxyRequestConfig) -> Result<WebSocketTarget> {
        let settings = self.settings_for(request);
        let instance = self.select(request)?;
        let path = rewrite_path(
            &request.path,
            settings.strip_prefix.as_deref(),
            settings.add_prefix.as_deref(),
        );
        let mut url = build_target_url(&instance.base_url(), &path, &request.query)?;
        url.set_scheme("ws")
            .map_err(|_| GatewayError::InvalidRequest("cannot build websocket url".into()))?;

        tracing::info!(
            service = %request.service,
            instance = %instance.id(),
            url = %url,
            "WebSocket target selected; tunneling not implemented"
        );
        Ok(WebSocketTarget {
            instance_id: instance.id().to_string(),
            url,
        })
    }
}
