//! Tenant metadata publication to the service registry.

use std::time::Duration;

use async_trait::async_trait;
use provisioner_pipeline::collaborators::{CollaboratorError, MetadataRegistry, TenantMetadata};

use crate::rpc::RpcError;

/// Publishes metadata with `PUT {base}/tenants/{code}`.
pub struct HttpMetadataRegistry {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpMetadataRegistry {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    fn tenant_url(&self, code: &str) -> String {
        format!("{}/tenants/{code}", self.base_url)
    }
}

#[async_trait]
impl MetadataRegistry for HttpMetadataRegistry {
    async fn upsert_tenant_metadata(
        &self,
        code: &str,
        metadata: &TenantMetadata,
    ) -> Result<(), CollaboratorError> {
        let mut request = self
            .client
            .put(self.tenant_url(code))
            .timeout(self.timeout)
            .json(metadata);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| translate(e.into()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(translate(RpcError::HttpStatus {
                status: status.as_u16(),
                body,
            }));
        }

        tracing::info!(tenant_code = code, "Tenant metadata published");
        Ok(())
    }
}

/// Map a registry failure to a collaborator error kind.
fn translate(err: RpcError) -> CollaboratorError {
    match &err {
        RpcError::HttpStatus { status: 409, body } => CollaboratorError::AlreadyExists(body.clone()),
        RpcError::HttpStatus { status: 404, body } => CollaboratorError::NotInstalled(format!(
            "registry has no tenant collection: {body}"
        )),
        _ => err.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn status(status: u16) -> RpcError {
        RpcError::HttpStatus {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn tenant_url_joins_without_double_slash() {
        let registry =
            HttpMetadataRegistry::new("https://registry.local/v1/", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            registry.tenant_url("acme"),
            "https://registry.local/v1/tenants/acme"
        );
    }

    #[test]
    fn statuses_map_to_kinds() {
        assert_matches!(translate(status(409)), CollaboratorError::AlreadyExists(_));
        assert_matches!(translate(status(404)), CollaboratorError::NotInstalled(_));
        assert_matches!(translate(status(401)), CollaboratorError::Unauthorized(_));
        assert_matches!(translate(status(500)), CollaboratorError::Unavailable(_));
        assert_matches!(translate(status(422)), CollaboratorError::Rejected(_));
    }
}
