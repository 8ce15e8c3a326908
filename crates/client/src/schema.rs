//! Authenticated HTTP fetch of the custom-field schema document.
//!
//! The document lives in the repository under the project's storage root at
//! a fixed relative path. It is served over HTTP(S) with the session's
//! credentials as basic auth; `ureq` keeps the call synchronous like every
//! other remote call in the stack.

use base64::prelude::{Engine, BASE64_STANDARD};
use remora_core::custom::{SchemaFetchError, SchemaSource, CUSTOM_FIELDS_PATH};
use ureq::tls::TlsConfig;
use ureq::Agent;

use crate::config::ClientConfig;

pub struct HttpSchemaSource {
    agent: Agent,
    repo_url: String,
    authorization: String,
}

impl HttpSchemaSource {
    pub fn new(config: &ClientConfig) -> HttpSchemaSource {
        let agent = if config.verify_tls {
            Agent::new_with_defaults()
        } else {
            tracing::warn!("TLS certificate validation disabled for schema document fetches");
            Agent::config_builder()
                .tls_config(TlsConfig::builder().disable_verification(true).build())
                .build()
                .new_agent()
        };
        let credentials = BASE64_STANDARD.encode(format!("{}:{}", config.user, config.password));
        HttpSchemaSource {
            agent,
            repo_url: config.repo_url.trim_end_matches('/').to_string(),
            authorization: format!("Basic {credentials}"),
        }
    }

    /// The document URL for a project storage root.
    pub fn document_url(&self, storage_root: &str) -> String {
        format!(
            "{}/{}/{}",
            self.repo_url,
            storage_root.trim_matches('/'),
            CUSTOM_FIELDS_PATH
        )
    }
}

impl SchemaSource for HttpSchemaSource {
    fn fetch(&self, storage_root: &str) -> Result<String, SchemaFetchError> {
        let url = self.document_url(storage_root);
        tracing::debug!(%url, "fetching custom field schema document");
        let response = self
            .agent
            .get(&url)
            .header("Authorization", &self.authorization)
            .call()
            .map_err(|e| SchemaFetchError(format!("GET {url}: {e}")))?;
        response
            .into_body()
            .read_to_string()
            .map_err(|e| SchemaFetchError(format!("reading {url}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            endpoint: "https://alm.example.com/ws".to_string(),
            repo_url: "https://alm.example.com/repo/".to_string(),
            user: "svc".to_string(),
            password: "secret".to_string(),
            default_project: None,
            verify_tls: true,
        }
    }

    #[test]
    fn document_url_joins_root_and_fixed_path() {
        let source = HttpSchemaSource::new(&config());
        assert_eq!(
            source.document_url("/Starter"),
            "https://alm.example.com/repo/Starter/testing/configuration/testrun-custom-fields.xml"
        );
    }

    #[test]
    fn authorization_header_is_basic_auth() {
        let source = HttpSchemaSource::new(&config());
        assert_eq!(
            source.authorization,
            format!("Basic {}", BASE64_STANDARD.encode("svc:secret"))
        );
    }
}
