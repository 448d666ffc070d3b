//! # Conjur REST Client
//!
//! Batch variable retrieval against the Conjur REST API.
//!
//! Authentication is done elsewhere: an authenticator container writes a
//! short-lived access token to a shared file, and every request reads the
//! current token from that file.
//!
//! References:
//! - [Batch Retrieval](https://docs.conjur.org/Latest/en/Content/Developer/Conjur_API_Batch_Retrieve.htm)

use super::{RetrieveError, SecretRetriever, SecretValues};
use crate::constants::DEFAULT_ACCESS_TOKEN_FILE;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::AUTHORIZATION;
use reqwest::{Certificate, Client};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, info_span, Instrument};
use zeroize::Zeroizing;

/// Conjur connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConjurConfig {
    pub appliance_url: String,
    pub account: String,
    pub access_token_file: PathBuf,
    /// PEM bundle trusted in addition to the system roots
    pub ssl_certificate: Option<String>,
}

impl ConjurConfig {
    /// Read settings from the process environment
    ///
    /// `CONJUR_APPLIANCE_URL` and `CONJUR_ACCOUNT` are required. The CA is taken
    /// from `CONJUR_SSL_CERTIFICATE`, or read from `CONJUR_CERT_FILE`.
    pub fn from_env() -> Result<Self, RetrieveError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConjurConfig::from_env`] with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RetrieveError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| RetrieveError::Config(format!("{key} must be set")))
        };

        let ssl_certificate = match lookup("CONJUR_SSL_CERTIFICATE").filter(|v| !v.is_empty()) {
            Some(pem) => Some(pem),
            None => match lookup("CONJUR_CERT_FILE").filter(|v| !v.is_empty()) {
                Some(path) => Some(std::fs::read_to_string(&path).map_err(|e| {
                    RetrieveError::Config(format!("failed to read CONJUR_CERT_FILE {path}: {e}"))
                })?),
                None => None,
            },
        };

        Ok(Self {
            appliance_url: required("CONJUR_APPLIANCE_URL")?,
            account: required("CONJUR_ACCOUNT")?,
            access_token_file: lookup("CONJUR_AUTHN_TOKEN_FILE")
                .filter(|v| !v.is_empty())
                .map_or_else(|| PathBuf::from(DEFAULT_ACCESS_TOKEN_FILE), PathBuf::from),
            ssl_certificate,
        })
    }
}

/// [`SecretRetriever`] backed by the Conjur batch retrieval endpoint
pub struct ConjurRetriever {
    http_client: Client,
    config: ConjurConfig,
}

impl fmt::Debug for ConjurRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConjurRetriever")
            .field("appliance_url", &self.config.appliance_url)
            .field("account", &self.config.account)
            .finish_non_exhaustive()
    }
}

impl ConjurRetriever {
    pub fn new(config: ConjurConfig) -> Result<Self, RetrieveError> {
        let mut builder = Client::builder();
        if let Some(pem) = &config.ssl_certificate {
            for cert in Certificate::from_pem_bundle(pem.as_bytes())
                .map_err(|e| RetrieveError::Config(format!("invalid Conjur SSL certificate: {e}")))?
            {
                builder = builder.add_root_certificate(cert);
            }
        }
        let http_client = builder
            .build()
            .map_err(|e| RetrieveError::Config(format!("failed to build HTTP client: {e}")))?;

        info!(appliance_url = %config.appliance_url, "Created Conjur client");
        Ok(Self {
            http_client,
            config,
        })
    }

    fn batch_url(&self) -> String {
        format!("{}/secrets", self.config.appliance_url.trim_end_matches('/'))
    }

    async fn authorization_header(&self) -> Result<Zeroizing<String>, RetrieveError> {
        let token = tokio::fs::read(&self.config.access_token_file)
            .await
            .map(Zeroizing::new)
            .map_err(|source| RetrieveError::AccessToken {
                path: self.config.access_token_file.display().to_string(),
                source,
            })?;
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(token.as_slice()));
        Ok(Zeroizing::new(format!("Token token=\"{}\"", encoded.as_str())))
    }
}

/// `<account>:variable:<id>`
#[must_use]
pub fn full_variable_id(account: &str, id: &str) -> String {
    format!("{account}:variable:{id}")
}

/// Strip the `<account>:variable:` prefix from a fully qualified id
///
/// Ids without exactly that shape are returned unchanged.
#[must_use]
pub fn normalise_variable_id(full_id: &str) -> &str {
    let mut parts = full_id.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(_), Some(id)) => id,
        _ => full_id,
    }
}

#[async_trait]
impl SecretRetriever for ConjurRetriever {
    async fn retrieve_secrets(&self, paths: &[String]) -> Result<SecretValues, RetrieveError> {
        if paths.is_empty() {
            info!("No Conjur variables to retrieve");
            return Ok(SecretValues::new());
        }

        let span = info_span!("conjur.batch_retrieve", variable.count = paths.len());

        async move {
            info!(variables = ?paths, "Retrieving Conjur variables");
            let variable_ids = paths
                .iter()
                .map(|path| full_variable_id(&self.config.account, path))
                .collect::<Vec<_>>()
                .join(",");
            let authorization = self.authorization_header().await?;

            let response = self
                .http_client
                .get(self.batch_url())
                .query(&[("variable_ids", variable_ids.as_str())])
                .header(AUTHORIZATION, authorization.as_str())
                .send()
                .await
                .map_err(|e| RetrieveError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                debug!(status = status.as_u16(), "Conjur rejected batch retrieval");
                return Err(RetrieveError::Status {
                    status: status.as_u16(),
                });
            }

            let body = Zeroizing::new(
                response
                    .bytes()
                    .await
                    .map_err(|e| RetrieveError::Response(e.to_string()))?
                    .to_vec(),
            );
            // Parser messages can quote values, report the position only
            let values: HashMap<String, Zeroizing<String>> = serde_json::from_slice(&body)
                .map_err(|e| {
                    RetrieveError::Response(format!(
                        "expected a JSON object of variable values (line {} column {})",
                        e.line(),
                        e.column()
                    ))
                })?;

            Ok(values
                .into_iter()
                .map(|(full_id, value)| {
                    (
                        normalise_variable_id(&full_id).to_string(),
                        Zeroizing::new(value.as_bytes().to_vec()),
                    )
                })
                .collect())
        }
        .instrument(span)
        .await
    }
}
