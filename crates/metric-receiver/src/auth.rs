// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::AuthConfig;
use crate::errors::AuthError;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REMOTE_AUTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Decides whether a (username, password) pair may open a connection.
#[derive(Clone)]
pub enum Authorizer {
    Static(Arc<HashMap<String, String>>),
    Remote { client: reqwest::Client, url: String },
}

impl Authorizer {
    pub fn new_from_static_credentials(credentials: HashMap<String, String>) -> Self {
        Self::Static(Arc::new(credentials))
    }

    pub fn new_remote(host: &str) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(REMOTE_AUTH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Client(e.to_string()))?;
        Ok(Self::Remote {
            client,
            url: format!("{}/auth", host.trim_end_matches('/')),
        })
    }

    /// Local credentials win over a remote host.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        match &config.host {
            Some(host) if config.credentials.is_empty() => Self::new_remote(host),
            _ => Ok(Self::new_from_static_credentials(config.credentials.clone())),
        }
    }

    pub async fn validate(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        match self {
            Self::Static(credentials) => {
                Ok(credentials.get(username).is_some_and(|p| p == password))
            }
            Self::Remote { client, url } => {
                let resp = client
                    .post(url)
                    .query(&[("username", username), ("password", password)])
                    .send()
                    .await
                    .map_err(|e| AuthError::Request(e.to_string()))?;
                debug!("Authorization service answered {} for {username}", resp.status());
                Ok(resp.status() == StatusCode::OK)
            }
        }
    }
}

impl Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => write!(f, "Authorizer::Static"),
            Self::Remote { url, .. } => write!(f, "Authorizer::Remote({url})"),
        }
    }
}
