//! # HTTP Delivery
//!
//! Sends cloud events in binary content mode: event attributes travel as
//! `ce-*` headers and the data as a JSON body.

use super::{CloudEvent, CloudEventClient, CloudEventError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const SPEC_VERSION: &str = "1.0";

#[derive(Debug, Clone)]
pub struct HttpCloudEventClient {
    http_client: Client,
}

impl HttpCloudEventClient {
    pub fn new(timeout: Duration) -> Result<Self, CloudEventError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| CloudEventError::Http {
                target: String::new(),
                source,
            })?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl CloudEventClient for HttpCloudEventClient {
    async fn send(&self, target: &str, event: &CloudEvent) -> Result<(), CloudEventError> {
        let response = self
            .http_client
            .post(target)
            .header("ce-specversion", SPEC_VERSION)
            .header("ce-id", &event.id)
            .header("ce-source", &event.source)
            .header("ce-type", &event.r#type)
            .json(&event.data)
            .send()
            .await
            .map_err(|source| CloudEventError::Http {
                target: target.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudEventError::Rejected {
                target: target.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(target = target, id = event.id.as_str(), "Cloud event accepted");
        Ok(())
    }
}
