//! HTTP blob relay client

use std::time::Duration;

use ureq::Agent;

use super::{BlobStore, RelayError};

/// Default public relay
pub const DEFAULT_RELAY_URL: &str = "https://up.10kb.site/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`BlobStore`] over `PUT`/`GET {base}/{slug}`
#[derive(Debug, Clone)]
pub struct HttpRelay {
    base_url: String,
    agent: Agent,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            base_url: base_url.into(),
            agent,
        }
    }

    fn url(&self, slug: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), slug)
    }
}

impl Default for HttpRelay {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_URL)
    }
}

impl BlobStore for HttpRelay {
    fn put(&self, slug: &str, body: &str) -> Result<(), RelayError> {
        let mut response = self
            .agent
            .put(&self.url(slug))
            .header("Content-Type", "text/plain")
            .send(body)?;

        match response.status().as_u16() {
            200 | 201 => Ok(()),
            status => Err(RelayError::Status {
                status,
                body: response.body_mut().read_to_string().unwrap_or_default(),
            }),
        }
    }

    fn get(&self, slug: &str) -> Result<Option<String>, RelayError> {
        let mut response = self.agent.get(&self.url(slug)).call()?;

        match response.status().as_u16() {
            200 => Ok(Some(response.body_mut().read_to_string()?)),
            404 => Ok(None),
            status => Err(RelayError::Status {
                status,
                body: response.body_mut().read_to_string().unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        assert_eq!(
            HttpRelay::new("https://relay.example/").url("abc"),
            "https://relay.example/abc"
        );
        assert_eq!(
            HttpRelay::new("http://127.0.0.1:8080").url("abc"),
            "http://127.0.0.1:8080/abc"
        );
        assert_eq!(HttpRelay::default().url("abc"), "https://up.10kb.site/abc");
    }
}
