use super::{FileCookieJar, FileUpload, Transport};
use crate::config::Config;
use crate::mime::detect_image_mime;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{redirect, Client, Response};
use std::sync::Arc;

/// reqwest-backed transport sharing one cookie jar across all calls.
pub struct HttpTransport {
    client: Client,
    cookies: Arc<FileCookieJar>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let cookies = Arc::new(FileCookieJar::open(&config.cookie_path));

        // The service is reached over plain HTTP or with self-signed certs, and
        // its redirects must be seen rather than followed.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(true)
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .cookie_provider(cookies.clone())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client, cookies })
    }

    pub fn cookies(&self) -> &FileCookieJar {
        &self.cookies
    }

    async fn read_body(response: Response, url: &str) -> Result<Vec<u8>> {
        let status = response.status();
        if !status.is_success() {
            tracing::error!("Request to {} failed with status {}", url, status);
            return Err(Error::transport(
                format!("status {}", status.as_u16()),
                format!("{} returned {}", url, status),
            ));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn file_part(upload: &FileUpload) -> Result<Part> {
        let bytes = tokio::fs::read(&upload.path).await?;
        let file_name = upload
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = detect_image_mime(&bytes);

        let part = Part::bytes(bytes).file_name(file_name);
        Ok(match mime {
            Some(mime) => part.mime_str(mime)?,
            None => part,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::error!("Failed to send GET {}: {}", url, e);
            e
        })?;

        Self::read_body(response, url).await
    }

    async fn head(&self, url: &str) -> Result<u16> {
        tracing::debug!("HEAD {}", url);

        let response = self.client.head(url).send().await.map_err(|e| {
            tracing::warn!("Failed to send HEAD {}: {}", url, e);
            e
        })?;

        Ok(response.status().as_u16())
    }

    async fn post_multipart(
        &self,
        url: &str,
        fields: &[(String, String)],
        files: &[FileUpload],
    ) -> Result<Vec<u8>> {
        tracing::debug!(
            "POST {} ({} fields, {} files)",
            url,
            fields.len(),
            files.len()
        );

        let mut form = Form::new().percent_encode_noop();
        for (name, value) in fields {
            form = form.text(name.clone(), value.clone());
        }
        for upload in files {
            form = form.part(upload.field.clone(), Self::file_part(upload).await?);
        }

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send POST {}: {}", url, e);
                e
            })?;

        Self::read_body(response, url).await
    }

    fn clear_session(&self) -> Result<()> {
        self.cookies.clear()
    }
}
