//! Publisher (Component D, §4.4): posts a status against the target
//! microblog's Mastodon-compatible HTTP API.
//!
//! Retry/back-off state machines follow the teacher's
//! `XApiHttpClient`/`map_error_response` shape, generalised from
//! X-specific status codes to the taxonomy in §7.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::PublisherError;
use crate::model::{Media, MediaKind};

/// Media exceeding this many bytes is rejected at upload time (§4.4).
pub const MAX_MEDIA_BYTES: u64 = 10 * 1024 * 1024;
/// Media polling back-off bounds (§4.4).
const MEDIA_POLL_INITIAL: Duration = Duration::from_secs(1);
const MEDIA_POLL_MAX: Duration = Duration::from_secs(5);
const MEDIA_POLL_MAX_ATTEMPTS: u32 = 10;

/// One item pending upload: either raw bytes or a remote URL the publisher
/// fetches itself.
pub enum MediaSource {
    Bytes { bytes: Vec<u8>, filename: String, mime: String },
    Url { url: String, filename: String, mime: String },
}

/// HTTP client for the target microblog's Mastodon-compatible API.
pub struct Publisher {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl Publisher {
    /// Create a publisher bound to one target account.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into(), token: token.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Upload one media item and poll until it's ready, returning its
    /// `media_id`. Rejects items over [`MAX_MEDIA_BYTES`] before ever
    /// sending the request.
    pub async fn upload_media(&self, source: MediaSource, alt_text: Option<&str>) -> Result<String, PublisherError> {
        if let MediaSource::Bytes { bytes, .. } = &source {
            if bytes.len() as u64 > MAX_MEDIA_BYTES {
                return Err(PublisherError::MediaRejected {
                    message: format!("media exceeds {MAX_MEDIA_BYTES} byte cap"),
                });
            }
        }

        let (bytes, mime, filename) = match source {
            MediaSource::Bytes { bytes, mime, filename } => (bytes, mime, filename),
            MediaSource::Url { url, mime, filename } => {
                let response = self.client.get(&url).send().await.map_err(|e| PublisherError::Network { source: e })?;
                let bytes = response.bytes().await.map_err(|e| PublisherError::Network { source: e })?;
                if bytes.len() as u64 > MAX_MEDIA_BYTES {
                    return Err(PublisherError::MediaRejected {
                        message: format!("media exceeds {MAX_MEDIA_BYTES} byte cap"),
                    });
                }
                (bytes.to_vec(), mime, filename)
            }
        };

        let mut form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename).mime_str(&mime).map_err(|_| {
                PublisherError::MediaRejected { message: format!("invalid mime type: {mime}") }
            })?,
        );
        if let Some(alt) = alt_text {
            form = form.text("description", alt.to_string());
        }

        let response = self
            .client
            .post(self.url("/api/v2/media"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PublisherError::Network { source: e })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(PublisherError::MediaRejected { message: body });
        }
        if !status.is_success() && status != reqwest::StatusCode::ACCEPTED {
            return Err(map_status_error(status).unwrap_or(PublisherError::ServerErrorExhausted {
                message: format!("unexpected status {status}"),
            }));
        }

        let media: MediaResponse = response.json().await.map_err(|e| PublisherError::Network { source: e })?;
        if status == reqwest::StatusCode::ACCEPTED || media.url.is_none() {
            self.poll_media_ready(&media.id).await?;
        }

        Ok(media.id)
    }

    async fn poll_media_ready(&self, media_id: &str) -> Result<(), PublisherError> {
        let mut delay = MEDIA_POLL_INITIAL;
        for attempt in 1..=MEDIA_POLL_MAX_ATTEMPTS {
            let response = self
                .client
                .get(self.url(&format!("/api/v1/media/{media_id}")))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| PublisherError::Network { source: e })?;

            if response.status() == reqwest::StatusCode::OK {
                return Ok(());
            }
            if response.status() != reqwest::StatusCode::ACCEPTED {
                return Err(map_status_error(response.status()).unwrap_or(PublisherError::ServerErrorExhausted {
                    message: format!("unexpected status polling media: {}", response.status()),
                }));
            }

            if attempt == MEDIA_POLL_MAX_ATTEMPTS {
                return Err(PublisherError::MediaProcessingTimeout {
                    media_id: media_id.to_string(),
                    attempts: attempt,
                });
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MEDIA_POLL_MAX);
        }
        Ok(())
    }

    /// Publish a status. Retries 429s (honouring `Retry-After` + jitter, up
    /// to 3 attempts) and 5xx (linear back-off, up to 2 attempts). If
    /// `in_reply_to` is set and the target replies "record not found",
    /// retries once as a standalone post.
    pub async fn publish(
        &self,
        text: &str,
        media_ids: &[String],
        visibility: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String, PublisherError> {
        match self.try_publish(text, media_ids, visibility, in_reply_to).await {
            Ok(id) => Ok(id),
            Err(PublisherError::StatusNotFound { .. }) if in_reply_to.is_some() => {
                tracing::warn!("in_reply_to target not found, degrading to standalone post");
                self.try_publish(text, media_ids, visibility, None).await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_publish(
        &self,
        text: &str,
        media_ids: &[String],
        visibility: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String, PublisherError> {
        let body = PostStatusRequest {
            status: text.to_string(),
            media_ids: media_ids.to_vec(),
            visibility: visibility.to_string(),
            in_reply_to_id: in_reply_to.map(str::to_string),
        };

        let mut rate_limit_attempts = 0u32;
        let mut server_error_attempts = 0u32;

        loop {
            let response = self
                .client
                .post(self.url("/api/v1/statuses"))
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await
                .map_err(|e| PublisherError::Network { source: e })?;

            let status = response.status();

            if status.is_success() {
                let posted: PostedStatus = response.json().await.map_err(|e| PublisherError::Network { source: e })?;
                return Ok(posted.id);
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(PublisherError::StatusNotFound { status_id: in_reply_to.unwrap_or_default().to_string() });
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                rate_limit_attempts += 1;
                if rate_limit_attempts > 3 {
                    return Err(PublisherError::RateLimitExhausted);
                }
                let retry_after = retry_after_seconds(&response).unwrap_or(1);
                let jitter = rand::thread_rng().gen_range(1..=3);
                tokio::time::sleep(Duration::from_secs(retry_after + jitter)).await;
                continue;
            }
            if status.is_server_error() {
                server_error_attempts += 1;
                if server_error_attempts > 2 {
                    let body = response.text().await.unwrap_or_default();
                    return Err(PublisherError::ServerErrorExhausted { message: body });
                }
                let delay = rand::thread_rng().gen_range(1..=3);
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }

            return Err(map_status_error(status).unwrap_or(PublisherError::ServerErrorExhausted {
                message: format!("unexpected status {status}"),
            }));
        }
    }

    /// Edit a status's text. Media MUST NOT be changed via this path.
    pub async fn update_status(&self, status_id: &str, text: &str) -> Result<(), PublisherError> {
        let body = serde_json::json!({ "status": text });
        let response = self
            .client
            .put(self.url(&format!("/api/v1/statuses/{status_id}")))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublisherError::Network { source: e })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PublisherError::StatusNotFound { status_id: status_id.to_string() });
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(PublisherError::EditNotAllowed { status_id: status_id.to_string() });
        }
        Err(map_status_error(status).unwrap_or(PublisherError::ServerErrorExhausted {
            message: format!("unexpected status {status}"),
        }))
    }

    /// Delete a status.
    pub async fn delete_status(&self, status_id: &str) -> Result<(), PublisherError> {
        let response = self
            .client
            .delete(self.url(&format!("/api/v1/statuses/{status_id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PublisherError::Network { source: e })?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(map_status_error(status).unwrap_or(PublisherError::ServerErrorExhausted {
            message: format!("unexpected status {status}"),
        }))
    }
}

fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.parse().ok()
}

fn map_status_error(status: reqwest::StatusCode) -> Option<PublisherError> {
    match status {
        reqwest::StatusCode::UNPROCESSABLE_ENTITY => Some(PublisherError::ValidationError {
            message: "target API rejected the request (422)".to_string(),
        }),
        reqwest::StatusCode::FORBIDDEN => Some(PublisherError::EditNotAllowed { status_id: String::new() }),
        reqwest::StatusCode::NOT_FOUND => Some(PublisherError::StatusNotFound { status_id: String::new() }),
        _ => None,
    }
}

/// Select which of a post's media items survive to upload time: caps at
/// [`crate::model::MAX_MEDIA_COUNT`] and drops `link_card`/`video_thumbnail`
/// when a playable video is present (pipeline step 8, §4.5).
pub fn media_sources_for(media: &[Media]) -> Vec<&Media> {
    media
        .iter()
        .filter(|m| !matches!(m.kind, MediaKind::LinkCard | MediaKind::VideoThumbnail) || !media.iter().any(|x| x.kind == MediaKind::Video))
        .take(crate::model::MAX_MEDIA_COUNT)
        .collect()
}

#[derive(Debug, serde::Serialize)]
struct PostStatusRequest {
    status: String,
    media_ids: Vec<String>,
    visibility: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostedStatus {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn publish_success_returns_status_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "42"})))
            .mount(&server)
            .await;

        let publisher = Publisher::new(client(), server.uri(), "tok".to_string());
        let id = publisher.publish("hello", &[], "public", None).await.unwrap();
        assert_eq!(id, "42");
    }

    #[tokio::test]
    async fn publish_not_found_on_reply_degrades_to_standalone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "99"})))
            .mount(&server)
            .await;

        let publisher = Publisher::new(client(), server.uri(), "tok".to_string());
        let id = publisher.publish("hello", &[], "public", Some("parent-1")).await.unwrap();
        assert_eq!(id, "99");
    }

    #[tokio::test]
    async fn publish_rate_limit_exhausted_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let publisher = Publisher::new(client(), server.uri(), "tok".to_string());
        let result = publisher.publish("hello", &[], "public", None).await;
        assert!(matches!(result, Err(PublisherError::RateLimitExhausted)));
    }

    #[tokio::test]
    async fn update_status_forbidden_maps_to_edit_not_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/statuses/5"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let publisher = Publisher::new(client(), server.uri(), "tok".to_string());
        let result = publisher.update_status("5", "new text").await;
        assert!(matches!(result, Err(PublisherError::EditNotAllowed { .. })));
    }

    #[tokio::test]
    async fn upload_media_oversize_rejected_before_request() {
        let publisher = Publisher::new(client(), "https://example.com".to_string(), "tok".to_string());
        let source = MediaSource::Bytes {
            bytes: vec![0u8; (MAX_MEDIA_BYTES + 1) as usize],
            filename: "big.jpg".to_string(),
            mime: "image/jpeg".to_string(),
        };
        let result = publisher.upload_media(source, None).await;
        assert!(matches!(result, Err(PublisherError::MediaRejected { .. })));
    }

    #[tokio::test]
    async fn delete_status_treats_404_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/statuses/7"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let publisher = Publisher::new(client(), server.uri(), "tok".to_string());
        assert!(publisher.delete_status("7").await.is_ok());
    }

    #[test]
    fn media_sources_for_drops_link_card_when_video_present() {
        let media = vec![
            Media { kind: MediaKind::Video, url: "v.mp4".into(), alt_text: None, width: None, height: None, thumbnail_url: None, title: None, description: None },
            Media { kind: MediaKind::LinkCard, url: "c.html".into(), alt_text: None, width: None, height: None, thumbnail_url: None, title: None, description: None },
        ];
        let kept = media_sources_for(&media);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].kind, MediaKind::Video);
    }
}
