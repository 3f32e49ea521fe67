//! `reqwest`-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use tokio::io::AsyncWriteExt;

use super::{ProgressSink, Transport, TransportRequest};
use crate::callbacks::{Progress, ProgressKind};
use crate::config::{RequestSerializer, ResponseSerializer};
use crate::error::RequestError;
use crate::request::{MultipartForm, Parameters, PartContent};
use crate::response::Response;

/// Transport over a shared `reqwest::Client`.
///
/// - GET/HEAD/DELETE parameters go to the query string.
/// - Other methods send parameters as JSON or urlencoded form, per the
///   request serializer.
/// - An upload body switches to multipart; parameters become text fields.
/// - With a download path the body is streamed to disk and the response body
///   is left empty.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RequestError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
        progress: ProgressSink,
    ) -> Result<Response, RequestError> {
        let TransportRequest {
            method,
            url,
            headers,
            parameters,
            upload,
            timeout,
            download_path,
            request_serializer,
            response_serializer,
        } = request;

        let mut builder = self.client.request(method.into(), &url).timeout(timeout);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let upload_len = upload.as_ref().map(MultipartForm::known_len);
        if let Some(form) = upload {
            builder = builder.multipart(build_form(form, &parameters).await?);
        } else if method.encodes_parameters_in_query() {
            if !parameters.is_empty() {
                builder = builder.query(&parameter_pairs(&parameters));
            }
        } else {
            builder = match request_serializer {
                RequestSerializer::Json => builder.json(&parameters),
                RequestSerializer::Form => builder.form(&parameter_pairs(&parameters)),
            };
        }

        if let Some(total) = upload_len {
            progress(ProgressKind::Upload, Progress::new(0, Some(total)));
        }
        tracing::debug!(target: "reqcycle::transport", %method, url = %url, "sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        if let Some(total) = upload_len {
            progress(ProgressKind::Upload, Progress::new(total, Some(total)));
        }

        let status = response.status();
        let response_headers = response.headers().clone();
        tracing::debug!(target: "reqcycle::transport", url = %url, status = status.as_u16(), "response received");

        if !status.is_success() {
            let body = response.bytes().await.ok();
            return Err(RequestError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("HTTP error").to_string(),
                body,
            });
        }

        let total = response.content_length();
        let mut received = 0u64;
        let mut stream = response.bytes_stream();

        let (body, download_path) = match download_path {
            Some(path) => {
                let mut file = tokio::fs::File::create(&path).await?;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| map_send_error(e, timeout))?;
                    file.write_all(&chunk).await?;
                    received += chunk.len() as u64;
                    progress(ProgressKind::Download, Progress::new(received, total));
                }
                file.flush().await?;
                (Bytes::new(), Some(path))
            }
            None => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| map_send_error(e, timeout))?;
                    buf.extend_from_slice(&chunk);
                    received += chunk.len() as u64;
                    progress(ProgressKind::Download, Progress::new(received, total));
                }
                (buf.freeze(), None)
            }
        };

        if response_serializer == ResponseSerializer::Json
            && download_path.is_none()
            && !body.is_empty()
        {
            serde_json::from_slice::<serde_json::Value>(&body)?;
        }

        let mut out = Response::new(status.as_u16(), body);
        out.headers = response_headers;
        out.download_path = download_path;
        Ok(out)
    }
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> RequestError {
    if err.is_timeout() {
        RequestError::Timeout(timeout)
    } else {
        err.into()
    }
}

/// Flatten parameters into string pairs for query strings and forms.
fn parameter_pairs(parameters: &Parameters) -> Vec<(String, String)> {
    parameters
        .iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

async fn build_form(form: MultipartForm, parameters: &Parameters) -> Result<Form, RequestError> {
    let mut out = Form::new();
    for (name, value) in parameter_pairs(parameters) {
        out = out.text(name, value);
    }
    for part in form.into_parts() {
        let mut built = match part.content {
            PartContent::Text(text) => Part::text(text),
            PartContent::Bytes(data) => Part::bytes(data.to_vec()),
            PartContent::File(path) => Part::bytes(tokio::fs::read(&path).await?),
        };
        if let Some(file_name) = part.file_name {
            built = built.file_name(file_name);
        }
        if let Some(mime) = part.mime_type {
            built = built
                .mime_str(&mime)
                .map_err(|e| RequestError::Serialization(format!("invalid MIME type '{mime}': {e}")))?;
        }
        out = out.part(part.name, built);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameter_pairs_render_scalars_plainly() {
        let mut params = Parameters::new();
        params.insert("id".into(), json!(42));
        params.insert("name".into(), json!("widget"));
        params.insert("empty".into(), json!(null));

        let pairs = parameter_pairs(&params);
        assert_eq!(
            pairs,
            vec![
                ("empty".to_string(), String::new()),
                ("id".to_string(), "42".to_string()),
                ("name".to_string(), "widget".to_string()),
            ]
        );
    }
}
