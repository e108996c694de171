//! Request descriptors.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Error, Result};

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct RequestConfig {
    /// Extra headers for this call only
    pub headers: Vec<(String, String)>,
    /// Query parameters appended to the URL
    pub query: Vec<(String, String)>,
    /// Caller-side abort handle
    pub cancel: Option<CancellationToken>,
    /// Overrides the client's default timeout
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Request body. Both variants are cheap to clone so a request can be replayed.
#[derive(Clone, Debug)]
pub enum RequestBody {
    Json(serde_json::Value),
    Multipart(MultipartForm),
}

impl RequestBody {
    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<MultipartForm> for RequestBody {
    fn from(form: MultipartForm) -> Self {
        Self::Multipart(form)
    }
}

/// One field of a multipart form.
#[derive(Clone, Debug)]
pub enum Part {
    Text(String),
    File {
        file_name: String,
        mime_type: String,
        data: Bytes,
    },
}

/// Replayable multipart form; converted to a `reqwest` form on every send.
#[derive(Clone, Debug, Default)]
pub struct MultipartForm {
    parts: Vec<(String, Part)>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push((name.into(), Part::Text(value.into())));
        self
    }

    /// Add a file part. An empty `mime_type` is guessed from the file name.
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let file_name = file_name.into();
        let mut mime_type = mime_type.into();
        if mime_type.is_empty() {
            mime_type = mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
        }

        self.parts.push((
            name.into(),
            Part::File {
                file_name,
                mime_type,
                data: data.into(),
            },
        ));
        self
    }

    pub fn parts(&self) -> &[(String, Part)] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn to_reqwest(&self) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for (name, part) in &self.parts {
            form = match part {
                Part::Text(value) => form.text(name.clone(), value.clone()),
                Part::File {
                    file_name,
                    mime_type,
                    data,
                } => {
                    let part = reqwest::multipart::Part::bytes(data.to_vec())
                        .file_name(file_name.clone())
                        .mime_str(mime_type)
                        .map_err(|e| {
                            Error::InvalidRequest(format!(
                                "invalid MIME type {mime_type:?} for part {name}: {e}"
                            ))
                        })?;
                    form.part(name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

/// A logical request: everything needed to send it, and to send it again.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Correlates the original attempt with its replay in logs.
    pub id: Uuid,
    pub method: Method,
    /// Absolute URL or path relative to the base URL.
    pub path: String,
    pub body: Option<RequestBody>,
    pub config: RequestConfig,
}

impl HttpRequest {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        body: Option<RequestBody>,
        config: RequestConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            body,
            config,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None, RequestConfig::default())
    }

    pub fn is_cancelled(&self) -> bool {
        self.config.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_config_builder() {
        let token = CancellationToken::new();
        let config = RequestConfig::new()
            .header("X-Trace", "1")
            .query("page", 2)
            .cancel_token(token.clone())
            .timeout(Duration::from_secs(3));

        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.query, vec![("page".to_string(), "2".to_string())]);
        assert!(!config.is_cancelled());
        token.cancel();
        assert!(config.is_cancelled());
    }

    #[test]
    fn test_multipart_guesses_mime() {
        let form = MultipartForm::new()
            .text("folderName", "reef")
            .file("images", "coral.png", "", vec![1u8, 2, 3])
            .file("images", "notes.bin", "application/x-custom", vec![0u8]);

        assert_eq!(form.parts().len(), 3);
        match &form.parts()[1].1 {
            Part::File { mime_type, .. } => assert_eq!(mime_type, "image/png"),
            other => panic!("unexpected part: {:?}", other),
        }
        match &form.parts()[2].1 {
            Part::File { mime_type, .. } => assert_eq!(mime_type, "application/x-custom"),
            other => panic!("unexpected part: {:?}", other),
        }
        assert!(form.to_reqwest().is_ok());
    }

    #[test]
    fn test_invalid_mime_is_rejected() {
        let form = MultipartForm::new().file("f", "a", "not a mime", vec![0u8]);
        let err = form.to_reqwest().unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = HttpRequest::get("/a");
        let b = HttpRequest::get("/a");
        assert_ne!(a.id, b.id);
        assert_eq!(a.method, Method::GET);
    }

    #[test]
    fn test_json_body() {
        let body = RequestBody::json(&json!({"ids": ["1", "2"]})).unwrap();
        assert!(matches!(body, RequestBody::Json(v) if v["ids"][1] == "2"));
    }
}
