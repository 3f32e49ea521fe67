//! Multipart upload description.
//!
//! The caller supplies a builder closure; the engine runs it when the request
//! is handed to the transport, so the parts are produced fresh for every
//! dispatch (restarts included).

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

#[derive(Debug, Clone)]
pub enum PartContent {
    Text(String),
    Bytes(Bytes),
    /// Read by the transport at send time.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub content: PartContent,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Multipart form filled by an `UploadBody` builder.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<FormPart>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.parts.push(FormPart {
            name: name.into(),
            content: PartContent::Text(value.into()),
            file_name: None,
            mime_type: None,
        });
        self
    }

    pub fn bytes(
        &mut self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> &mut Self {
        self.parts.push(FormPart {
            name: name.into(),
            content: PartContent::Bytes(data.into()),
            file_name: Some(file_name.into()),
            mime_type: Some(mime_type.into()),
        });
        self
    }

    pub fn file(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        mime_type: Option<String>,
    ) -> &mut Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        self.parts.push(FormPart {
            name: name.into(),
            content: PartContent::File(path),
            file_name,
            mime_type,
        });
        self
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<FormPart> {
        self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Bytes known up front (text and in-memory parts; files are not stat'ed).
    pub fn known_len(&self) -> u64 {
        self.parts
            .iter()
            .map(|p| match &p.content {
                PartContent::Text(s) => s.len() as u64,
                PartContent::Bytes(b) => b.len() as u64,
                PartContent::File(_) => 0,
            })
            .sum()
    }
}

/// Builder closure describing the multipart parts of an upload.
#[derive(Clone)]
pub struct UploadBody(Arc<dyn Fn(&mut MultipartForm) + Send + Sync>);

impl UploadBody {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&mut MultipartForm) + Send + Sync + 'static,
    {
        Self(Arc::new(build))
    }

    pub fn build(&self) -> MultipartForm {
        let mut form = MultipartForm::new();
        (self.0)(&mut form);
        form
    }
}

impl std::fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UploadBody(..)")
    }
}
