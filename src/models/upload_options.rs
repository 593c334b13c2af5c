/// Access-control class applied to an uploaded object.
///
/// Backends without ACL support ignore it silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    Private,
    PublicRead,
}

impl Acl {
    /// Canonical wire form shared by the S3 and GCS ACL vocabularies.
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }
}

/// Per-call delivery options for `upload` and `copy`.
///
/// Every field is optional; `UploadOptions::default()` means "backend
/// defaults". A backend that lacks one of these concepts must accept the
/// option and ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub acl: Option<Acl>,
    pub content_type: Option<String>,
}

impl UploadOptions {
    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}
