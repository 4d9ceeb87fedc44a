//! Server configuration.

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Page size used when a download request names none.
    pub page_size: usize,
    /// Upper bound on any download page.
    pub max_page_size: usize,
    /// Maximum entries in one upload request.
    pub max_upload_entries: usize,
    /// Top-level payload member holding the resource id.
    pub id_field: String,
    /// Prefix of server-assigned ids.
    pub id_prefix: String,
    /// First number handed out for server-assigned ids.
    pub first_id: u64,
    /// Rewrite references to POSTed resources in later entries of the
    /// same bundle.
    pub resolve_bundle_references: bool,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            page_size: 50,
            max_page_size: 500,
            max_upload_entries: 1000,
            id_field: "id".into(),
            id_prefix: String::new(),
            first_id: 1,
            resolve_bundle_references: true,
        }
    }

    /// Sets the default page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the page size bound.
    pub fn with_max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size.max(1);
        self
    }

    /// Sets the upload entry limit.
    pub fn with_max_upload_entries(mut self, max: usize) -> Self {
        self.max_upload_entries = max;
        self
    }

    /// Sets the id member name.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Sets how server-assigned ids are formed: `prefix` followed by a
    /// counter starting at `first`.
    pub fn with_id_assignment(mut self, prefix: impl Into<String>, first: u64) -> Self {
        self.id_prefix = prefix.into();
        self.first_id = first;
        self
    }

    /// Enables or disables in-bundle reference resolution.
    pub fn with_bundle_references(mut self, resolve: bool) -> Self {
        self.resolve_bundle_references = resolve;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
