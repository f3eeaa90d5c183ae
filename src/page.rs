//! The fetched-document representation handed from the fetch stage to the
//! parse stage and to page actions.

/// A downloaded page.
#[derive(Debug, Clone)]
pub struct Page {
    /// The URL the fetch was dispatched for.
    pub url: String,
    /// The URL the response was ultimately served from (after redirects).
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

impl Page {
    pub fn new(
        url: impl Into<String>,
        final_url: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Page {
            url: url.into(),
            final_url: final_url.into(),
            status,
            body: body.into(),
        }
    }
}
