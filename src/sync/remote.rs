use crate::core::NetworkError;
use futures::stream::{self, BoxStream, StreamExt};

/// One candidate record as it came off the wire.
pub type RawRecord = serde_json::Value;

/// A page of a remote listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub is_last_page: bool,
}

impl Page {
    pub fn new(records: Vec<RawRecord>, is_last_page: bool) -> Self {
        Self {
            records,
            is_last_page,
        }
    }

    pub fn last(records: Vec<RawRecord>) -> Self {
        Self::new(records, true)
    }

    pub fn more(records: Vec<RawRecord>) -> Self {
        Self::new(records, false)
    }
}

pub type PageStream = BoxStream<'static, Result<Page, NetworkError>>;

/// Remote listing that can be started again for every refresh cycle.
///
/// Transport errors are yielded as `NetworkError` and passed through
/// untouched.
pub trait RemoteFetch: Send + Sync + 'static {
    fn fetch(&self) -> PageStream;
}

impl<F> RemoteFetch for F
where
    F: Fn() -> PageStream + Send + Sync + 'static,
{
    fn fetch(&self) -> PageStream {
        self()
    }
}

/// Stream over pages that are already in memory.
pub fn from_pages(pages: Vec<Result<Page, NetworkError>>) -> PageStream {
    stream::iter(pages).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_fetch() {
        let fetch = || from_pages(vec![Ok(Page::more(vec![json!({"id": "1"})])), Ok(Page::last(vec![]))]);
        let pages: Vec<_> = fetch.fetch().collect().await;
        assert_eq!(pages.len(), 2);
        assert!(matches!(&pages[1], Ok(page) if page.is_last_page));
    }
}
