//! Offset-based pagination driver.
//!
//! A caller supplies a page-fetch function taking a [`PageRequest`] and
//! returning a [`Page`]. The driver calls it strictly one page at a time,
//! accumulating items, until the page says it is the last one, comes back
//! empty, the reported total is reached, or the page cap is hit. The fetch
//! function normally goes through [`FetchClient`](crate::client::FetchClient),
//! so pacing, circuit breaking and retries apply to every page.

use std::future::Future;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Position of the page being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRequest {
    /// Offset of the first item wanted
    pub offset: usize,
    /// Zero-based page number
    pub page_index: usize,
}

/// One page returned by a page-fetch function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Offset of the next page; defaults to `offset + items.len()`
    pub next_offset: Option<usize>,
    /// This is the last page
    pub done: bool,
    /// Total items across all pages, when the upstream reports it
    pub total: Option<usize>,
}

impl<T> Page<T> {
    /// Page with `items` and no continuation hints
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            next_offset: None,
            done: false,
            total: None,
        }
    }

    /// Final page
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items).done(true)
    }

    /// Set the next offset
    pub fn next_offset(mut self, offset: usize) -> Self {
        self.next_offset = Some(offset);
        self
    }

    /// Mark whether this is the last page
    pub fn done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Set the reported total
    pub fn total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    /// Number of items on this page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether this page has no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Map the items to a different type
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_offset: self.next_offset,
            done: self.done,
            total: self.total,
        }
    }
}

/// Where to start and when to give up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaginationOptions {
    /// Offset of the first page
    pub start_offset: usize,
    /// Stop after this many pages
    pub max_pages: Option<usize>,
}

impl PaginationOptions {
    /// Start at offset 0 with no page cap
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the starting offset
    pub fn start_offset(mut self, offset: usize) -> Self {
        self.start_offset = offset;
        self
    }

    /// Cap the number of pages fetched
    pub fn max_pages(mut self, pages: usize) -> Self {
        self.max_pages = Some(pages);
        self
    }
}

/// Page-at-a-time driver over a page-fetch function
pub struct PageIterator<T, E, F, Fut>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    fetch_fn: F,
    next: PageRequest,
    options: PaginationOptions,
    collected: usize,
    finished: bool,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<T, E, F, Fut> PageIterator<T, E, F, Fut>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    /// Iterator starting at offset 0
    pub fn new(fetch_fn: F) -> Self {
        Self::with_options(fetch_fn, PaginationOptions::default())
    }

    /// Iterator with explicit options
    pub fn with_options(fetch_fn: F, options: PaginationOptions) -> Self {
        Self {
            fetch_fn,
            next: PageRequest {
                offset: options.start_offset,
                page_index: 0,
            },
            options,
            collected: 0,
            finished: options.max_pages == Some(0),
            _marker: PhantomData,
        }
    }

    /// Fetch the next page, or `None` once pagination has stopped.
    ///
    /// An error leaves the iterator positioned on the failed page, so calling
    /// again retries it.
    pub async fn next_page(&mut self) -> Result<Option<Page<T>>, E> {
        if self.finished {
            return Ok(None);
        }

        let request = self.next;
        let page = (self.fetch_fn)(request).await?;
        self.collected += page.items.len();

        let reached_total = page.total.is_some_and(|total| self.collected >= total);
        let reached_cap = self
            .options
            .max_pages
            .is_some_and(|max| request.page_index + 1 >= max);

        if page.done || page.items.is_empty() || reached_total {
            debug!(
                page_index = request.page_index,
                collected = self.collected,
                "Pagination complete"
            );
            self.finished = true;
        } else if reached_cap {
            debug!(
                page_index = request.page_index,
                collected = self.collected,
                "Stopping pagination at page cap"
            );
            self.finished = true;
        } else {
            let next_offset = page
                .next_offset
                .unwrap_or(request.offset + page.items.len());
            if next_offset <= request.offset {
                warn!(
                    offset = request.offset,
                    next_offset, "Page offset did not advance; stopping pagination"
                );
                self.finished = true;
            } else {
                self.next = PageRequest {
                    offset: next_offset,
                    page_index: request.page_index + 1,
                };
            }
        }

        Ok(Some(page))
    }

    /// Collect all remaining items from all pages
    pub async fn collect_all(&mut self) -> Result<Vec<T>, E> {
        let mut all_items = Vec::new();

        while let Some(page) = self.next_page().await? {
            all_items.extend(page.items);
        }

        Ok(all_items)
    }

    /// Whether another page will be requested
    pub fn has_next(&self) -> bool {
        !self.finished
    }

    /// Request the next call will make
    pub fn next_request(&self) -> PageRequest {
        self.next
    }

    /// Items seen so far
    pub fn collected(&self) -> usize {
        self.collected
    }
}

/// Fetch every page starting at offset 0 and return all items in order
pub async fn collect_pages<T, E, F, Fut>(fetch_page: F) -> Result<Vec<T>, E>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    PageIterator::new(fetch_page).collect_all().await
}

/// [`collect_pages`] with explicit options
pub async fn collect_pages_with<T, E, F, Fut>(
    options: PaginationOptions,
    fetch_page: F,
) -> Result<Vec<T>, E>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    PageIterator::with_options(fetch_page, options)
        .collect_all()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    type TestResult<T> = Result<T, String>;

    #[tokio::test]
    async fn test_collects_until_done() {
        let requests = RefCell::new(Vec::new());

        let items = collect_pages(|req| {
            requests.borrow_mut().push(req);
            async move {
                let page = match req.page_index {
                    0 => Page::new(vec!["a", "b"]).next_offset(2),
                    _ => Page::last(vec!["c"]),
                };
                TestResult::Ok(page)
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec!["a", "b", "c"]);
        assert_eq!(
            requests.into_inner(),
            vec![
                PageRequest {
                    offset: 0,
                    page_index: 0
                },
                PageRequest {
                    offset: 2,
                    page_index: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_offset_defaults_to_items_seen() {
        let offsets = RefCell::new(Vec::new());

        let items = collect_pages(|req| {
            offsets.borrow_mut().push(req.offset);
            async move {
                let page = if req.offset < 6 {
                    Page::new(vec![req.offset; 3])
                } else {
                    Page::new(Vec::new())
                };
                TestResult::Ok(page)
            }
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 6);
        assert_eq!(offsets.into_inner(), vec![0, 3, 6]);
    }

    #[tokio::test]
    async fn test_stops_at_total() {
        let calls = RefCell::new(0);

        let items = collect_pages(|req| {
            *calls.borrow_mut() += 1;
            async move { TestResult::Ok(Page::new(vec![req.offset, req.offset + 1]).total(4)) }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![0, 1, 2, 3]);
        assert_eq!(calls.into_inner(), 2);
    }

    #[tokio::test]
    async fn test_error_propagates_and_page_can_be_retried() {
        let failures = RefCell::new(1_usize);
        let mut pages = PageIterator::new(|req: PageRequest| {
            let fail = req.page_index == 1 && {
                let mut remaining = failures.borrow_mut();
                let fail = *remaining > 0;
                *remaining = remaining.saturating_sub(1);
                fail
            };
            async move {
                if fail {
                    Err("upstream unavailable".to_string())
                } else if req.page_index < 2 {
                    Ok(Page::new(vec![req.page_index]))
                } else {
                    Ok(Page::last(vec![req.page_index]))
                }
            }
        });

        assert_eq!(pages.next_page().await.unwrap().unwrap().items, vec![0]);
        assert_eq!(pages.next_page().await.unwrap_err(), "upstream unavailable");
        assert_eq!(pages.next_request().page_index, 1);

        assert_eq!(pages.collect_all().await.unwrap(), vec![1, 2]);
        assert!(!pages.has_next());
    }

    #[tokio::test]
    async fn test_max_pages_and_start_offset() {
        let offsets = RefCell::new(Vec::new());
        let options = PaginationOptions::new().start_offset(40).max_pages(2);

        let items = collect_pages_with(options, |req| {
            offsets.borrow_mut().push(req.offset);
            async move { TestResult::Ok(Page::new(vec![req.offset; 20])) }
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 40);
        assert_eq!(offsets.into_inner(), vec![40, 60]);
    }

    #[tokio::test]
    async fn test_non_advancing_offset_stops() {
        let calls = RefCell::new(0);

        let items = collect_pages(|_req| {
            *calls.borrow_mut() += 1;
            async { TestResult::Ok(Page::new(vec![1]).next_offset(0)) }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1]);
        assert_eq!(calls.into_inner(), 1);
    }

    #[tokio::test]
    async fn test_empty_first_page() {
        let items = collect_pages(|_req| async { TestResult::Ok(Page::<u32>::new(Vec::new())) })
            .await
            .unwrap();
        assert!(items.is_empty());
    }
}
