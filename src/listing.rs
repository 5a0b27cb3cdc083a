//! Paginated listing aggregation.
//!
//! Walks continuation tokens until the backend reports the listing is
//! complete, merging every page into one [`ListingResult`].  Common
//! prefixes are de-duplicated across pages in first-seen order, since
//! some S3-compatible stores repeat a prefix whose keys straddle a page
//! boundary.

use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, warn};

use crate::errors::StorageError;
use crate::storage::backend::{ListPage, ObjectMeta};

/// Default cap on pages fetched by one listing.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// Merged result of a full listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingResult {
    /// Every object on every page, in backend order.
    pub objects: Vec<ObjectMeta>,
    /// Distinct common prefixes in first-seen order.
    pub common_prefixes: Vec<String>,
}

/// Fetch pages via `fetch_page` until the listing is complete.
///
/// `fetch_page` receives `None` for the first page and the previous
/// page's continuation token afterwards.  Fails with
/// [`StorageError::TooManyPages`] if more than `max_pages` pages would be
/// needed (`0` disables the cap).
pub async fn collect_pages<F, Fut>(
    max_pages: usize,
    mut fetch_page: F,
) -> Result<ListingResult, StorageError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListPage, StorageError>>,
{
    let mut result = ListingResult::default();
    let mut seen_prefixes: HashSet<String> = HashSet::new();
    let mut seen_tokens: HashSet<String> = HashSet::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if max_pages != 0 && pages >= max_pages {
            return Err(StorageError::TooManyPages(max_pages));
        }

        let page = fetch_page(token.clone()).await?;
        pages += 1;

        result.objects.extend(page.objects);
        for prefix in page.common_prefixes {
            if seen_prefixes.insert(prefix.clone()) {
                result.common_prefixes.push(prefix);
            }
        }

        if !page.is_truncated {
            break;
        }

        match page.next_continuation_token {
            Some(next) if next.is_empty() => {
                warn!(pages, "Truncated listing page has an empty continuation token, stopping");
                break;
            }
            Some(next) => {
                if !seen_tokens.insert(next.clone()) {
                    return Err(StorageError::InvalidResponse(format!(
                        "listing continuation token repeated: {next}"
                    )));
                }
                token = Some(next);
            }
            None => {
                warn!(pages, "Truncated listing page has no continuation token, stopping");
                break;
            }
        }
    }

    debug!(
        pages,
        objects = result.objects.len(),
        common_prefixes = result.common_prefixes.len(),
        "Listing complete"
    );
    Ok(result)
}

// -- Tests --------------------------------------------------------------------
