//! Lazy, restartable walk over one resource collection

use crate::catalog::{PaginationStrategy, StreamDefinition};
use crate::client::{ApiResponse, HttpResponse, PageRequest, ShopifyClient};
use crate::error::{Result, TapError};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use url::Url;

static LINK_NEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("link header pattern is valid")
});

/// Position of a page within a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    Cursor(String),
    Number(u32),
}

/// One page of raw records.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub next: Option<PageToken>,
    pub status: u16,
}

/// Walks a stream's collection page by page.
///
/// The only state is the current token, so a failed [`next_page`] can simply
/// be called again to re-request the same page, and a new paginator built
/// with the same start token replays the same sequence.
///
/// [`next_page`]: Paginator::next_page
pub struct Paginator<'a> {
    client: &'a ShopifyClient,
    definition: &'a StreamDefinition,
    page_size: u32,
    max_pages: usize,
    since: Option<String>,
    current: Option<PageToken>,
    pages_fetched: usize,
    exhausted: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        client: &'a ShopifyClient,
        definition: &'a StreamDefinition,
        page_size: u32,
        max_pages: usize,
    ) -> Self {
        Self {
            client,
            definition,
            page_size,
            max_pages,
            since: None,
            current: None,
            pages_fetched: 0,
            exhausted: false,
        }
    }

    /// Filter-since value sent through the stream's `since_param`.
    pub fn since(mut self, since: Option<String>) -> Self {
        self.since = since;
        self
    }

    /// Resume from a token instead of the first page.
    pub fn starting_at(mut self, token: Option<PageToken>) -> Self {
        self.current = token;
        self
    }

    pub fn current_token(&self) -> Option<&PageToken> {
        self.current.as_ref()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page, or `None` once the collection is exhausted.
    ///
    /// A page with zero records but a next token is re-requested once before
    /// it is taken as the end of the data.
    ///
    /// # Errors
    /// - [`TapError::PaginationLoop`] when the page ceiling is exceeded
    /// - [`TapError::StreamFatal`] for 404 on a required stream or a
    ///   malformed body
    /// - any error from [`ShopifyClient::send`]
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.pages_fetched >= self.max_pages {
            return Err(TapError::PaginationLoop {
                stream: self.definition.name.clone(),
                max_pages: self.max_pages,
            });
        }

        let mut page = self.fetch().await?;
        if page.records.is_empty() && page.next.is_some() {
            log::debug!(
                "Empty page with a next cursor on '{}', retrying once",
                self.definition.name
            );
            page = self.fetch().await?;
        }

        self.pages_fetched += 1;
        match &page.next {
            Some(next) if !page.records.is_empty() => self.current = Some(next.clone()),
            _ => self.exhausted = true,
        }

        Ok(Some(page))
    }

    fn request(&self) -> PageRequest {
        let def = self.definition;
        let mut request = PageRequest::new(def.path.clone());

        // Shopify rejects filters next to page_info, the cursor carries them
        if let (PaginationStrategy::LinkHeader, Some(PageToken::Cursor(cursor))) =
            (&def.pagination, &self.current)
        {
            return request
                .param("limit", self.page_size.to_string())
                .param("page_info", cursor.clone());
        }

        if def.pagination != PaginationStrategy::Single {
            request = request.param("limit", self.page_size.to_string());
        }
        for (key, value) in &def.params {
            request = request.param(key.clone(), value.clone());
        }
        if let (Some(param), Some(since)) = (&def.since_param, &self.since) {
            request = request.param(param.clone(), since.clone());
        }

        match (&def.pagination, &self.current) {
            (PaginationStrategy::BodyCursor { param, .. }, Some(PageToken::Cursor(cursor))) => {
                request.param(param.clone(), cursor.clone())
            }
            (PaginationStrategy::PageNumber, Some(PageToken::Number(n))) => {
                request.param("page", n.to_string())
            }
            (PaginationStrategy::PageNumber, _) => request.param("page", "1"),
            _ => request,
        }
    }

    async fn fetch(&self) -> Result<Page> {
        let name = &self.definition.name;
        let response = match self.client.send(&self.request()).await? {
            ApiResponse::Ok(response) => response,
            ApiResponse::NotFound if self.definition.optional => {
                log::info!("Resource for '{}' not found, treating as empty", name);
                return Ok(Page {
                    records: Vec::new(),
                    next: None,
                    status: 404,
                });
            }
            ApiResponse::NotFound => {
                return Err(TapError::stream_fatal(name, "resource not found (HTTP 404)"));
            }
        };

        let body: Value = serde_json::from_slice(&response.body)
            .map_err(|e| TapError::stream_fatal(name, format!("invalid JSON body: {}", e)))?;

        let records = body
            .get(&self.definition.records_key)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                TapError::stream_fatal(
                    name,
                    format!(
                        "response has no '{}' array",
                        self.definition.records_key
                    ),
                )
            })?;

        let next = self.next_token(&response, &body, records.is_empty());

        Ok(Page {
            records,
            next,
            status: response.status,
        })
    }

    fn next_token(&self, response: &HttpResponse, body: &Value, empty: bool) -> Option<PageToken> {
        match &self.definition.pagination {
            PaginationStrategy::LinkHeader => response
                .header("Link")
                .and_then(next_page_info)
                .map(PageToken::Cursor),
            PaginationStrategy::BodyCursor { field, .. } => field
                .split('.')
                .try_fold(body, |current, segment| current.get(segment))
                .and_then(Value::as_str)
                .filter(|cursor| !cursor.is_empty())
                .map(|cursor| PageToken::Cursor(cursor.to_string())),
            PaginationStrategy::PageNumber if !empty => {
                let current = match self.current {
                    Some(PageToken::Number(n)) => n,
                    _ => 1,
                };
                Some(PageToken::Number(current + 1))
            }
            PaginationStrategy::PageNumber | PaginationStrategy::Single => None,
        }
    }
}

/// Extract `page_info` from the `rel="next"` entry of a `Link` header.
fn next_page_info(link: &str) -> Option<String> {
    LINK_NEXT
        .captures_iter(link)
        .filter_map(|caps| Url::parse(caps.get(1)?.as_str()).ok())
        .find_map(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "page_info")
                .map(|(_, v)| v.into_owned())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Field, FieldType, Schema};
    use crate::client::HttpRequest;
    use crate::client::http::mock::MockTransport;
    use crate::client::test_support::client_with;
    use serde_json::json;

    fn definition(pagination: PaginationStrategy) -> StreamDefinition {
        StreamDefinition::new(
            "products",
            "products.json",
            Schema::new(vec![
                Field::new("id", FieldType::Integer).required(),
                Field::new("updated_at", FieldType::DateTime).required(),
            ]),
        )
        .incremental("updated_at", Some("updated_at_min"))
        .with_param("order", "updated_at asc")
        .with_pagination(pagination)
    }

    fn link(cursor: &str) -> String {
        format!(
            "<https://acme.myshopify.com/admin/api/2024-01/products.json?limit=2&page_info={}>; rel=\"next\"",
            cursor
        )
    }

    fn products(ids: &[i64]) -> Value {
        let items: Vec<Value> = ids
            .iter()
            .map(|id| json!({"id": id, "updated_at": "2024-01-01T00:00:00Z"}))
            .collect();
        json!({ "products": items })
    }

    /// Three pages linked by cursors `p2` and `p3`.
    fn three_pages(request: &HttpRequest) -> HttpResponse {
        match request.query_param("page_info").as_deref() {
            None => HttpResponse::json(200, &products(&[1, 2])).with_header("Link", link("p2")),
            Some("p2") => {
                HttpResponse::json(200, &products(&[3, 4])).with_header("Link", link("p3"))
            }
            Some("p3") => HttpResponse::json(200, &products(&[5, 6])),
            Some(other) => panic!("unexpected cursor {}", other),
        }
    }

    async fn collect_ids(paginator: &mut Paginator<'_>) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Some(page) = paginator.next_page().await.unwrap() {
            ids.extend(page.records.iter().map(|r| r["id"].as_i64().unwrap()));
        }
        ids
    }

    #[test]
    fn test_next_page_info() {
        let header = format!(
            "<https://x.example/a.json?page_info=prev1>; rel=\"previous\", {}",
            link("abc")
        );
        assert_eq!(next_page_info(&header).as_deref(), Some("abc"));
        assert_eq!(
            next_page_info("<https://x.example/a.json?page_info=p>; rel=\"previous\""),
            None
        );
    }

    #[tokio::test]
    async fn test_link_header_walk() {
        let transport = MockTransport::new(|request, _| Ok(three_pages(request)));
        let client = client_with(transport.clone(), 0);
        let def = definition(PaginationStrategy::LinkHeader);

        let mut paginator = Paginator::new(&client, &def, 2, 100)
            .since(Some("2024-01-01T00:00:00Z".to_string()));
        assert_eq!(collect_ids(&mut paginator).await, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(paginator.pages_fetched(), 3);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0].query_param("updated_at_min").as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(requests[0].query_param("order").as_deref(), Some("updated_at asc"));
        // cursor requests carry only limit and page_info
        assert_eq!(requests[1].query_param("updated_at_min"), None);
        assert_eq!(requests[1].query_param("order"), None);
        assert_eq!(requests[1].query_param("limit").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_restart_from_token_replays() {
        let transport = MockTransport::new(|request, _| Ok(three_pages(request)));
        let client = client_with(transport, 0);
        let def = definition(PaginationStrategy::LinkHeader);

        let start = Some(PageToken::Cursor("p2".to_string()));
        let mut first = Paginator::new(&client, &def, 2, 100).starting_at(start.clone());
        let mut second = Paginator::new(&client, &def, 2, 100).starting_at(start);
        let a = collect_ids(&mut first).await;
        let b = collect_ids(&mut second).await;
        assert_eq!(a, vec![3, 4, 5, 6]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_failed_page_keeps_token() {
        let transport = MockTransport::new(|request, index| {
            if index == 1 {
                return Ok(HttpResponse::json(500, &json!({})));
            }
            Ok(three_pages(request))
        });
        let client = client_with(transport, 0);
        let def = definition(PaginationStrategy::LinkHeader);
        let mut paginator = Paginator::new(&client, &def, 2, 100);

        paginator.next_page().await.unwrap().unwrap();
        assert!(paginator.next_page().await.is_err());
        assert_eq!(
            paginator.current_token(),
            Some(&PageToken::Cursor("p2".to_string()))
        );
        let retried = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(retried.records[0]["id"], 3);
    }

    #[tokio::test]
    async fn test_empty_page_with_cursor_is_retried_once() {
        let transport = MockTransport::new(|request, index| {
            match (request.query_param("page_info").as_deref(), index) {
                (None, _) => Ok(HttpResponse::json(200, &products(&[1])).with_header("Link", link("p2"))),
                // glitch: cursor but no records
                (Some("p2"), 1) => {
                    Ok(HttpResponse::json(200, &products(&[])).with_header("Link", link("p3")))
                }
                (Some("p2"), _) => Ok(HttpResponse::json(200, &products(&[2]))),
                _ => panic!("unexpected request"),
            }
        });
        let client = client_with(transport.clone(), 0);
        let def = definition(PaginationStrategy::LinkHeader);
        let mut paginator = Paginator::new(&client, &def, 1, 100);

        assert_eq!(collect_ids(&mut paginator).await, vec![1, 2]);
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_page_number_strategy() {
        let transport = MockTransport::new(|request, _| {
            let page = request.query_param("page").unwrap();
            let body = match page.as_str() {
                "1" => products(&[1, 2]),
                "2" => products(&[3]),
                _ => products(&[]),
            };
            Ok(HttpResponse::json(200, &body))
        });
        let client = client_with(transport.clone(), 0);
        let def = definition(PaginationStrategy::PageNumber);
        let mut paginator = Paginator::new(&client, &def, 2, 100);

        assert_eq!(collect_ids(&mut paginator).await, vec![1, 2, 3]);
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_body_cursor_strategy() {
        let transport = MockTransport::new(|request, _| {
            let body = match request.query_param("after").as_deref() {
                None => json!({"products": [{"id": 1}], "page": {"next": "c2"}}),
                Some("c2") => json!({"products": [{"id": 2}], "page": {"next": null}}),
                _ => panic!("unexpected cursor"),
            };
            Ok(HttpResponse::json(200, &body))
        });
        let client = client_with(transport, 0);
        let def = definition(PaginationStrategy::BodyCursor {
            field: "page.next".to_string(),
            param: "after".to_string(),
        });
        let mut paginator = Paginator::new(&client, &def, 2, 100);
        assert_eq!(collect_ids(&mut paginator).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_single_strategy_sends_no_limit() {
        let transport = MockTransport::new(|_, _| {
            Ok(HttpResponse::json(200, &products(&[1])).with_header("Link", link("ignored")))
        });
        let client = client_with(transport.clone(), 0);
        let def = definition(PaginationStrategy::Single);
        let mut paginator = Paginator::new(&client, &def, 2, 100);
        assert_eq!(collect_ids(&mut paginator).await, vec![1]);
        assert_eq!(transport.requests()[0].query_param("limit"), None);
    }

    #[tokio::test]
    async fn test_page_ceiling() {
        // every page points at another one
        let transport = MockTransport::new(|_, index| {
            Ok(HttpResponse::json(200, &products(&[index as i64]))
                .with_header("Link", link(&format!("p{}", index + 1))))
        });
        let client = client_with(transport, 0);
        let def = definition(PaginationStrategy::LinkHeader);
        let mut paginator = Paginator::new(&client, &def, 1, 3);

        for _ in 0..3 {
            paginator.next_page().await.unwrap();
        }
        let err = paginator.next_page().await.unwrap_err();
        assert!(matches!(err, TapError::PaginationLoop { max_pages: 3, .. }));
    }

    #[tokio::test]
    async fn test_not_found_depends_on_optional() {
        let transport = MockTransport::new(|_, _| Ok(HttpResponse::json(404, &json!({}))));
        let client = client_with(transport, 0);

        let required = definition(PaginationStrategy::LinkHeader);
        let err = Paginator::new(&client, &required, 2, 10)
            .next_page()
            .await
            .unwrap_err();
        assert!(matches!(err, TapError::StreamFatal { .. }));

        let optional = definition(PaginationStrategy::LinkHeader).optional();
        let mut paginator = Paginator::new(&client, &optional, 2, 10);
        let page = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(page.status, 404);
        assert!(page.records.is_empty());
        assert!(paginator.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_records_key_is_fatal() {
        let transport =
            MockTransport::new(|_, _| Ok(HttpResponse::json(200, &json!({"errors": "nope"}))));
        let client = client_with(transport, 0);
        let def = definition(PaginationStrategy::LinkHeader);
        let err = Paginator::new(&client, &def, 2, 10)
            .next_page()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no 'products' array"));
    }
}
