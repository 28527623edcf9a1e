use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::SyncWindow;

pub mod model;

use model::{BookingsPage, PeopleCategory, PeopleCategoryList, Product, ProductList};

pub const BOOKEO_API_BASE: &str = "https://api.bookeo.com/v2/";

/// Timestamp layout the bookings search accepts.
pub const ZULU_FORMAT: &str = "%Y-%m-%dT%H:%M:00Z";

#[derive(Debug, Error)]
pub enum BookeoError {
    #[error("bookeo returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to reach bookeo: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected bookeo payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid bookeo url: {0}")]
    Url(String),
}

/// One request of the paginated bookings search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// Opens a search over a window; the response carries the page token.
    First { start_time: String, end_time: String },
    /// Continues a search with the token issued by its first page.
    Next { token: String, page_number: u32 },
}

impl PageRequest {
    pub fn first(window: &SyncWindow) -> Self {
        PageRequest::First {
            start_time: window.start.format(ZULU_FORMAT).to_string(),
            end_time: window.end.format(ZULU_FORMAT).to_string(),
        }
    }
}

#[async_trait]
pub trait BookeoApi: Send + Sync {
    async fn bookings_page(&self, request: &PageRequest) -> Result<BookingsPage, BookeoError>;

    async fn people_categories(&self) -> Result<Vec<PeopleCategory>, BookeoError>;

    async fn products(&self) -> Result<Vec<Product>, BookeoError>;
}

#[derive(Clone)]
pub struct BookeoClient {
    http: Client,
    base_url: Url,
    api_key: String,
    secret_key: String,
    items_per_page: u32,
}

impl fmt::Debug for BookeoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookeoClient")
            .field("base_url", &self.base_url)
            .field("items_per_page", &self.items_per_page)
            .finish_non_exhaustive()
    }
}

impl BookeoClient {
    pub fn new(api_key: String, secret_key: String, user_agent: &str) -> Result<Self, BookeoError> {
        let base_url = parse_base_url(BOOKEO_API_BASE)?;
        Self::with_base_url(api_key, secret_key, user_agent, base_url)
    }

    pub fn with_base_url(
        api_key: String,
        secret_key: String,
        user_agent: &str,
        base_url: Url,
    ) -> Result<Self, BookeoError> {
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            secret_key,
            items_per_page: 100,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, BookeoError> {
        let base_url = parse_base_url(&cfg.bookeo.base_url)?;
        let client = Self::with_base_url(
            cfg.bookeo.api_key.clone(),
            cfg.bookeo.secret_key.clone(),
            &cfg.app.user_agent,
            base_url,
        )?;
        Ok(client.items_per_page(cfg.bookeo.items_per_page))
    }

    pub fn items_per_page(mut self, items: u32) -> Self {
        self.items_per_page = items;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, BookeoError> {
        self.base_url
            .join(path)
            .map_err(|err| BookeoError::Url(err.to_string()))
    }

    fn credentials(&self) -> [(&'static str, String); 2] {
        [
            ("apiKey", self.api_key.clone()),
            ("secretKey", self.secret_key.clone()),
        ]
    }

    pub fn build_bookings_request(&self, request: &PageRequest) -> Result<reqwest::Request, BookeoError> {
        let builder = self
            .http
            .get(self.endpoint("bookings")?)
            .query(&self.credentials());
        let builder = match request {
            PageRequest::First { start_time, end_time } => builder.query(&[
                ("startTime", start_time.clone()),
                ("endTime", end_time.clone()),
                ("expandParticipants", "true".to_string()),
                ("itemsPerPage", self.items_per_page.to_string()),
            ]),
            PageRequest::Next { token, page_number } => builder.query(&[
                ("pageNavigationToken", token.clone()),
                ("pageNumber", page_number.to_string()),
            ]),
        };
        Ok(builder.build()?)
    }

    pub fn build_settings_request(&self, path: &str) -> Result<reqwest::Request, BookeoError> {
        let mut builder = self.http.get(self.endpoint(path)?).query(&self.credentials());
        if path.ends_with("products") {
            builder = builder.query(&[("itemsPerPage", self.items_per_page.to_string())]);
        }
        Ok(builder.build()?)
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T, BookeoError> {
        // Never log the query string: it carries the credentials.
        let path = request.url().path().to_string();
        let res = self.http.execute(request).await?;
        let status = res.status();
        debug!(%path, %status, "bookeo response");

        if status != StatusCode::OK {
            let body = res.text().await.unwrap_or_default();
            warn!(%path, %status, "bookeo request rejected");
            return Err(BookeoError::Status { status, body });
        }
        let body = res.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, BookeoError> {
    // `Url::join` drops the last segment unless the base ends with a slash.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|err| BookeoError::Url(err.to_string()))
}

#[async_trait]
impl BookeoApi for BookeoClient {
    async fn bookings_page(&self, request: &PageRequest) -> Result<BookingsPage, BookeoError> {
        let req = self.build_bookings_request(request)?;
        self.execute_json(req).await
    }

    async fn people_categories(&self) -> Result<Vec<PeopleCategory>, BookeoError> {
        let req = self.build_settings_request("settings/peoplecategories")?;
        let list: PeopleCategoryList = self.execute_json(req).await?;
        Ok(list.categories)
    }

    async fn products(&self) -> Result<Vec<Product>, BookeoError> {
        let req = self.build_settings_request("settings/products")?;
        let list: ProductList = self.execute_json(req).await?;
        if list.info.total_pages > 1 {
            warn!(
                total_pages = list.info.total_pages,
                "product list spans several pages; only the first is mirrored"
            );
        }
        Ok(list.data)
    }
}
