use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    models::{
        FeedItem, ItemId, PageRequest, RecommendationRequest, ToggleLikeResponse,
        ToggleSaveResponse, WatchReport, WatchReportResponse,
    },
    settings::FeedSettings,
};

use super::FeedApi;

/// `FeedApi` over the backend's JSON REST endpoints.
#[derive(Clone)]
pub struct HttpFeedApi {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpFeedApi {
    pub fn new(settings: &FeedSettings) -> Result<Self> {
        let mut raw = settings.api_base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url =
            Url::parse(&raw).with_context(|| format!("invalid api base url '{raw}'"))?;

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { base_url, http })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| anyhow!("invalid endpoint '{path}': {err}"))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?
            .error_for_status()
            .with_context(|| format!("{what} rejected by server"))?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("{what} response was not valid JSON"))
    }
}

#[async_trait]
impl FeedApi for HttpFeedApi {
    async fn fetch_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Vec<FeedItem>> {
        debug!(
            "fetching {} recommendations ({:?}), excluding {} ids",
            request.page_size,
            request.source,
            request.excluded_ids.len()
        );
        let url = self.endpoint("api/videos/recommendations")?;
        self.send_json(self.http.post(url).json(request), "recommendations")
            .await
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<FeedItem>> {
        let url = self.endpoint("api/videos")?;
        let mut query = vec![
            ("page", request.page.to_string()),
            ("pageSize", request.page_size.to_string()),
        ];
        if let Some(playlist) = &request.playlist {
            query.push(("playlist", playlist.clone()));
        }
        self.send_json(self.http.get(url).query(&query), "page").await
    }

    async fn fetch_item(&self, id: &ItemId) -> Result<FeedItem> {
        let url = self.endpoint(&format!("api/videos/{id}"))?;
        self.send_json(self.http.get(url), "item").await
    }

    async fn toggle_like(&self, id: &ItemId, token: &str) -> Result<ToggleLikeResponse> {
        let url = self.endpoint(&format!("api/videos/{id}/like"))?;
        self.send_json(self.http.post(url).bearer_auth(token), "toggle like")
            .await
    }

    async fn toggle_save(&self, id: &ItemId, token: &str) -> Result<ToggleSaveResponse> {
        let url = self.endpoint(&format!("api/videos/{id}/save"))?;
        self.send_json(self.http.post(url).bearer_auth(token), "toggle save")
            .await
    }

    async fn report_watch(
        &self,
        report: &WatchReport,
        token: Option<&str>,
    ) -> Result<WatchReportResponse> {
        let url = self.endpoint(&format!("api/videos/{}/view", report.item_id))?;
        let mut request = self.http.post(url).json(report);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        self.send_json(request, "watch report").await
    }
}
