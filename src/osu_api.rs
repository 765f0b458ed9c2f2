use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Deserializer, de};
use thiserror::Error;

use crate::BeatmapsetId;

pub const SEARCH_URL: &str = "https://osu.ppy.sh/api/v2/beatmapsets/search";
const USER_AGENT: &str = concat!("osu-map-downloader/", env!("CARGO_PKG_VERSION"));

/// Continuation token handed back by the search endpoint. Its fields are
/// never interpreted, only echoed on the next request.
pub type Cursor = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub beatmapsets: Vec<BeatmapsetSummary>,
    #[serde(default)]
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BeatmapsetSummary {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: BeatmapsetId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
}

fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<BeatmapsetId, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlexibleIdVisitor;

    impl<'de> de::Visitor<'de> for FlexibleIdVisitor {
        type Value = BeatmapsetId;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a beatmapset id as a number or a numeric string")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            BeatmapsetId::try_from(value)
                .map_err(|_| E::custom(format!("negative beatmapset id {value}")))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid beatmapset id `{value}`")))
        }
    }

    deserializer.deserialize_any(FlexibleIdVisitor)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One call to the remote beatmapset search.
pub trait SearchApi {
    fn search_page(&self, params: &[(String, String)]) -> Result<SearchPage, ApiError>;
}

pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

#[derive(Debug, Clone)]
pub struct OsuClient {
    http: Client,
    access_token: String,
    search_url: String,
}

impl OsuClient {
    pub fn new(access_token: impl Into<String>) -> reqwest::Result<Self> {
        Ok(Self {
            http: http_client(Duration::from_secs(30))?,
            access_token: access_token.into(),
            search_url: SEARCH_URL.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }
}

impl SearchApi for OsuClient {
    fn search_page(&self, params: &[(String, String)]) -> Result<SearchPage, ApiError> {
        let resp = self
            .http
            .get(&self.search_url)
            .bearer_auth(&self.access_token)
            .header(ACCEPT, "application/json")
            .query(params)
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
