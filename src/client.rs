use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::models::{InvoiceFilter, InvoicePage};
use crate::settings::PortalConfig;

/// Newest first by id, so offsets stay put if invoices land mid-pull.
pub const SORT_ORDER: &str = "id,desc";

/// Anything that can serve invoice pages. The portal client is the real one;
/// tests substitute canned pages.
#[allow(async_fn_in_trait)]
pub trait InvoiceSource {
    async fn fetch_page(
        &self,
        filter: &InvoiceFilter,
        page: u32,
        size: u32,
    ) -> Result<InvoicePage, ApiError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Deserialize)]
struct LoginResponse {
    id_token: Option<String>,
    token: Option<String>,
}

pub struct UbotClient {
    http: reqwest::Client,
    config: PortalConfig,
    token: Option<String>,
}

impl UbotClient {
    pub fn new(config: PortalConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: None,
        }
    }

    pub fn portal_base(&self) -> &str {
        &self.config.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Exchange credentials for a bearer token. `remember_me` selects the
    /// long-lived token; either way one token must last the whole pull.
    pub async fn login(&mut self) -> Result<(), ApiError> {
        let url = self.api_url("authenticate");
        let body = LoginRequest {
            username: &self.config.username,
            password: &self.config.password,
            remember_me: self.config.remember_me,
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Authentication(format!("login endpoint unreachable: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Authentication(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_message(&text)
            )));
        }

        let parsed: LoginResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Authentication(format!("unreadable login response: {}", e)))?;
        let token = parsed
            .id_token
            .or(parsed.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Authentication("no token in login response".into()))?;

        info!("Logged in to {} as {}", self.config.base_url, self.config.username);
        self.token = Some(token);
        Ok(())
    }
}

impl InvoiceSource for UbotClient {
    async fn fetch_page(
        &self,
        filter: &InvoiceFilter,
        page: u32,
        size: u32,
    ) -> Result<InvoicePage, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::NotAuthenticated)?;

        debug!("POST third-party/invoices page={} size={}", page, size);
        let resp = self
            .http
            .post(self.api_url("third-party/invoices"))
            .query(&[
                ("page", page.to_string()),
                ("size", size.to_string()),
                ("sort", SORT_ORDER.to_string()),
            ])
            .bearer_auth(token)
            .json(&filter.to_body())
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::TokenExpired(status.as_u16()));
        }
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        Ok(resp.json::<InvoicePage>().await?)
    }
}

/// Best-effort message from an error body: the portal's `statusResponse.message`,
/// a top-level `message`/`detail`/`title`, or the raw text.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/statusResponse/message"),
            value.get("message"),
            value.get("detail"),
            value.get("title"),
        ];
        if let Some(msg) = candidates.into_iter().flatten().find_map(|v| v.as_str()) {
            return msg.to_string();
        }
    }
    let text = body.trim();
    if text.is_empty() {
        "no response body".to_string()
    } else {
        text.chars().take(200).collect()
    }
}
