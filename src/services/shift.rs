use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, COOKIE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{RedeemError, Result};
use crate::models::RawResponse;

/// The remote redemption capability: submit one code for one game and
/// platform, get back whatever the service said.
#[async_trait]
pub trait Redeemer: Send + Sync {
    async fn submit(&self, code: &str, game: &str, platform: &str) -> Result<RawResponse>;
}

/// Login state reused across submissions.
#[derive(Debug, Clone, Default)]
pub struct Session {
    cookie: Option<String>,
}

impl Session {
    pub fn new(cookie: Option<String>) -> Self {
        Self { cookie }
    }

    pub fn is_authenticated(&self) -> bool {
        self.cookie.is_some()
    }

    fn header(&self) -> Result<Option<HeaderValue>> {
        self.cookie
            .as_deref()
            .map(|c| {
                HeaderValue::from_str(c)
                    .map_err(|_| RedeemError::Config("session cookie is not a valid header value".into()))
            })
            .transpose()
    }
}

#[derive(Debug, Serialize)]
struct RedeemRequest<'a> {
    code: &'a str,
    game: &'a str,
    platform: &'a str,
}

#[derive(Debug, Deserialize)]
struct RedeemReply {
    message: Option<String>,
    error: Option<String>,
    text: Option<String>,
}

pub struct HttpRedeemer {
    client: Client,
    redeem_url: String,
    session: Session,
}

impl HttpRedeemer {
    pub fn new(redeem_url: String, session: Session) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .cookie_store(true)
            .user_agent("shift-redeemer/1.0")
            .build()
            .expect("Failed to create HTTP client");

        if !session.is_authenticated() {
            tracing::warn!("No session cookie configured, the service will likely reject submissions");
        }

        Self {
            client,
            redeem_url,
            session,
        }
    }
}

#[async_trait]
impl Redeemer for HttpRedeemer {
    async fn submit(&self, code: &str, game: &str, platform: &str) -> Result<RawResponse> {
        let mut request = self.client.post(&self.redeem_url).form(&RedeemRequest {
            code,
            game,
            platform,
        });
        if let Some(cookie) = self.session.header()? {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        tracing::debug!("Redemption service answered HTTP {} for {} on {}", status, code, platform);

        Ok(RawResponse::new(status, reply_message(&body)))
    }
}

/// Pull the human-readable message out of a reply body.
///
/// The service answers with either a small JSON object or a bare text/HTML
/// fragment; anything unparseable is passed through untouched.
fn reply_message(body: &str) -> String {
    match serde_json::from_str::<RedeemReply>(body) {
        Ok(reply) => reply
            .message
            .or(reply.error)
            .or(reply.text)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.trim().to_string(),
    }
}
