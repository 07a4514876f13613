//! Microsoft Graph mail client
//!
//! Client-credentials token flow with in-process caching, message list/get
//! mapped into [`InboundMessage`], sendMail, and the subscription CRUD the
//! webhook lifecycle needs. All requests carry the configured timeout; the
//! token is refreshed one minute before expiry.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::analysis::{AttachmentMeta, InboundMessage};
use crate::config::GraphConfig;
use crate::error::TriageError;

use super::{MailProvider, Subscription, SubscriptionRequest};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const TOKEN_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEmailAddress {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    #[serde(default)]
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphHeader {
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    #[serde(default)]
    name: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    #[serde(default)]
    internet_message_id: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(default)]
    to_recipients: Vec<GraphRecipient>,
    #[serde(default)]
    received_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    internet_message_headers: Vec<GraphHeader>,
    #[serde(default)]
    body: Option<GraphBody>,
    #[serde(default)]
    attachments: Vec<GraphAttachment>,
}

#[derive(Debug, Deserialize)]
struct GraphList {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubscription {
    id: String,
    expiration_date_time: DateTime<Utc>,
}

impl GraphMessage {
    fn into_inbound(self) -> InboundMessage {
        InboundMessage {
            provider_id: self.id,
            internet_message_id: self.internet_message_id,
            subject: self.subject.unwrap_or_default(),
            sender: self
                .from
                .and_then(|r| r.email_address)
                .map(|a| a.address)
                .unwrap_or_default(),
            recipient: self
                .to_recipients
                .into_iter()
                .next()
                .and_then(|r| r.email_address)
                .map(|a| a.address)
                .unwrap_or_default(),
            received_at: self.received_date_time.unwrap_or_else(Utc::now),
            headers: self
                .internet_message_headers
                .into_iter()
                .map(|h| (h.name, h.value))
                .collect(),
            body: self.body.map(|b| b.content).unwrap_or_default(),
            attachments: self
                .attachments
                .into_iter()
                .map(|a| AttachmentMeta {
                    filename: a.name,
                    content_type: a.content_type.unwrap_or_default(),
                    size_bytes: a.size,
                })
                .collect(),
        }
    }
}

pub struct GraphMailClient {
    http: reqwest::Client,
    cfg: GraphConfig,
    token: RwLock<Option<CachedToken>>,
}

impl GraphMailClient {
    pub fn new(cfg: GraphConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        GraphMailClient {
            http,
            cfg,
            token: RwLock::new(None),
        }
    }

    /// Cached bearer token, refreshed with a safety margin.
    async fn access_token(&self) -> Result<String, TriageError> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.token.clone());
                }
            }
        }

        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.cfg.tenant_id
        );
        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
                ("scope", "https://graph.microsoft.com/.default"),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| TriageError::transient("graph-token", e))?;
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "graph-token",
                format!("status {}", response.status()),
            ));
        }
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| TriageError::transient("graph-token", e))?;

        let token = CachedToken {
            expires_at: Utc::now()
                + ChronoDuration::seconds((parsed.expires_in - TOKEN_MARGIN_SECS).max(0)),
            token: parsed.access_token,
        };
        let value = token.token.clone();
        *self.token.write().await = Some(token);
        debug!("graph token refreshed");
        Ok(value)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, TriageError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| TriageError::transient("graph", e))?;
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "graph",
                format!("status {} for {}", response.status(), url),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| TriageError::transient("graph", e))
    }
}

#[async_trait::async_trait]
impl MailProvider for GraphMailClient {
    async fn list_messages(
        &self,
        mailbox: &str,
        since: DateTime<Utc>,
        top: usize,
    ) -> Result<Vec<InboundMessage>, TriageError> {
        let filter = format!(
            "receivedDateTime ge {}",
            since.format("%Y-%m-%dT%H:%M:%SZ")
        );
        let select =
            "id,internetMessageId,subject,from,toRecipients,receivedDateTime,internetMessageHeaders,body";
        let url = format!(
            "{}/users/{}/messages?$filter={}&$orderby=receivedDateTime asc&$top={}&$select={}&$expand=attachments($select=name,contentType,size)",
            GRAPH_BASE,
            mailbox,
            urlencoded(&filter),
            top,
            select
        );
        let list: GraphList = self.get_json(&url).await?;
        Ok(list.value.into_iter().map(GraphMessage::into_inbound).collect())
    }

    async fn get_message(&self, mailbox: &str, id: &str) -> Result<InboundMessage, TriageError> {
        let url = format!(
            "{}/users/{}/messages/{}?$expand=attachments($select=name,contentType,size)",
            GRAPH_BASE, mailbox, id
        );
        let message: GraphMessage = self.get_json(&url).await?;
        Ok(message.into_inbound())
    }

    async fn send_mail(
        &self,
        mailbox: &str,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TriageError> {
        let token = self.access_token().await?;
        let payload = json!({
            "message": {
                "subject": subject,
                "body": { "contentType": "HTML", "content": html_body },
                "toRecipients": [
                    { "emailAddress": { "address": to } }
                ]
            },
            "saveToSentItems": true
        });
        let url = format!("{}/users/{}/sendMail", GRAPH_BASE, mailbox);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TriageError::transient("graph-send", e))?;
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "graph-send",
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<Subscription, TriageError> {
        let token = self.access_token().await?;
        let payload = json!({
            "changeType": "created",
            "notificationUrl": request.notification_url,
            "resource": request.resource,
            "clientState": request.client_state,
            "expirationDateTime": request.expires_at.to_rfc3339(),
        });
        let response = self
            .http
            .post(format!("{}/subscriptions", GRAPH_BASE))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TriageError::transient("graph-subscribe", e))?;
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "graph-subscribe",
                format!("status {}", response.status()),
            ));
        }
        let parsed: GraphSubscription = response
            .json()
            .await
            .map_err(|e| TriageError::transient("graph-subscribe", e))?;
        Ok(Subscription {
            id: parsed.id,
            expires_at: parsed.expiration_date_time,
        })
    }

    async fn renew_subscription(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Subscription, TriageError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .patch(format!("{}/subscriptions/{}", GRAPH_BASE, id))
            .bearer_auth(token)
            .json(&json!({ "expirationDateTime": expires_at.to_rfc3339() }))
            .send()
            .await
            .map_err(|e| TriageError::transient("graph-subscribe", e))?;
        if !response.status().is_success() {
            return Err(TriageError::transient(
                "graph-subscribe",
                format!("status {}", response.status()),
            ));
        }
        let parsed: GraphSubscription = response
            .json()
            .await
            .map_err(|e| TriageError::transient("graph-subscribe", e))?;
        Ok(Subscription {
            id: parsed.id,
            expires_at: parsed.expiration_date_time,
        })
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), TriageError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .delete(format!("{}/subscriptions/{}", GRAPH_BASE, id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| TriageError::transient("graph-subscribe", e))?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(TriageError::transient(
                "graph-subscribe",
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), TriageError> {
        // Token acquisition exercises credentials and connectivity.
        self.access_token().await.map(|_| ())
    }
}

fn urlencoded(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
