use crate::errors::AppError;
use crate::message::Message;
use async_trait::async_trait;
use google_gmail1::Gmail;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use log::{debug, info};

pub const FEEDBACK_QUERY: &str = r#"subject:"Mini-Mock Interview Feedback""#;

/// Hard upper bound on messages fetched per run.
pub const MAX_MESSAGES: u32 = 10;

pub type GmailHub = Gmail<HttpsConnector<HttpConnector>>;

/// Read-only view of a mailbox.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// IDs of messages matching `query`, in the order the service returns them.
    async fn list_matching(&self, query: &str, cap: u32) -> Result<Vec<String>, AppError>;

    /// Full message: headers, MIME structure and body data.
    async fn fetch_full(&self, id: &str) -> Result<Message, AppError>;
}

pub struct GmailSource {
    hub: GmailHub,
}

impl GmailSource {
    pub fn new(hub: GmailHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MailSource for GmailSource {
    async fn list_matching(&self, query: &str, cap: u32) -> Result<Vec<String>, AppError> {
        info!("Gmail query: {}", query);
        let (_, response) = self
            .hub
            .users()
            .messages_list("me")
            .q(query)
            .max_results(cap)
            .doit()
            .await?;

        Ok(response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect())
    }

    async fn fetch_full(&self, id: &str) -> Result<Message, AppError> {
        debug!("Fetching message ID: {}", id);
        let (_, message) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .doit()
            .await?;
        Message::try_from(message)
    }
}

/// Result of a search-and-fetch pass.
#[derive(Debug)]
pub enum Fetched {
    Messages(Vec<Message>),
    NoMatches,
    /// The search itself failed; treated as zero results.
    ListingFailed(AppError),
}

impl Fetched {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Fetched::Messages(messages) => messages,
            Fetched::NoMatches | Fetched::ListingFailed(_) => Vec::new(),
        }
    }
}

/// Lists messages matching `query` and fetches at most `cap` of them in full.
///
/// A failed search is reported as [`Fetched::ListingFailed`]; a failure while
/// fetching an individual message is returned as an error.
pub async fn fetch_feedback_emails<M>(source: &M, query: &str, cap: u32) -> Result<Fetched, AppError>
where
    M: MailSource + ?Sized,
{
    let ids = match source.list_matching(query, cap).await {
        Ok(ids) => ids,
        Err(e) => {
            debug!("messages.list failed: {:?}", e);
            return Ok(Fetched::ListingFailed(e));
        }
    };

    if ids.is_empty() {
        return Ok(Fetched::NoMatches);
    }
    info!("Search returned {} message(s)", ids.len());

    let mut messages = Vec::with_capacity(ids.len().min(cap as usize));
    for id in ids.iter().take(cap as usize) {
        messages.push(source.fetch_full(id).await?);
    }
    Ok(Fetched::Messages(messages))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory mailbox; `ids` are what the search returns, regardless of cap.
    #[derive(Default)]
    pub(crate) struct FakeMailbox {
        pub ids: Vec<String>,
        pub list_error: bool,
        pub broken_id: Option<String>,
        pub list_calls: Mutex<Vec<(String, u32)>>,
        pub fetched: Mutex<Vec<String>>,
    }

    impl FakeMailbox {
        pub(crate) fn with_ids(count: usize) -> Self {
            Self {
                ids: (1..=count).map(|n| format!("id-{}", n)).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl MailSource for FakeMailbox {
        async fn list_matching(&self, query: &str, cap: u32) -> Result<Vec<String>, AppError> {
            self.list_calls.lock().unwrap().push((query.to_string(), cap));
            if self.list_error {
                return Err(AppError::Io(std::io::Error::other("connection reset")));
            }
            Ok(self.ids.clone())
        }

        async fn fetch_full(&self, id: &str) -> Result<Message, AppError> {
            if self.broken_id.as_deref() == Some(id) {
                return Err(AppError::Io(std::io::Error::other("message vanished")));
            }
            self.fetched.lock().unwrap().push(id.to_string());
            Ok(serde_json::from_value(serde_json::json!({
                "id": id,
                "internalDate": "1700000000000",
                "payload": { "mimeType": "text/plain", "body": { "data": "Ym9keQ" } }
            }))?)
        }
    }

    #[tokio::test]
    async fn only_the_first_cap_messages_are_fetched() {
        let mailbox = FakeMailbox::with_ids(15);

        let fetched = fetch_feedback_emails(&mailbox, FEEDBACK_QUERY, MAX_MESSAGES)
            .await
            .unwrap();

        let messages = fetched.into_messages();
        assert_eq!(messages.len(), 10);
        assert_eq!(messages[0].id.as_deref(), Some("id-1"));
        assert_eq!(messages[9].id.as_deref(), Some("id-10"));
        assert_eq!(
            mailbox.list_calls.lock().unwrap().as_slice(),
            &[(FEEDBACK_QUERY.to_string(), 10)]
        );
    }

    #[tokio::test]
    async fn empty_search_is_no_matches() {
        let mailbox = FakeMailbox::default();

        let fetched = fetch_feedback_emails(&mailbox, FEEDBACK_QUERY, MAX_MESSAGES)
            .await
            .unwrap();

        assert!(matches!(fetched, Fetched::NoMatches));
        assert!(mailbox.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_failure_degrades_to_no_results() {
        let mailbox = FakeMailbox {
            list_error: true,
            ..FakeMailbox::with_ids(3)
        };

        let fetched = fetch_feedback_emails(&mailbox, FEEDBACK_QUERY, MAX_MESSAGES)
            .await
            .unwrap();

        assert!(matches!(fetched, Fetched::ListingFailed(_)));
        assert!(fetched.into_messages().is_empty());
    }

    #[tokio::test]
    async fn per_message_failure_is_propagated() {
        let mailbox = FakeMailbox {
            broken_id: Some("id-2".to_string()),
            ..FakeMailbox::with_ids(3)
        };

        let result = fetch_feedback_emails(&mailbox, FEEDBACK_QUERY, MAX_MESSAGES).await;

        assert!(result.is_err());
        assert_eq!(mailbox.fetched.lock().unwrap().as_slice(), &["id-1".to_string()]);
    }
}
