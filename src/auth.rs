use crate::errors::AppError;
use crate::oauth::{self, TokenGrant};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const TOKEN_CACHE_FILE: &str = "token.json";
pub const CLIENT_SECRET_FILE: &str = "credentials.json";

// Read-only access to Gmail messages
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// The OAuth client a credential was issued to.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

impl From<yup_oauth2::ApplicationSecret> for ClientRegistration {
    fn from(secret: yup_oauth2::ApplicationSecret) -> Self {
        Self {
            client_id: secret.client_id,
            client_secret: secret.client_secret,
            auth_uri: secret.auth_uri,
            token_uri: secret.token_uri,
        }
    }
}

/// Persisted authorization state.
///
/// Serialized with the field names of Google's "authorized user" token file,
/// so a `token.json` written by Google's own client libraries loads as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    /// Builds a credential from a token endpoint response.
    ///
    /// Google usually omits the refresh token on refresh responses, in which
    /// case `previous_refresh` is carried over.
    pub fn from_grant(
        grant: TokenGrant,
        registration: &ClientRegistration,
        scopes: &[String],
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let expiry = grant
            .expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .and_then(|d| now.checked_add_signed(d));

        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(previous_refresh),
            token_uri: Some(registration.token_uri.clone()),
            client_id: Some(registration.client_id.clone()),
            client_secret: Some(registration.client_secret.clone()),
            scopes: scopes.to_vec(),
            expiry,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now >= expiry - Duration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.is_expired(now)
    }

    /// An empty `refresh_token` counts as none.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Client registration stored alongside the tokens, if complete.
    pub fn registration(&self) -> Option<ClientRegistration> {
        Some(ClientRegistration {
            client_id: self.client_id.clone()?,
            client_secret: self.client_secret.clone()?,
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: self
                .token_uri
                .clone()
                .unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string()),
        })
    }
}

pub trait CredentialStore {
    fn load(&self) -> Result<Option<Credential>, AppError>;
    fn save(&self, credential: &Credential) -> Result<(), AppError>;
}

/// Stores the credential as JSON in a local file.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, AppError> {
        if !self.path.exists() {
            debug!("No token cache at {}", self.path.display());
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(
                    "Ignoring unreadable token cache {}: {}",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(credential)?;
        fs::write(&self.path, json)?;
        debug!("Token cache written to {}", self.path.display());
        Ok(())
    }
}

/// Obtains credentials from the provider.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Exchanges the credential's refresh token for a new access token.
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AppError>;

    /// Runs the interactive consent flow.
    async fn authorize(&self) -> Result<Credential, AppError>;
}

/// Installed-application flow against Google, driven by `credentials.json`.
pub struct InstalledAppAuthorizer {
    client_secret_path: PathBuf,
    scopes: Vec<String>,
}

impl InstalledAppAuthorizer {
    pub fn new(client_secret_path: impl Into<PathBuf>) -> Self {
        Self {
            client_secret_path: client_secret_path.into(),
            scopes: vec![GMAIL_READONLY_SCOPE.to_string()],
        }
    }

    async fn registration(&self) -> Result<ClientRegistration, AppError> {
        let secret = yup_oauth2::read_application_secret(&self.client_secret_path)
            .await
            .map_err(|e| {
                AppError::CredentialsError(format!(
                    "Failed to read client secret from {}: {}",
                    self.client_secret_path.display(),
                    e
                ))
            })?;
        Ok(secret.into())
    }
}

#[async_trait]
impl Authorizer for InstalledAppAuthorizer {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AppError> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::AuthFailed("Credential has no refresh token".to_string()))?;
        let registration = match credential.registration() {
            Some(registration) => registration,
            None => self.registration().await?,
        };

        let grant = oauth::refresh_access_token(&registration, &refresh_token).await?;
        let scopes = if credential.scopes.is_empty() {
            &self.scopes
        } else {
            &credential.scopes
        };
        Ok(Credential::from_grant(
            grant,
            &registration,
            scopes,
            Some(refresh_token),
            Utc::now(),
        ))
    }

    async fn authorize(&self) -> Result<Credential, AppError> {
        let registration = self.registration().await?;
        let grant = oauth::run_consent_flow(&registration, &self.scopes).await?;
        Ok(Credential::from_grant(
            grant,
            &registration,
            &self.scopes,
            None,
            Utc::now(),
        ))
    }
}

/// Returns a usable credential, refreshing or re-authorizing as needed.
///
/// A credential that is still valid is returned untouched. Anything newly
/// obtained is written to `store` before it is returned.
pub async fn ensure_valid<S, A>(
    store: &S,
    authorizer: &A,
    cached: Option<Credential>,
) -> Result<Credential, AppError>
where
    S: CredentialStore + ?Sized,
    A: Authorizer + ?Sized,
{
    let now = Utc::now();
    let credential = match cached {
        Some(credential) if credential.is_valid(now) => {
            debug!("Cached access token is still valid");
            return Ok(credential);
        }
        Some(credential) if credential.is_expired(now) && credential.can_refresh() => {
            info!("Access token expired, refreshing");
            authorizer.refresh(&credential).await?
        }
        _ => {
            info!("No usable token cached, starting the consent flow");
            authorizer.authorize().await?
        }
    };

    store.save(&credential)?;
    Ok(credential)
}

/// Loads the cached credential and makes sure it can be used.
pub async fn authenticate<S, A>(store: &S, authorizer: &A) -> Result<Credential, AppError>
where
    S: CredentialStore + ?Sized,
    A: Authorizer + ?Sized,
{
    let cached = store.load()?;
    ensure_valid(store, authorizer, cached).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<Credential>>,
    }

    impl CredentialStore for MemoryStore {
        fn load(&self) -> Result<Option<Credential>, AppError> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }

        fn save(&self, credential: &Credential) -> Result<(), AppError> {
            self.saved.lock().unwrap().push(credential.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CannedAuthorizer {
        refreshes: AtomicUsize,
        consents: AtomicUsize,
    }

    #[async_trait]
    impl Authorizer for CannedAuthorizer {
        async fn refresh(&self, credential: &Credential) -> Result<Credential, AppError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                access_token: "refreshed".to_string(),
                expiry: Some(Utc::now() + Duration::hours(1)),
                ..credential.clone()
            })
        }

        async fn authorize(&self) -> Result<Credential, AppError> {
            self.consents.fetch_add(1, Ordering::SeqCst);
            Ok(credential("consented", Some(Duration::hours(1)), Some("rt-new")))
        }
    }

    fn credential(token: &str, valid_for: Option<Duration>, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: token.to_string(),
            refresh_token: refresh.map(str::to_string),
            token_uri: None,
            client_id: None,
            client_secret: None,
            scopes: vec![GMAIL_READONLY_SCOPE.to_string()],
            expiry: valid_for.map(|d| Utc::now() + d),
        }
    }

    #[tokio::test]
    async fn valid_credential_is_returned_unchanged() {
        let store = MemoryStore::default();
        let authorizer = CannedAuthorizer::default();
        let cached = credential("cached", Some(Duration::hours(1)), Some("rt"));

        let result = ensure_valid(&store, &authorizer, Some(cached.clone()))
            .await
            .unwrap();

        assert_eq!(result, cached);
        assert!(store.saved.lock().unwrap().is_empty());
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_credential_with_refresh_token_is_refreshed_and_saved() {
        let store = MemoryStore::default();
        let authorizer = CannedAuthorizer::default();
        let cached = credential("stale", Some(-Duration::minutes(5)), Some("rt"));

        let result = ensure_valid(&store, &authorizer, Some(cached)).await.unwrap();

        assert_eq!(result.access_token, "refreshed");
        assert_eq!(result.refresh_token.as_deref(), Some("rt"));
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 0);
        assert_eq!(store.saved.lock().unwrap().as_slice(), &[result]);
    }

    #[tokio::test]
    async fn expired_credential_without_refresh_token_runs_consent() {
        let store = MemoryStore::default();
        let authorizer = CannedAuthorizer::default();
        let cached = credential("stale", Some(-Duration::minutes(5)), None);

        let result = ensure_valid(&store, &authorizer, Some(cached)).await.unwrap();

        assert_eq!(result.access_token, "consented");
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 1);
        assert_eq!(store.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_credential_with_empty_refresh_token_runs_consent() {
        let store = MemoryStore::default();
        let authorizer = CannedAuthorizer::default();
        let cached = credential("stale", Some(-Duration::minutes(5)), Some(""));

        let result = ensure_valid(&store, &authorizer, Some(cached)).await.unwrap();

        assert_eq!(result.access_token, "consented");
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_credential_runs_consent_and_persists() {
        let store = MemoryStore::default();
        let authorizer = CannedAuthorizer::default();

        let result = authenticate(&store, &authorizer).await.unwrap();

        assert_eq!(result.access_token, "consented");
        assert_eq!(store.load().unwrap(), Some(result));
    }

    #[tokio::test]
    async fn blank_token_that_has_not_expired_runs_consent() {
        let store = MemoryStore::default();
        let authorizer = CannedAuthorizer::default();
        let cached = credential("", None, Some("rt"));

        ensure_valid(&store, &authorizer, Some(cached)).await.unwrap();

        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expiry_skew_counts_as_expired() {
        let now = Utc::now();
        let almost = credential("t", Some(Duration::seconds(30)), None);
        assert!(almost.is_expired(now));
        assert!(!credential("t", None, None).is_expired(now));
    }

    #[test]
    fn google_authorized_user_file_is_understood() {
        let raw = r#"{
            "token": "ya29.a0",
            "refresh_token": "1//0g",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "123.apps.googleusercontent.com",
            "client_secret": "shh",
            "scopes": ["https://www.googleapis.com/auth/gmail.readonly"],
            "universe_domain": "googleapis.com",
            "account": "",
            "expiry": "2024-05-01T10:00:00.123456Z"
        }"#;
        let credential: Credential = serde_json::from_str(raw).unwrap();

        assert_eq!(credential.access_token, "ya29.a0");
        assert_eq!(
            credential.expiry.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00.123456+00:00"
        );
        let registration = credential.registration().unwrap();
        assert_eq!(registration.client_id, "123.apps.googleusercontent.com");
        assert_eq!(registration.token_uri, GOOGLE_TOKEN_URI);
    }

    #[test]
    fn grant_keeps_previous_refresh_token() {
        let registration = ClientRegistration {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: "https://example.test/token".to_string(),
        };
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "fresh".to_string(),
            refresh_token: None,
            expires_in: Some(std::time::Duration::from_secs(3599)),
        };

        let credential = Credential::from_grant(
            grant,
            &registration,
            &[GMAIL_READONLY_SCOPE.to_string()],
            Some("kept".to_string()),
            now,
        );

        assert_eq!(credential.refresh_token.as_deref(), Some("kept"));
        assert_eq!(credential.expiry, Some(now + Duration::seconds(3599)));
        assert_eq!(credential.registration(), Some(registration));
    }

    #[test]
    fn file_store_round_trips_and_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join(TOKEN_CACHE_FILE));
        assert_eq!(store.load().unwrap(), None);

        let saved = credential("abc", Some(Duration::hours(1)), Some("rt"));
        store.save(&saved).unwrap();
        assert_eq!(store.load().unwrap(), Some(saved));

        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
