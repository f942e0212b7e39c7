use crate::auth::ClientRegistration;
use crate::errors::AppError;
use log::{debug, warn};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use std::io;
use std::time::{Duration, Instant};
use tiny_http::{Response, Server};
use url::Url;

/// How long the consent flow waits for the browser to come back.
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Tokens returned by the token endpoint.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

impl From<BasicTokenResponse> for TokenGrant {
    fn from(token: BasicTokenResponse) -> Self {
        Self {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token.refresh_token().map(|t| t.secret().to_string()),
            expires_in: token.expires_in(),
        }
    }
}

fn client(registration: &ClientRegistration) -> Result<BasicClient, AppError> {
    Ok(BasicClient::new(
        ClientId::new(registration.client_id.clone()),
        Some(ClientSecret::new(registration.client_secret.clone())),
        AuthUrl::new(registration.auth_uri.clone())?,
        Some(TokenUrl::new(registration.token_uri.clone())?),
    ))
}

pub async fn refresh_access_token(
    registration: &ClientRegistration,
    refresh_token: &str,
) -> Result<TokenGrant, AppError> {
    let token = client(registration)?
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(async_http_client)
        .await
        .map_err(|e| AppError::OAuth2(format!("Token refresh failed: {}", e)))?;
    Ok(token.into())
}

struct ConsentRequest {
    url: Url,
    state: CsrfToken,
    verifier: PkceCodeVerifier,
}

fn consent_request(client: &BasicClient, scopes: &[String]) -> ConsentRequest {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(scopes.iter().cloned().map(Scope::new))
        .set_pkce_challenge(challenge)
        // Without offline access Google issues no refresh token
        .add_extra_param("access_type", "offline")
        .url();
    ConsentRequest {
        url,
        state,
        verifier,
    }
}

/// Authorization-code flow with PKCE and a loopback redirect.
///
/// Listens on an OS-assigned local port, points the user's browser at the
/// consent page and exchanges the returned code for tokens.
pub async fn run_consent_flow(
    registration: &ClientRegistration,
    scopes: &[String],
) -> Result<TokenGrant, AppError> {
    // Listen first so the redirect cannot race the browser.
    let server = Server::http("127.0.0.1:0").map_err(|e| {
        AppError::AuthFailed(format!("Failed to bind consent callback listener: {}", e))
    })?;
    let redirect_uri = redirect_uri(server.server_addr().port());
    debug!("Consent redirect URI: {}", redirect_uri);

    let client = client(registration)?.set_redirect_uri(RedirectUrl::new(redirect_uri)?);
    let request = consent_request(&client, scopes);

    println!(
        "Please visit this URL to authorize this application:\n{}",
        request.url
    );
    if let Err(e) = open::that(request.url.as_str()) {
        warn!("Could not open a browser automatically: {}", e);
    }

    let expected_state = request.state.secret().clone();
    let code = tokio::task::spawn_blocking(move || {
        wait_for_code(|t| server.recv_timeout(t), &expected_state, CONSENT_TIMEOUT)
    })
    .await
    .map_err(|e| AppError::AuthFailed(format!("Consent listener stopped: {}", e)))??;

    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(request.verifier)
        .request_async(async_http_client)
        .await
        .map_err(|e| AppError::OAuth2(format!("Token exchange failed: {}", e)))?;
    Ok(token.into())
}

/// The listener only binds the IPv4 loopback, so the redirect names it literally.
fn redirect_uri(port: u16) -> String {
    format!("http://127.0.0.1:{}/", port)
}

#[derive(Debug, PartialEq)]
enum Callback {
    Code { code: String, state: Option<String> },
    Denied(String),
    Ignored,
}

fn parse_callback(path: &str) -> Result<Callback, AppError> {
    let url = Url::parse(&format!("http://localhost{}", path))?;
    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Ok(Callback::Denied(value.into_owned())),
            _ => {}
        }
    }
    Ok(match code {
        Some(code) => Callback::Code { code, state },
        None => Callback::Ignored,
    })
}

fn reply(request: tiny_http::Request, text: &str) {
    if let Err(e) = request.respond(Response::from_string(text)) {
        warn!("Failed to answer consent callback: {}", e);
    }
}

/// Blocks until the consent redirect delivers an authorization code.
///
/// `recv` polls the listener; failed accepts are logged and skipped.
fn wait_for_code<F>(
    mut recv: F,
    expected_state: &str,
    timeout: Duration,
) -> Result<String, AppError>
where
    F: FnMut(Duration) -> io::Result<Option<tiny_http::Request>>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let request = match recv(Duration::from_millis(500)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                warn!("Consent listener failed to accept a request: {}", e);
                continue;
            }
        };

        let callback = match parse_callback(request.url()) {
            Ok(callback) => callback,
            Err(e) => {
                debug!("Unparseable callback {}: {}", request.url(), e);
                reply(request, "Bad redirect");
                continue;
            }
        };

        match callback {
            Callback::Code { code, state } if state.as_deref() == Some(expected_state) => {
                reply(
                    request,
                    "The authentication flow has completed. You may close this window.",
                );
                return Ok(code);
            }
            Callback::Code { .. } => {
                reply(request, "State mismatch. You may close this window.");
                return Err(AppError::AuthFailed(
                    "Consent callback state did not match".to_string(),
                ));
            }
            Callback::Denied(reason) => {
                reply(request, "Authorization was not granted.");
                return Err(AppError::AuthFailed(format!(
                    "Consent was denied: {}",
                    reason
                )));
            }
            Callback::Ignored => reply(request, "No authorization code in this request."),
        }
    }

    Err(AppError::AuthFailed(format!(
        "No authorization code received within {} seconds",
        timeout.as_secs()
    )))
}
