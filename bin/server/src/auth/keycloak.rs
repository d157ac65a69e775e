//! HTTP calls to the Keycloak token and userinfo endpoints.
//!
//! The authorization-code grant goes through the `oauth2` client. Userinfo
//! has no counterpart there and is a plain bearer GET.

use async_trait::async_trait;
use gist_analytics_platform_access::{
    AuthError, CodeExchange, IdentityProvider, NetworkErrorKind, OidcConfig, TokenSet,
};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AsyncHttpClient, AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    HttpRequest, HttpResponse, PkceCodeVerifier, RedirectUrl, RequestTokenError, TokenResponse,
    TokenUrl,
};
use reqwest::StatusCode;
use serde_json::Value;
use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU16, Ordering};
use tracing::{debug, instrument, warn};

type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

type TokenError = RequestTokenError<reqwest::Error, BasicErrorResponse>;

/// Keycloak implementation of [`IdentityProvider`].
pub struct KeycloakClient {
    http: reqwest::Client,
    oauth: TokenClient,
    userinfo_endpoint: String,
}

impl KeycloakClient {
    /// Creates a client for the realm named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the HTTP client cannot be
    /// built or the token endpoint is not a valid URL.
    pub fn new(config: &OidcConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Configuration {
                details: format!("failed to create HTTP client: {e}"),
            })?;

        let token_url = TokenUrl::new(config.token_endpoint()).map_err(|e| {
            AuthError::Configuration {
                details: format!("invalid token endpoint: {e}"),
            }
        })?;

        // Keycloak expects client credentials in the form body.
        let mut oauth = BasicClient::new(ClientId::new(config.client_id().to_string()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url);
        if let Some(secret) = config.client_secret() {
            oauth = oauth.set_client_secret(ClientSecret::new(secret.to_string()));
        }

        Ok(Self {
            http,
            oauth,
            userinfo_endpoint: config.userinfo_endpoint(),
        })
    }

    /// Sends one token endpoint request, noting the response status.
    async fn send(
        &self,
        request: HttpRequest,
        status: &AtomicU16,
    ) -> Result<HttpResponse, reqwest::Error> {
        let response = self.http.execute(request.try_into()?).await?;
        status.store(response.status().as_u16(), Ordering::Relaxed);

        let mut http_response = HttpResponse::new(Vec::new());
        *http_response.status_mut() = response.status();
        *http_response.headers_mut() = response.headers().clone();
        *http_response.body_mut() = response.bytes().await?.to_vec();
        Ok(http_response)
    }
}

/// Adapts [`KeycloakClient::send`] to [`AsyncHttpClient`] with a `Send`
/// future, which a plain closure cannot express here.
struct TokenSender<'a> {
    client: &'a KeycloakClient,
    status: &'a AtomicU16,
}

impl<'c> AsyncHttpClient<'c> for TokenSender<'_> {
    type Error = reqwest::Error;
    type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, reqwest::Error>> + Send + 'c>>;

    fn call(&'c self, request: HttpRequest) -> Self::Future {
        Box::pin(self.client.send(request, self.status))
    }
}

#[async_trait]
impl IdentityProvider for KeycloakClient {
    #[instrument(skip_all, fields(with_verifier = request.verifier().is_some()))]
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenSet, AuthError> {
        let redirect_uri =
            RedirectUrl::new(request.redirect_uri().to_string()).map_err(|e| {
                AuthError::Configuration {
                    details: format!("invalid redirect URI: {e}"),
                }
            })?;

        let mut token_request = self
            .oauth
            .exchange_code(AuthorizationCode::new(request.code().to_string()))
            .set_redirect_uri(Cow::Owned(redirect_uri));
        if let Some(verifier) = request.verifier() {
            token_request =
                token_request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }

        let status = AtomicU16::new(0);
        let send = TokenSender {
            client: self,
            status: &status,
        };
        let result = token_request.request_async(&send).await;

        let status = StatusCode::from_u16(status.load(Ordering::Relaxed)).ok();
        debug!(status = status.map(|s| s.as_u16()), "token endpoint answered");

        result
            .map(|response| token_set(&response))
            .map_err(|err| token_error(err, status))
    }

    #[instrument(skip_all)]
    async fn fetch_userinfo(&self, access_token: &str) -> Result<Value, AuthError> {
        let response = self
            .http
            .get(&self.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthError::Network {
                kind: NetworkErrorKind::Unavailable,
                details: format!("userinfo endpoint returned HTTP {}", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(AuthError::IdentityFetch {
                details: match status {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        format!("userinfo refused the access token (HTTP {})", status.as_u16())
                    }
                    _ => format!("userinfo returned HTTP {}", status.as_u16()),
                },
            });
        }

        response.json().await.map_err(|e| AuthError::Network {
            kind: NetworkErrorKind::Malformed,
            details: format!("unparsable userinfo response: {e}"),
        })
    }
}

fn token_set(response: &BasicTokenResponse) -> TokenSet {
    TokenSet::new(
        response.access_token().secret().clone(),
        response.refresh_token().map(|token| token.secret().clone()),
    )
    .with_expires_in(response.expires_in().map(|lifetime| lifetime.as_secs()))
}

/// Classifies a failed grant. Bodies that are not OAuth2 error responses
/// are judged by the HTTP status the endpoint answered with.
fn token_error(err: TokenError, status: Option<StatusCode>) -> AuthError {
    let details = match err {
        RequestTokenError::ServerResponse(body) => {
            let error: &str = body.error().as_ref();
            return AuthError::from_provider_error(error, body.error_description().cloned());
        }
        RequestTokenError::Request(e) => return transport_error(e),
        RequestTokenError::Parse(e, _) => format!("unparsable token response at {}", e.path()),
        RequestTokenError::Other(details) => details,
    };

    match status {
        Some(status) if status.is_server_error() => AuthError::Network {
            kind: NetworkErrorKind::Unavailable,
            details: format!("token endpoint returned HTTP {}", status.as_u16()),
        },
        Some(status) if !status.is_success() => {
            warn!(status = status.as_u16(), "token endpoint error without OAuth2 body");
            AuthError::ProviderRejected {
                error: format!("http_{}", status.as_u16()),
                description: None,
            }
        }
        _ => AuthError::Network {
            kind: NetworkErrorKind::Malformed,
            details,
        },
    }
}

fn transport_error(e: reqwest::Error) -> AuthError {
    let kind = if e.is_timeout() {
        NetworkErrorKind::Timeout
    } else if e.is_connect() {
        NetworkErrorKind::Connect
    } else if e.is_decode() {
        NetworkErrorKind::Malformed
    } else {
        NetworkErrorKind::Other
    };
    AuthError::Network {
        kind,
        details: e.without_url().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Form, Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode as AxumStatus},
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const TOKEN_PATH: &str = "/realms/gist/protocol/openid-connect/token";
    const USERINFO_PATH: &str = "/realms/gist/protocol/openid-connect/userinfo";

    #[derive(Clone, Default)]
    struct Fake {
        token_status: u16,
        token_body: String,
        forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    async fn token(State(fake): State<Fake>, Form(form): Form<HashMap<String, String>>) -> Response {
        fake.forms.lock().expect("lock").push(form);
        let status = AxumStatus::from_u16(fake.token_status).expect("status");
        (
            status,
            [("content-type", "application/json")],
            fake.token_body.clone(),
        )
            .into_response()
    }

    async fn userinfo(headers: HeaderMap) -> Response {
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some("Bearer good") => Json(json!({"sub": "u1", "email": "a@example.com"})).into_response(),
            _ => AxumStatus::UNAUTHORIZED.into_response(),
        }
    }

    async fn serve(fake: Fake) -> (KeycloakClient, Fake) {
        let app = Router::new()
            .route(TOKEN_PATH, post(token))
            .route(USERINFO_PATH, get(userinfo))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let config = OidcConfig::builder(
            format!("http://{addr}"),
            "gist".into(),
            "gist-dashboard".into(),
        )
        .client_secret("s3cret".into())
        .build();
        (KeycloakClient::new(&config).expect("client"), fake)
    }

    fn exchange(verifier: Option<&str>) -> CodeExchange {
        CodeExchange::new(
            "abc123".into(),
            "http://localhost:3000/".into(),
            verifier.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn exchanges_code_with_verifier() {
        let (client, fake) = serve(Fake {
            token_status: 200,
            token_body: json!({
                "access_token": "at",
                "token_type": "Bearer",
                "refresh_token": "rt",
                "expires_in": 300
            })
                .to_string(),
            ..Fake::default()
        })
        .await;

        let tokens = client
            .exchange_code(&exchange(Some("verifier-1")))
            .await
            .expect("tokens");
        assert_eq!(tokens.access_token(), "at");
        assert_eq!(tokens.refresh_token(), Some("rt"));
        assert_eq!(tokens.expires_in(), Some(300));

        let forms = fake.forms.lock().expect("lock");
        let form = &forms[0];
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "abc123");
        assert_eq!(form["client_id"], "gist-dashboard");
        assert_eq!(form["client_secret"], "s3cret");
        assert_eq!(form["code_verifier"], "verifier-1");
    }

    #[tokio::test]
    async fn omits_verifier_when_absent() {
        let (client, fake) = serve(Fake {
            token_status: 200,
            token_body: json!({"access_token": "at", "token_type": "Bearer"}).to_string(),
            ..Fake::default()
        })
        .await;

        let tokens = client.exchange_code(&exchange(None)).await.expect("tokens");
        assert_eq!(tokens.expires_in(), None);
        assert!(!fake.forms.lock().expect("lock")[0].contains_key("code_verifier"));
    }

    #[tokio::test]
    async fn classifies_invalid_grant() {
        let (client, _) = serve(Fake {
            token_status: 400,
            token_body: json!({"error": "invalid_grant", "error_description": "Code not valid"})
                .to_string(),
            ..Fake::default()
        })
        .await;

        let err = client.exchange_code(&exchange(None)).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Grant {
                description: "Code not valid".into()
            }
        );
    }

    #[tokio::test]
    async fn classifies_invalid_client() {
        let (client, _) = serve(Fake {
            token_status: 401,
            token_body: json!({"error": "unauthorized_client"}).to_string(),
            ..Fake::default()
        })
        .await;

        let err = client.exchange_code(&exchange(None)).await.unwrap_err();
        assert!(matches!(err, AuthError::Client { .. }));
        assert!(err.is_operator_facing());
    }

    #[tokio::test]
    async fn server_errors_are_unavailable() {
        let (client, _) = serve(Fake {
            token_status: 503,
            token_body: "maintenance".into(),
            ..Fake::default()
        })
        .await;

        let err = client.exchange_code(&exchange(None)).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Network {
                kind: NetworkErrorKind::Unavailable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn garbage_success_body_is_malformed() {
        let (client, _) = serve(Fake {
            token_status: 200,
            token_body: "<html>proxy login</html>".into(),
            ..Fake::default()
        })
        .await;

        let err = client.exchange_code(&exchange(None)).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Network {
                kind: NetworkErrorKind::Malformed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn error_without_oauth_body_is_rejected() {
        let (client, _) = serve(Fake {
            token_status: 404,
            token_body: "not found".into(),
            ..Fake::default()
        })
        .await;

        let err = client.exchange_code(&exchange(None)).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::ProviderRejected {
                error: "http_404".into(),
                description: None
            }
        );
    }

    #[tokio::test]
    async fn empty_error_body_is_rejected_by_status() {
        let (client, _) = serve(Fake {
            token_status: 400,
            token_body: String::new(),
            ..Fake::default()
        })
        .await;

        let err = client.exchange_code(&exchange(None)).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::ProviderRejected {
                error: "http_400".into(),
                description: None
            }
        );
    }

    #[tokio::test]
    async fn fetches_userinfo_with_bearer_token() {
        let (client, _) = serve(Fake::default()).await;

        let claims = client.fetch_userinfo("good").await.expect("userinfo");
        assert_eq!(claims["sub"], "u1");

        let err = client.fetch_userinfo("stale").await.unwrap_err();
        assert!(matches!(err, AuthError::IdentityFetch { .. }));
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let config = OidcConfig::new(format!("http://{addr}"), "gist".into(), "gist-dashboard".into());
        let client = KeycloakClient::new(&config).expect("client");

        let err = client.exchange_code(&exchange(None)).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Network {
                kind: NetworkErrorKind::Connect,
                ..
            }
        ));
    }
}
