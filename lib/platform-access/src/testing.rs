//! A scripted identity provider for state machine tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AuthError, NetworkErrorKind};
use crate::provider::{CodeExchange, IdentityProvider};
use crate::token::TokenSet;

/// Answers each call with the next scripted response and counts calls.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    exchanges: Mutex<VecDeque<Result<TokenSet, AuthError>>>,
    userinfo: Mutex<VecDeque<Result<Value, AuthError>>>,
    requests: Mutex<Vec<CodeExchange>>,
    exchange_calls: AtomicUsize,
    userinfo_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_exchange(self, response: Result<TokenSet, AuthError>) -> Self {
        self.exchanges.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn on_userinfo(self, response: Result<Value, AuthError>) -> Self {
        self.userinfo.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn userinfo_calls(&self) -> usize {
        self.userinfo_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.exchange_calls() + self.userinfo_calls()
    }

    pub(crate) fn requests(&self) -> Vec<CodeExchange> {
        self.requests.lock().unwrap().clone()
    }
}

fn unscripted() -> AuthError {
    AuthError::Network {
        kind: NetworkErrorKind::Other,
        details: "no scripted response".into(),
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenSet, AuthError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.exchanges
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }

    async fn fetch_userinfo(&self, _access_token: &str) -> Result<Value, AuthError> {
        self.userinfo_calls.fetch_add(1, Ordering::SeqCst);
        self.userinfo
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }
}
