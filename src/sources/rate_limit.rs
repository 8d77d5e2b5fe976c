use reqwest::{header::HeaderMap, Response, StatusCode};
use std::{future::Future, time::Duration};
use tracing::warn;

use super::Provider;
use crate::error::ProviderError;

/// Reintentos acotados ante respuestas 429
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Techo de espera aunque el proveedor pida más
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Espera antes del intento `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(4);
        let fallback = self.base_backoff.saturating_mul(1 << exp);
        hint.unwrap_or(fallback).min(self.max_wait)
    }
}

/// Lee `Retry-After` en segundos
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?;
    let text = raw.to_str().ok()?.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<u64>().ok().map(Duration::from_secs)
}

/// Convierte estados HTTP de error en [`ProviderError`]
pub fn check_status(provider: Provider, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited {
            provider,
            retry_after: parse_retry_after(response.headers()),
        }),
        StatusCode::NOT_FOUND => Err(ProviderError::NotFound(response.url().to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::MissingCredentials(provider)),
        _ => Err(ProviderError::Api {
            provider,
            status: status.as_u16(),
        }),
    }
}

/// Ejecuta `op` reintentando sólo los errores de rate limit
pub async fn with_rate_limit_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(ProviderError::RateLimited { provider, retry_after }) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt, retry_after);
                warn!(
                    "⏳ {} limitado por {} (intento {}/{}), esperando {:?}",
                    op_name, provider, attempt, policy.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
