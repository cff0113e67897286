//! The single HTTP chat client behind every provider.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

use super::prompt::{self, SYSTEM_PROMPT};
use super::{LlmAdapter, ProviderConfig};
use crate::error::{AppError, Result};

/// Hard timeout for one chat request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How a provider shapes its chat requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProfile {
    /// `POST {base}/chat/completions`, bearer auth,
    /// content at `choices[0].message.content`.
    OpenAi,
    /// `POST {base}/messages`, `x-api-key` auth,
    /// content at `content[0].text`.
    Anthropic,
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let millis = (self.base.as_millis() as u64)
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        Duration::from_millis(millis.min(self.cap.as_millis() as u64))
    }
}

pub struct ChatAdapter {
    client: reqwest::Client,
    config: ProviderConfig,
    retry: RetryPolicy,
}

impl ChatAdapter {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            client,
            config,
            retry: RetryPolicy::default(),
        })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.profile {
            WireProfile::OpenAi => format!("{base}/chat/completions"),
            WireProfile::Anthropic => format!("{base}/messages"),
        }
    }

    fn request_body(&self, system: &str, user: &str) -> Value {
        match self.config.profile {
            WireProfile::OpenAi => json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.3,
            }),
            WireProfile::Anthropic => json!({
                "model": self.config.model,
                "max_tokens": 4096,
                "system": system,
                "messages": [
                    {"role": "user", "content": user},
                ],
            }),
        }
    }

    async fn send_chat_once(&self, system: &str, user: &str) -> Result<String> {
        let request = self.client.post(self.endpoint());
        let request = match self.config.profile {
            WireProfile::OpenAi => request.bearer_auth(&self.config.api_key),
            WireProfile::Anthropic => request
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", "2023-06-01"),
        };

        let response = request
            .json(&self.request_body(system, user))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Transient("LLM request timed out".to_string())
                } else {
                    AppError::Transient(format!("HTTP request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!("{status}: {body}")));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Transient(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::User(format!("chat API error {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Consistency(format!("malformed response JSON: {e}")))?;

        extract_content(self.config.profile, &body)
            .ok_or_else(|| AppError::Consistency("response missing assistant content".to_string()))
    }

    /// Send one chat request with the retry policy applied: transient errors
    /// back off exponentially (with jitter), malformed responses get exactly
    /// one immediate retry, auth errors fail at once.
    async fn send_chat(&self, system: &str, user: &str) -> Result<String> {
        let mut attempts: u32 = 0;
        let mut json_retry_used = false;
        loop {
            attempts += 1;
            match self.send_chat_once(system, user).await {
                Ok(content) => return Ok(content),
                Err(AppError::Consistency(msg)) => {
                    if json_retry_used {
                        return Err(AppError::Consistency(msg));
                    }
                    json_retry_used = true;
                    warn!("Retrying once after malformed LLM response: {msg}");
                }
                Err(err) if err.is_transient() => {
                    if attempts >= self.retry.max_attempts {
                        return Err(err);
                    }
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    let delay = self.retry.delay(attempts) + jitter;
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient LLM error, backing off: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn extract_content(profile: WireProfile, body: &Value) -> Option<String> {
    let content = match profile {
        WireProfile::OpenAi => body["choices"][0]["message"]["content"].as_str()?,
        WireProfile::Anthropic => body["content"][0]["text"].as_str()?,
    };
    Some(content.trim().to_string())
}

/// Run `request` over `texts`, halving any batch whose translation count
/// comes back wrong. Halves are retried front-first so the output order
/// matches the input order. A single text whose reply still mismatches is
/// accepted wholesale (or kept untranslated when the reply is empty).
pub(crate) async fn translate_with_halving<F, Fut>(
    texts: &[String],
    mut request: F,
) -> Result<Vec<String>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<String>>>,
{
    let mut out = Vec::with_capacity(texts.len());
    let mut queue: VecDeque<Vec<String>> = VecDeque::new();
    queue.push_back(texts.to_vec());

    while let Some(batch) = queue.pop_front() {
        if batch.is_empty() {
            continue;
        }
        let translations = request(batch.clone()).await?;
        if translations.len() == batch.len() {
            out.extend(translations);
        } else if batch.len() == 1 {
            warn!(
                got = translations.len(),
                "Translation count mismatch at batch size 1, accepting reply as-is"
            );
            let sole = translations.join("\n");
            if sole.trim().is_empty() {
                out.push(batch.into_iter().next().expect("batch of one"));
            } else {
                out.push(sole);
            }
        } else {
            debug!(
                expected = batch.len(),
                got = translations.len(),
                "Translation count mismatch, halving batch"
            );
            let mid = batch.len() / 2;
            let (left, right) = batch.split_at(mid);
            queue.push_front(right.to_vec());
            queue.push_front(left.to_vec());
        }
    }

    Ok(out)
}

#[async_trait]
impl LlmAdapter for ChatAdapter {
    async fn translate_batch(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        translate_with_halving(texts, |batch| async move {
            let user = prompt::batch_prompt(&batch, source_language, target_language);
            let content = self.send_chat(SYSTEM_PROMPT, &user).await?;
            Ok(prompt::parse_numbered(&content))
        })
        .await
    }

    async fn healthcheck(&self) -> Result<()> {
        let reply = self
            .send_chat("You are a helpful assistant.", "Reply with ok.")
            .await?;
        if reply.is_empty() {
            return Err(AppError::Transient("empty response from provider".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_extract_content_per_profile() {
        let openai = json!({
            "choices": [{"message": {"role": "assistant", "content": " hi "}}]
        });
        assert_eq!(
            extract_content(WireProfile::OpenAi, &openai).as_deref(),
            Some("hi")
        );

        let anthropic = json!({"content": [{"type": "text", "text": "ok"}]});
        assert_eq!(
            extract_content(WireProfile::Anthropic, &anthropic).as_deref(),
            Some("ok")
        );

        assert_eq!(extract_content(WireProfile::OpenAi, &json!({})), None);
    }

    #[tokio::test]
    async fn test_halving_on_count_mismatch() {
        // Batch of 4 comes back with 3 translations; both halves of 2 then
        // succeed. The merged result has 4 strings in the original order.
        let input = texts(&["a", "b", "c", "d"]);
        let batch_sizes = RefCell::new(Vec::new());

        let result = translate_with_halving(&input, |batch| {
            batch_sizes.borrow_mut().push(batch.len());
            let response: Result<Vec<String>> = if batch.len() == 4 {
                Ok(texts(&["x", "y", "z"]))
            } else {
                Ok(batch.iter().map(|t| format!("T:{t}")).collect())
            };
            async move { response }
        })
        .await
        .unwrap();

        assert_eq!(result, texts(&["T:a", "T:b", "T:c", "T:d"]));
        assert_eq!(*batch_sizes.borrow(), vec![4, 2, 2]);
    }

    #[tokio::test]
    async fn test_halving_preserves_order_down_to_singles() {
        let input = texts(&["a", "b", "c"]);
        let result = translate_with_halving(&input, |batch| {
            let response: Result<Vec<String>> = if batch.len() > 1 {
                Ok(Vec::new()) // force halving all the way down
            } else {
                Ok(vec![format!("T:{}", batch[0])])
            };
            async move { response }
        })
        .await
        .unwrap();
        assert_eq!(result, texts(&["T:a", "T:b", "T:c"]));
    }

    #[tokio::test]
    async fn test_single_mismatch_accepts_reply() {
        let input = texts(&["hello"]);
        let result = translate_with_halving(&input, |_batch| async move {
            Ok(texts(&["你好", "世界"]))
        })
        .await
        .unwrap();
        assert_eq!(result, vec!["你好\n世界".to_string()]);
    }

    #[tokio::test]
    async fn test_single_empty_reply_keeps_original() {
        let input = texts(&["hello"]);
        let result =
            translate_with_halving(&input, |_batch| async move { Ok(Vec::new()) })
                .await
                .unwrap();
        assert_eq!(result, texts(&["hello"]));
    }

    #[tokio::test]
    async fn test_halving_propagates_hard_errors() {
        let input = texts(&["a", "b"]);
        let result = translate_with_halving(&input, |_batch| async move {
            Err(AppError::Auth("401".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }
}
