use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::prediction::{Classification, Scores};

/// Text classification backend used by the worker pool.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, lang: &str) -> Result<Classification, ClassifierError>;
}

/// Client for the external `/classify` HTTP endpoint.
pub struct HttpClassifier {
    http: Client,
    endpoint: String,
    api_token: String,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    lang: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    model: String,
    top: String,
    scores: Scores,
}

impl HttpClassifier {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self, ClassifierError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClassifierError::Client)?;

        Ok(Self {
            http,
            endpoint: format!("{}/classify", base_url.trim_end_matches('/')),
            api_token: api_token.to_string(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    /// Send text to the classification service and return its prediction.
    async fn classify(&self, text: &str, lang: &str) -> Result<Classification, ClassifierError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&ClassifyRequest { text, lang })
            .send()
            .await
            .map_err(ClassifierError::from_transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClassifierError::Unauthorized);
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifierError::ServiceUnavailable(format!("status {status}")));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Rejected(format!("status {status}: {body}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(ClassifierError::from_transport)?;
        let parsed: ClassifyResponse = serde_json::from_slice(&body)
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        if let Some((label, score)) = parsed
            .scores
            .iter()
            .find(|(_, score)| !score.is_finite() || !(0.0..=1.0).contains(*score))
        {
            return Err(ClassifierError::InvalidResponse(format!(
                "score for {label:?} out of range: {score}"
            )));
        }

        Ok(Classification {
            model: parsed.model,
            top_label: parsed.top,
            scores: parsed.scores,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request timed out")]
    Timeout,

    #[error("Classifier rejected the service credential")]
    Unauthorized,

    #[error("Classifier unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Classifier returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Classifier rejected the input: {0}")]
    Rejected(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

impl ClassifierError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::ServiceUnavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, timeout: Duration) -> HttpClassifier {
        HttpClassifier::new(&server.uri(), "test-token", timeout).unwrap()
    }

    #[tokio::test]
    async fn classify_returns_prediction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!({"text": "hello", "lang": "en"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "unitary/toxic-bert",
                "top": "non-toxic",
                "scores": {"non-toxic": 0.9, "toxic": 0.1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(5))
            .classify("hello", "en")
            .await
            .unwrap();

        assert_eq!(result.model, "unitary/toxic-bert");
        assert_eq!(result.top_label, "non-toxic");
        assert_eq!(result.scores.get("toxic"), Some(&0.1));
    }

    #[tokio::test]
    async fn trailing_slash_in_base_url_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "m", "top": "a", "scores": {"a": 1.0}
            })))
            .mount(&server)
            .await;

        let classifier =
            HttpClassifier::new(&format!("{}/", server.uri()), "t", Duration::from_secs(5)).unwrap();
        assert!(classifier.classify("x", "en").await.is_ok());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .classify("hello", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Unauthorized));
    }

    #[tokio::test]
    async fn server_error_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .classify("hello", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn bad_request_maps_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("text too long"))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .classify("hello", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Rejected(ref msg) if msg.contains("text too long")));
    }

    #[tokio::test]
    async fn malformed_body_maps_to_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .classify("hello", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn out_of_range_score_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "m", "top": "toxic", "scores": {"toxic": 1.7}
            })))
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .classify("hello", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"model": "m", "top": "a", "scores": {}}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_millis(100))
            .classify("hello", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Timeout));
    }

    #[tokio::test]
    async fn connection_refused_maps_to_unavailable() {
        let classifier =
            HttpClassifier::new("http://127.0.0.1:1", "t", Duration::from_secs(2)).unwrap();
        let err = classifier.classify("hello", "en").await.unwrap_err();
        assert!(matches!(err, ClassifierError::ServiceUnavailable(_)));
    }
}
