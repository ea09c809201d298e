use super::{format_phone_number, mask_phone_number, SmsReceipt, SmsSender};
use anyhow::Context;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.textbee.dev/api/v1";

/// TextBeeConfig locates and authenticates with a TextBee SMS gateway device.
#[derive(derivative::Derivative, Clone)]
#[derivative(Debug)]
pub struct TextBeeConfig {
    pub base_url: url::Url,
    #[derivative(Debug = "ignore")]
    pub api_key: String,
    pub device_id: String,
    /// Timeout of each request to the gateway.
    pub timeout: Duration,
    /// Number of requests made by a single send before giving up.
    pub attempts: u32,
    /// Pause between requests of a single send.
    pub retry_pause: Duration,
}

impl TextBeeConfig {
    pub fn new(api_key: impl Into<String>, device_id: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: url::Url::parse(DEFAULT_BASE_URL)?,
            api_key: api_key.into(),
            device_id: device_id.into(),
            timeout: Duration::from_secs(15),
            attempts: 3,
            retry_pause: Duration::from_secs(1),
        })
    }
}

/// TextBeeService sends SMS through the TextBee gateway,
/// which relays them from an Android device.
pub struct TextBeeService {
    client: reqwest::Client,
    config: TextBeeConfig,
    send_url: url::Url,
}

#[derive(serde::Serialize)]
struct SendRequest<'a> {
    recipients: [&'a str; 1],
    message: &'a str,
}

#[derive(serde::Deserialize)]
struct SendResponse {
    #[serde(default)]
    data: Option<SendResponseData>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponseData {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sms_batch_id: Option<String>,
    #[serde(default)]
    recipient_count: Option<i64>,
}

impl TextBeeService {
    pub fn new(config: TextBeeConfig) -> anyhow::Result<Self> {
        let mut send_url = config.base_url.clone();
        send_url
            .path_segments_mut()
            .map_err(|()| anyhow::anyhow!("TextBee base URL {} cannot be a base", config.base_url))?
            .pop_if_empty()
            .extend(["gateway", "devices", config.device_id.as_str(), "send-sms"]);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building TextBee HTTP client")?;

        Ok(Self {
            client,
            config,
            send_url,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    async fn post(&self, phone: &str, message: &str) -> Result<SmsReceipt, SendError> {
        let response = self
            .client
            .post(self.send_url.clone())
            .header("x-api-key", &self.config.api_key)
            .json(&SendRequest {
                recipients: [phone],
                message,
            })
            .send()
            .await
            .map_err(|err| SendError::Retryable(anyhow::anyhow!("request failed: {err}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let err = anyhow::anyhow!("gateway responded {status}: {body}");
            return Err(
                if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    SendError::Retryable(err)
                } else {
                    SendError::Permanent(err)
                },
            );
        }

        let data = serde_json::from_str::<SendResponse>(&body)
            .ok()
            .and_then(|r| r.data);

        if let Some(SendResponseData {
            success: Some(false),
            message,
            ..
        }) = &data
        {
            return Err(SendError::Permanent(anyhow::anyhow!(
                "gateway rejected the message: {}",
                message.as_deref().unwrap_or("no reason given")
            )));
        }

        Ok(SmsReceipt {
            phone: phone.to_string(),
            batch_id: data.as_ref().and_then(|d| d.sms_batch_id.clone()),
            recipient_count: data.as_ref().and_then(|d| d.recipient_count),
        })
    }
}

enum SendError {
    Retryable(anyhow::Error),
    Permanent(anyhow::Error),
}

#[async_trait::async_trait]
impl SmsSender for TextBeeService {
    #[tracing::instrument(skip_all, fields(phone = %mask_phone_number(phone)))]
    async fn send_sms(&self, phone: &str, message: &str) -> anyhow::Result<SmsReceipt> {
        let phone = format_phone_number(phone)?;
        let attempts = self.config.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.post(&phone, message).await {
                Ok(receipt) => {
                    tracing::debug!(attempt, batch_id = ?receipt.batch_id, "SMS queued by gateway");
                    return Ok(receipt);
                }
                Err(SendError::Permanent(err)) => return Err(err),
                Err(SendError::Retryable(err)) if attempt >= attempts => {
                    return Err(err.context(format!("giving up after {attempts} attempts")));
                }
                Err(SendError::Retryable(err)) => {
                    tracing::warn!(attempt, error = %err, "SMS send failed (will retry)");
                    tokio::time::sleep(self.config.retry_pause).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service(server: &MockServer) -> TextBeeService {
        let mut config = TextBeeConfig::new("secret-key", "device-1").unwrap();
        config.base_url = url::Url::parse(&format!("{}/api/v1/", server.uri())).unwrap();
        config.retry_pause = Duration::ZERO;
        TextBeeService::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_send_formats_phone_and_parses_receipt() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/gateway/devices/device-1/send-sms"))
            .and(header("x-api-key", "secret-key"))
            .and(body_json(serde_json::json!({
                "recipients": ["+33612345678"],
                "message": "Rappel: entretien",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": {
                    "success": true,
                    "message": "SMS added to queue for processing",
                    "smsBatchId": "batch-42",
                    "recipientCount": 1,
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = service(&server)
            .await
            .send_sms("06 12 34 56 78", "Rappel: entretien")
            .await
            .unwrap();

        assert_eq!(
            receipt,
            SmsReceipt {
                phone: "+33612345678".to_string(),
                batch_id: Some("batch-42".to_string()),
                recipient_count: Some(1),
            }
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = service(&server)
            .await
            .send_sms("+14155552671", "hello")
            .await
            .unwrap();
        assert_eq!(receipt.batch_id, None);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(3)
            .mount(&server)
            .await;

        let err = service(&server)
            .await
            .send_sms("+14155552671", "hello")
            .await
            .unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "giving up after 3 attempts: gateway responded 429 Too Many Requests: slow down"
        );
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad api key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = service(&server)
            .await
            .send_sms("+14155552671", "hello")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "gateway responded 401 Unauthorized: bad api key"
        );
    }

    #[tokio::test]
    async fn test_rejected_by_gateway_and_invalid_phone() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"success": false, "message": "device offline"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server).await;

        let err = service.send_sms("+14155552671", "hello").await.unwrap_err();
        assert_eq!(err.to_string(), "gateway rejected the message: device offline");

        let err = service.send_sms("not a phone", "hello").await.unwrap_err();
        assert!(err.downcast_ref::<crate::PhoneError>().is_some());
    }
}
