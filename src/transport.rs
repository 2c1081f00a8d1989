//! HTTP-транспорт для fetch-юнитов
//!
//! Клиент создаётся один раз на процесс и переиспользуется всеми юнитами:
//! пул соединений живёт внутри `reqwest::Client`. Создание клиента на каждый
//! запрос под нагрузкой исчерпывает сокеты ОС.

use super::{errors::FetchError, pool::Config};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// GET по адресу, возвращает тело ответа целиком
    async fn get(&self, url: &str) -> Result<String, FetchError>;
}

pub type SharedTransport = Arc<dyn Transport>;

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    pub fn shared(config: &Config) -> Result<SharedTransport, reqwest::Error> {
        Ok(Arc::new(Self::new(config)?))
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }
}
