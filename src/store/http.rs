//! REST client for the State Store.

use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::state::{
    buzzer::BuzzerSignal,
    call_line::CallLine,
    chat::ChatMessage,
    studio::{BuzzerDirection, StudioId},
};

use super::{
    StateStore,
    error::{StoreError, StoreResult},
};

/// Runtime configuration describing how to reach the State Store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the REST surface, without a trailing slash.
    pub base_url: String,
    /// Optional basic-auth username.
    pub username: Option<String>,
    /// Optional basic-auth password.
    pub password: Option<String>,
}

impl StoreConfig {
    /// Construct a configuration from an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
        }
    }

    /// Attach basic-auth credentials to the configuration.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Build a configuration by reading the expected environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let base_url = std::env::var("STORE_BASE_URL").map_err(|_| StoreError::MissingEnvVar {
            var: "STORE_BASE_URL",
        })?;

        let mut config = Self::new(base_url);

        if let (Some(username), Some(password)) = (
            std::env::var("STORE_USERNAME").ok(),
            std::env::var("STORE_PASSWORD").ok(),
        ) {
            config = config.with_credentials(username, password);
        }

        Ok(config)
    }
}

/// [`StateStore`] implementation over the store's REST endpoints.
#[derive(Clone)]
pub struct HttpStateStore {
    client: Client,
    base_url: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl HttpStateStore {
    /// Build the HTTP client for the given configuration.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| StoreError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn get_json<T>(&self, path: &str) -> StoreResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|source| StoreError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
            status if status.is_success() => {
                response
                    .json::<T>()
                    .await
                    .map_err(|source| StoreError::DecodeResponse {
                        path: path.to_string(),
                        source,
                    })
            }
            other => Err(StoreError::RequestStatus {
                path: path.to_string(),
                status: other,
            }),
        }
    }

    async fn send_json<T>(&self, method: Method, path: &str, body: &T) -> StoreResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(method, path)
            .json(body)
            .send()
            .await
            .map_err(|source| StoreError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::RequestStatus {
                path: path.to_string(),
                status,
            })
        }
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let response = self.request(Method::DELETE, path).send().await.map_err(
            |source| StoreError::RequestSend {
                path: path.to_string(),
                source,
            },
        )?;

        let status = response.status();
        // A vanished log is as deleted as it gets.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(StoreError::RequestStatus {
                path: path.to_string(),
                status,
            })
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuzzerWrite {
    active: bool,
}

fn buzzer_path(studio: &StudioId, direction: BuzzerDirection) -> String {
    let leg = match direction {
        BuzzerDirection::ProducerToTalent => "producer-to-talent",
        BuzzerDirection::TalentToProducer => "talent-to-producer",
    };
    format!("studios/{studio}/buzzer/{leg}")
}

impl StateStore for HttpStateStore {
    fn fetch_buzzer(
        &self,
        studio: StudioId,
        direction: BuzzerDirection,
    ) -> BoxFuture<'static, StoreResult<BuzzerSignal>> {
        let store = self.clone();
        Box::pin(async move {
            let path = buzzer_path(&studio, direction);
            match store.get_json::<BuzzerSignal>(&path).await {
                // An unwritten slot reads as the resting signal.
                Err(StoreError::NotFound { .. }) => Ok(BuzzerSignal::inactive(studio, direction)),
                other => other,
            }
        })
    }

    fn fetch_lines(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<Vec<CallLine>>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("studios/{studio}/lines");
            store.get_json::<Vec<CallLine>>(&path).await
        })
    }

    fn fetch_chat(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<Vec<ChatMessage>>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("studios/{studio}/chat");
            store.get_json::<Vec<ChatMessage>>(&path).await
        })
    }

    fn write_buzzer(
        &self,
        studio: StudioId,
        direction: BuzzerDirection,
        active: bool,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let path = buzzer_path(&studio, direction);
            store
                .send_json(Method::PUT, &path, &BuzzerWrite { active })
                .await
        })
    }

    fn write_line(&self, snapshot: CallLine) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("studios/{}/lines/{}", snapshot.studio, snapshot.line);
            store.send_json(Method::PUT, &path, &snapshot).await
        })
    }

    fn append_chat(&self, message: ChatMessage) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("studios/{}/chat", message.studio);
            store.send_json(Method::POST, &path, &message).await
        })
    }

    fn clear_chat(&self, studio: StudioId) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("studios/{studio}/chat");
            store.delete(&path).await
        })
    }
}
