use async_trait::async_trait;
use futures::{future, StreamExt};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::Address,
    error::{ApiError, ErrorCode},
    protocol::{
        BlockNumberResponse, BlockTag, CallRequest, CallResponse, CallValue, EventKind,
        LedgerEvent, RemoteMethod, SendRequest, TxReceipt,
    },
};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{HistoryFetchError, RemoteCallError, RemoteSubmitError, SubscriptionError},
    gateway::{EventSubscription, RemoteGateway},
};

#[derive(Debug, Error)]
pub enum GatewayConfigError {
    #[error("invalid gateway url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("gateway url must start with http:// or https://, got '{0}'")]
    UnsupportedScheme(String),
}

/// Failure talking to the bridge, before it is attributed to a call, send or query.
#[derive(Debug)]
enum BridgeFailure {
    Transport(String),
    Api(ApiError),
}

impl BridgeFailure {
    fn message(&self) -> String {
        match self {
            BridgeFailure::Transport(message) => message.clone(),
            BridgeFailure::Api(api) => format!("{:?}: {}", api.code, api.message),
        }
    }
}

impl From<reqwest::Error> for BridgeFailure {
    fn from(value: reqwest::Error) -> Self {
        BridgeFailure::Transport(value.to_string())
    }
}

/// [`RemoteGateway`] speaking JSON to a ledger bridge over HTTP, with a WebSocket
/// feed per subscribed event kind.
pub struct HttpGateway {
    http: Client,
    base_url: String,
    ws_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Result<Self, GatewayConfigError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        Url::parse(trimmed).map_err(|source| GatewayConfigError::InvalidUrl {
            url: trimmed.to_string(),
            source,
        })?;

        let ws_url = if trimmed.starts_with("https://") {
            trimmed.replacen("https://", "wss://", 1)
        } else if trimmed.starts_with("http://") {
            trimmed.replacen("http://", "ws://", 1)
        } else {
            return Err(GatewayConfigError::UnsupportedScheme(trimmed.to_string()));
        };

        Ok(Self {
            http: Client::new(),
            base_url: trimmed.to_string(),
            ws_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BridgeFailure> {
        let res = self
            .http
            .get(format!("{}/{path}", self.base_url))
            .query(query)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BridgeFailure> {
        let res = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, BridgeFailure> {
        if res.status().is_success() {
            return Ok(res.json::<T>().await?);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiError>(&body) {
            Ok(api) => Err(BridgeFailure::Api(api)),
            Err(_) => Err(BridgeFailure::Transport(format!(
                "bridge responded {status}: {body}"
            ))),
        }
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn block_number(&self) -> Result<u64, RemoteCallError> {
        self.get_json::<BlockNumberResponse>("block_number", &[])
            .await
            .map(|body| body.block_number)
            .map_err(|failure| RemoteCallError::Transport {
                method: "blockNumber",
                message: failure.message(),
            })
    }

    async fn call(
        &self,
        method: RemoteMethod,
        caller: &Address,
        at: BlockTag,
    ) -> Result<CallValue, RemoteCallError> {
        let name = method.name();
        let request = CallRequest {
            method,
            from: caller.clone(),
            block: at,
        };
        match self.post_json::<_, CallResponse>("call", &request).await {
            Ok(body) => Ok(body.value),
            Err(BridgeFailure::Api(api)) if matches!(api.code, ErrorCode::Reverted) => {
                Err(RemoteCallError::Reverted {
                    method: name,
                    reason: api.message,
                })
            }
            Err(failure) => Err(RemoteCallError::Transport {
                method: name,
                message: failure.message(),
            }),
        }
    }

    async fn send(
        &self,
        method: RemoteMethod,
        caller: &Address,
    ) -> Result<TxReceipt, RemoteSubmitError> {
        let name = method.name();
        let request = SendRequest {
            method,
            from: caller.clone(),
        };
        match self.post_json::<_, TxReceipt>("send", &request).await {
            Ok(receipt) if receipt.status => Ok(receipt),
            Ok(receipt) => Err(RemoteSubmitError::Rejected {
                method: name,
                reason: format!("transaction {} failed", receipt.tx_hash),
            }),
            Err(BridgeFailure::Api(api))
                if matches!(api.code, ErrorCode::Reverted | ErrorCode::Validation) =>
            {
                Err(RemoteSubmitError::Rejected {
                    method: name,
                    reason: api.message,
                })
            }
            Err(failure) => Err(RemoteSubmitError::Transport {
                method: name,
                message: failure.message(),
            }),
        }
    }

    async fn past_events(
        &self,
        kind: EventKind,
        from: BlockTag,
        to: BlockTag,
    ) -> Result<Vec<LedgerEvent>, HistoryFetchError> {
        let path = format!("events/{}", kind.as_str());
        let query = [("from_block", from.to_string()), ("to_block", to.to_string())];
        self.get_json::<Vec<LedgerEvent>>(&path, &query)
            .await
            .map_err(|failure| HistoryFetchError {
                kind,
                message: failure.message(),
            })
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        from: BlockTag,
    ) -> Result<EventSubscription, SubscriptionError> {
        let ws_url = format!(
            "{}/subscribe?event={}&from_block={}",
            self.ws_url,
            kind.as_str(),
            from
        );
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|err| SubscriptionError::Open {
                kind,
                message: format!("failed to connect websocket {ws_url}: {err}"),
            })?;
        debug!(kind = %kind, url = %ws_url, "gateway: subscription opened");

        let (_, ws_reader) = ws_stream.split();
        let events = ws_reader
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(move |msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(
                        serde_json::from_str::<LedgerEvent>(&text).map_err(|err| {
                            SubscriptionError::Decode {
                                kind,
                                message: err.to_string(),
                            }
                        }),
                    ),
                    Ok(_) => None,
                    Err(err) => {
                        warn!(kind = %kind, error = %err, "gateway: websocket receive failed");
                        Some(Err(SubscriptionError::Transport {
                            kind,
                            message: err.to_string(),
                        }))
                    }
                })
            });

        Ok(EventSubscription::new(kind, events)
            .with_teardown(move || debug!(kind = %kind, "gateway: subscription closed")))
    }
}

#[cfg(test)]
#[path = "tests/http_gateway_tests.rs"]
mod tests;
