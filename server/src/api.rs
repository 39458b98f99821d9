//! HTTP client for the remote CRM API.

use std::time::Duration;

use async_trait::async_trait;
use badger_engine::error::ApiResult;
use badger_engine::record::record_id;
use badger_engine::{ApiError, Entity, FieldMap, Record, RemoteApi};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;

pub const DEFAULT_API_URL: &str = "https://badgerapis.badgermapping.com/api/2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Token-authenticated client speaking the remote's REST endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, entity: Entity) -> String {
        let path = match entity {
            Entity::Accounts => "customers/",
            Entity::Checkins => "appointments/",
            Entity::Routes => "routes/",
            Entity::Profile => "profiles/",
        };
        format!("{}/{path}", self.base_url)
    }

    fn item_url(&self, entity: Entity, id: i64) -> Result<String, ApiError> {
        match entity {
            Entity::Accounts => Ok(format!("{}/customers/{id}/", self.base_url)),
            Entity::Checkins => Ok(format!("{}/appointments/{id}", self.base_url)),
            Entity::Routes => Ok(format!("{}/routes/{id}/", self.base_url)),
            Entity::Profile => Err(ApiError::transport(
                "the user profile is not addressed by id",
            )),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Token {}", self.api_key))
    }

    /// Send a request and return the body if the status is one of `expected`.
    async fn send(&self, request: RequestBuilder, expected: &[StatusCode]) -> ApiResult<String> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(format!("failed to read response body: {e}")))?;

        if !expected.contains(&status) {
            return Err(ApiError::status(status.as_u16(), "unexpected status", &body));
        }
        Ok(body)
    }

    async fn json(&self, request: RequestBuilder, expected: StatusCode) -> ApiResult<Value> {
        let body = self.send(request, &[expected]).await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError {
            status: Some(expected.as_u16()),
            message: format!("failed to decode response: {e}"),
            preview: Some(badger_engine::error::preview(
                &body,
                badger_engine::error::RESPONSE_PREVIEW_LIMIT,
            )),
        })
    }

    async fn list(&self, url: &str) -> ApiResult<Vec<Record>> {
        match self.json(self.request(Method::GET, url), StatusCode::OK).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(ApiError {
                status: Some(StatusCode::OK.as_u16()),
                message: "expected a JSON array".into(),
                preview: Some(badger_engine::error::preview(
                    &other.to_string(),
                    badger_engine::error::RESPONSE_PREVIEW_LIMIT,
                )),
            }),
        }
    }
}

#[async_trait]
impl RemoteApi for ApiClient {
    async fn list_ids(&self, entity: Entity) -> ApiResult<Vec<i64>> {
        let url = self.collection_url(entity);
        let items = self.list(&url).await?;
        Ok(items.iter().filter_map(record_id).collect())
    }

    async fn get_detail(&self, entity: Entity, id: i64) -> ApiResult<Record> {
        let url = self.item_url(entity, id)?;
        self.json(self.request(Method::GET, &url), StatusCode::OK).await
    }

    async fn list_checkins_for_account(&self, account_id: i64) -> ApiResult<Vec<Record>> {
        let url = format!("{}/appointments/?customer_id={account_id}", self.base_url);
        self.list(&url).await
    }

    async fn list_routes(&self) -> ApiResult<Vec<Record>> {
        let url = self.collection_url(Entity::Routes);
        self.list(&url).await
    }

    async fn get_profile(&self) -> ApiResult<Record> {
        let url = self.collection_url(Entity::Profile);
        self.json(self.request(Method::GET, &url), StatusCode::OK).await
    }

    async fn create(&self, entity: Entity, fields: &FieldMap) -> ApiResult<Record> {
        let url = self.collection_url(entity);
        let request = self.request(Method::POST, &url).form(fields);
        self.json(request, StatusCode::CREATED).await
    }

    async fn update(&self, entity: Entity, id: i64, fields: &FieldMap) -> ApiResult<Record> {
        let url = self.item_url(entity, id)?;
        let request = self.request(Method::PATCH, &url).form(fields);
        self.json(request, StatusCode::OK).await
    }

    async fn delete(&self, entity: Entity, id: i64) -> ApiResult<()> {
        let url = self.item_url(entity, id)?;
        self.send(
            self.request(Method::DELETE, &url),
            &[StatusCode::OK, StatusCode::NO_CONTENT],
        )
        .await?;
        Ok(())
    }

    async fn get_raw(&self, endpoint: &str) -> ApiResult<String> {
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        };
        self.send(self.request(Method::GET, &url), &[StatusCode::OK])
            .await
    }
}
