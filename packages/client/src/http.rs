use std::sync::LazyLock;

use renderbox_models::api::{
    HistoryResponse, ModelFile, ModelFolder, PromptResponse, QueueResponse, QueueStatus, RawLogs,
    Settings, SystemStats, UserConfig, UserDataFullInfo,
};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};
use thiserror::Error;

use crate::ApiClient;

static USER_HEADER_NAME: &str = "RenderBox-User";

static CLIENT: LazyLock<reqwest::Client> =
    LazyLock::new(|| reqwest::Client::builder().build().unwrap());

/// Model folder names the engine exposes that are not browsable model
/// categories.
const MODEL_FOLDER_BLACKLIST: &[&str] = &["configs", "custom_nodes"];

#[derive(Clone, Copy)]
enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

/// Server-side item collections that share the clear/delete endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ItemKind {
    Queue,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreUserDataOptions {
    pub overwrite: bool,
    pub full_info: bool,
}

impl Default for StoreUserDataOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            full_info: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Request failed (error {0})")]
    RequestFailed(u16, String),
    #[error("No response body")]
    NoResponseBody,
}

#[derive(Debug, Error)]
pub enum QueuePromptError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("Prompt rejected: {error}")]
    Rejected { error: Value, node_errors: Value },
}

fn base_request(method: Method, url: &str, user: Option<&str>) -> reqwest::RequestBuilder {
    let mut request = match method {
        Method::Get => CLIENT.get(url),
        Method::Post => CLIENT.post(url),
        Method::Patch => CLIENT.patch(url),
        Method::Delete => CLIENT.delete(url),
    }
    .header(reqwest::header::CACHE_CONTROL, "no-cache");

    if let Some(user) = user {
        request = request.header(USER_HEADER_NAME, user);
    }

    request
}

async fn api_request_inner(
    method: Method,
    url: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> Result<Option<Value>, ApiError> {
    log::debug!("Making api request to {url}");

    let mut request = base_request(method, url, user);

    if let Some(body) = &body {
        request = request.json(body);
    }

    let response = request.send().await?;

    let status: u16 = response.status().into();

    log::debug!("Received api response status: {status}");

    match status {
        401 => Err(ApiError::Unauthorized),
        400..=599 => Err(ApiError::RequestFailed(
            status,
            response.text().await.unwrap_or_else(|_| String::new()),
        )),
        _ => match response.json::<Value>().await {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                log::debug!("JSON response error: {err:?}");
                if err.is_decode() {
                    Ok(None)
                } else {
                    Err(ApiError::Reqwest(err))
                }
            }
        },
    }
}

async fn api_request(
    method: Method,
    url: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> Result<Value, ApiError> {
    api_request_inner(method, url, user, body)
        .await?
        .ok_or(ApiError::NoResponseBody)
}

/// Fetches the current queue status summary, shared between the public
/// client surface and the polling fallback.
pub(crate) async fn fetch_queue_status(
    url: &str,
    user: Option<&str>,
) -> Result<QueueStatus, ApiError> {
    let value = api_request(Method::Get, url, user, None).await?;
    Ok(serde_json::from_value(value)?)
}

fn queue_prompt_body(number: i64, client_id: Option<String>, prompt: Value, workflow: Value) -> Value {
    let mut body = serde_json::Map::new();

    if let Some(client_id) = client_id {
        body.insert("client_id".to_string(), Value::String(client_id));
    }

    body.insert("prompt".to_string(), prompt);
    body.insert(
        "extra_data".to_string(),
        serde_json::json!({ "extra_pnginfo": { "workflow": workflow } }),
    );

    if number == -1 {
        body.insert("front".to_string(), Value::Bool(true));
    } else if number != 0 {
        body.insert("number".to_string(), serde_json::json!(number));
    }

    Value::Object(body)
}

fn filter_model_folders(folders: Vec<ModelFolder>) -> Vec<ModelFolder> {
    folders
        .into_iter()
        .filter(|folder| !MODEL_FOLDER_BLACKLIST.contains(&folder.name.as_str()))
        .collect()
}

impl ApiClient {
    /// Fetches the queue status summary the server also pushes over the
    /// realtime channel.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a valid status
    pub async fn get_prompt_status(&self) -> Result<QueueStatus, ApiError> {
        fetch_queue_status(&self.config().api_url("/prompt"), self.config().user()).await
    }

    /// Submits a prompt graph for execution.
    ///
    /// `number` selects the queue position: `-1` front-loads the prompt,
    /// `0` appends it, and any other value requests that explicit
    /// position.
    ///
    /// # Errors
    ///
    /// * If the request fails
    /// * If the engine rejects the prompt, with the engine's error report
    ///   attached
    pub async fn queue_prompt(
        &self,
        number: i64,
        prompt: Value,
        workflow: Value,
    ) -> Result<PromptResponse, QueuePromptError> {
        let url = self.config().api_url("/prompt");

        log::debug!("queue_prompt: number={number} url={url}");

        let body = queue_prompt_body(number, self.client_id(), prompt, workflow);

        let response = base_request(Method::Post, &url, self.config().user())
            .json(&body)
            .send()
            .await?;

        let status: u16 = response.status().into();

        if status == 401 {
            return Err(ApiError::Unauthorized.into());
        }
        if !(200..=299).contains(&status) {
            let text = response.text().await.unwrap_or_else(|_| String::new());

            return Err(serde_json::from_str::<Value>(&text).map_or_else(
                |_| ApiError::RequestFailed(status, text.clone()).into(),
                |value| QueuePromptError::Rejected {
                    error: value.get("error").cloned().unwrap_or(Value::Null),
                    node_errors: value.get("node_errors").cloned().unwrap_or(Value::Null),
                },
            ));
        }

        Ok(response.json().await?)
    }

    /// Fetches the running and pending queue entries.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a valid queue listing
    pub async fn get_queue(&self) -> Result<QueueResponse, ApiError> {
        let value = api_request(
            Method::Get,
            &self.config().api_url("/queue"),
            self.config().user(),
            None,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Fetches up to `max_items` of per-prompt execution history, keyed
    /// by prompt id.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a valid history map
    pub async fn get_history(&self, max_items: u32) -> Result<HistoryResponse, ApiError> {
        let value = api_request(
            Method::Get,
            &self
                .config()
                .api_url(&format!("/history?max_items={max_items}")),
            self.config().user(),
            None,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Clears every item in the given collection.
    ///
    /// # Errors
    ///
    /// * If the request fails
    pub async fn clear_items(&self, kind: ItemKind) -> Result<(), ApiError> {
        log::debug!("clear_items: kind={}", kind.as_ref());

        api_request_inner(
            Method::Post,
            &self.config().api_url(&format!("/{}", kind.as_ref())),
            self.config().user(),
            Some(serde_json::json!({ "clear": true })),
        )
        .await?;

        Ok(())
    }

    /// Deletes items from the given collection by prompt id.
    ///
    /// # Errors
    ///
    /// * If the request fails
    pub async fn delete_items(&self, kind: ItemKind, ids: &[&str]) -> Result<(), ApiError> {
        log::debug!("delete_items: kind={} ids={ids:?}", kind.as_ref());

        api_request_inner(
            Method::Post,
            &self.config().api_url(&format!("/{}", kind.as_ref())),
            self.config().user(),
            Some(serde_json::json!({ "delete": ids })),
        )
        .await?;

        Ok(())
    }

    /// Interrupts the running prompt. Passing a prompt id restricts the
    /// interrupt to that prompt.
    ///
    /// # Errors
    ///
    /// * If the request fails
    pub async fn interrupt(&self, prompt_id: Option<&str>) -> Result<(), ApiError> {
        log::debug!("interrupt: prompt_id={prompt_id:?}");

        api_request_inner(
            Method::Post,
            &self.config().api_url("/interrupt"),
            self.config().user(),
            Some(serde_json::json!({ "prompt_id": prompt_id })),
        )
        .await?;

        Ok(())
    }

    /// Fetches host and device utilization details.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a valid stats report
    pub async fn get_system_stats(&self) -> Result<SystemStats, ApiError> {
        let value = api_request(
            Method::Get,
            &self.config().api_url("/system_stats"),
            self.config().user(),
            None,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Fetches the names of the available embeddings.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a list of names
    pub async fn get_embeddings(&self) -> Result<Vec<String>, ApiError> {
        let value = api_request(
            Method::Get,
            &self.config().api_url("/embeddings"),
            self.config().user(),
            None,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Fetches the browsable model folder categories.
    ///
    /// Folders that exist on disk but are not model categories are
    /// filtered out. A server without the models endpoint yields an
    /// empty list.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a folder listing
    pub async fn get_model_folders(&self) -> Result<Vec<ModelFolder>, ApiError> {
        match api_request(
            Method::Get,
            &self.config().api_url("/experiment/models"),
            self.config().user(),
            None,
        )
        .await
        {
            Ok(value) => Ok(filter_model_folders(serde_json::from_value(value)?)),
            Err(ApiError::RequestFailed(404, _)) => Ok(vec![]),
            Err(err) => Err(err),
        }
    }

    /// Fetches the model files inside one folder category.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a file listing
    pub async fn get_models(&self, folder: &str) -> Result<Vec<ModelFile>, ApiError> {
        let value = api_request(
            Method::Get,
            &self.config().api_url(&format!(
                "/experiment/models/{}",
                urlencoding::encode(folder)
            )),
            self.config().user(),
            None,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Fetches every stored setting for the active user.
    ///
    /// # Errors
    ///
    /// * If the caller is unauthorized
    /// * If the request fails or the response is not a settings map
    pub async fn get_settings(&self) -> Result<Settings, ApiError> {
        let value = api_request(
            Method::Get,
            &self.config().api_url("/settings"),
            self.config().user(),
            None,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Fetches a single setting by id.
    ///
    /// # Errors
    ///
    /// * If the request fails
    pub async fn get_setting(&self, id: &str) -> Result<Value, ApiError> {
        api_request(
            Method::Get,
            &self
                .config()
                .api_url(&format!("/settings/{}", urlencoding::encode(id))),
            self.config().user(),
            None,
        )
        .await
    }

    /// Replaces the stored settings with `settings`.
    ///
    /// # Errors
    ///
    /// * If the request fails
    pub async fn store_settings(&self, settings: &Settings) -> Result<(), ApiError> {
        api_request_inner(
            Method::Post,
            &self.config().api_url("/settings"),
            self.config().user(),
            Some(serde_json::to_value(settings)?),
        )
        .await?;

        Ok(())
    }

    /// Stores a single setting by id.
    ///
    /// # Errors
    ///
    /// * If the request fails
    pub async fn store_setting(&self, id: &str, value: &Value) -> Result<(), ApiError> {
        api_request_inner(
            Method::Post,
            &self
                .config()
                .api_url(&format!("/settings/{}", urlencoding::encode(id))),
            self.config().user(),
            Some(value.clone()),
        )
        .await?;

        Ok(())
    }

    /// Fetches the contents of a stored userdata file, or `None` when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// * If the caller is unauthorized
    /// * If the request fails
    pub async fn get_user_data(&self, file: &str) -> Result<Option<String>, ApiError> {
        let url = self
            .config()
            .api_url(&format!("/userdata/{}", urlencoding::encode(file)));

        log::debug!("get_user_data: url={url}");

        let response = base_request(Method::Get, &url, self.config().user())
            .send()
            .await?;

        let status: u16 = response.status().into();

        match status {
            404 => Ok(None),
            401 => Err(ApiError::Unauthorized),
            400..=599 => Err(ApiError::RequestFailed(
                status,
                response.text().await.unwrap_or_else(|_| String::new()),
            )),
            _ => Ok(Some(response.text().await?)),
        }
    }

    /// Stores `contents` as a userdata file.
    ///
    /// The response carries the stored path, or the full file info when
    /// `options.full_info` is set. With `options.overwrite` unset the
    /// server refuses to replace an existing file and the refusal
    /// surfaces as a request failure carrying status 409.
    ///
    /// # Errors
    ///
    /// * If the caller is unauthorized
    /// * If the request fails or the file already exists and `overwrite`
    ///   is unset
    pub async fn store_user_data(
        &self,
        file: &str,
        contents: String,
        options: &StoreUserDataOptions,
    ) -> Result<Value, ApiError> {
        let url = self.config().api_url(&format!(
            "/userdata/{}?overwrite={}&full_info={}",
            urlencoding::encode(file),
            options.overwrite,
            options.full_info,
        ));

        log::debug!("store_user_data: url={url}");

        let response = base_request(Method::Post, &url, self.config().user())
            .body(contents)
            .send()
            .await?;

        let status: u16 = response.status().into();

        match status {
            401 => Err(ApiError::Unauthorized),
            400..=599 => Err(ApiError::RequestFailed(
                status,
                response.text().await.unwrap_or_else(|_| String::new()),
            )),
            _ => Ok(response.json().await?),
        }
    }

    /// Deletes a stored userdata file.
    ///
    /// # Errors
    ///
    /// * If the caller is unauthorized
    /// * If the request fails
    pub async fn delete_user_data(&self, file: &str) -> Result<(), ApiError> {
        let url = self
            .config()
            .api_url(&format!("/userdata/{}", urlencoding::encode(file)));

        log::debug!("delete_user_data: url={url}");

        let response = base_request(Method::Delete, &url, self.config().user())
            .send()
            .await?;

        let status: u16 = response.status().into();

        match status {
            204 => Ok(()),
            401 => Err(ApiError::Unauthorized),
            _ => Err(ApiError::RequestFailed(
                status,
                response.text().await.unwrap_or_else(|_| String::new()),
            )),
        }
    }

    /// Moves or renames a stored userdata file.
    ///
    /// # Errors
    ///
    /// * If the caller is unauthorized
    /// * If the request fails or the destination exists and `overwrite`
    ///   is unset
    pub async fn move_user_data(
        &self,
        source: &str,
        dest: &str,
        overwrite: bool,
    ) -> Result<Value, ApiError> {
        let url = self.config().api_url(&format!(
            "/userdata/{}/move/{}?overwrite={overwrite}",
            urlencoding::encode(source),
            urlencoding::encode(dest),
        ));

        log::debug!("move_user_data: url={url}");

        api_request(Method::Post, &url, self.config().user(), None).await
    }

    /// Lists the userdata files under `dir` recursively, with their
    /// sizes and modification times. A missing directory yields an empty
    /// list.
    ///
    /// # Errors
    ///
    /// * If the caller is unauthorized
    /// * If the request fails or the response is not a file listing
    pub async fn list_user_data_full_info(
        &self,
        dir: &str,
    ) -> Result<Vec<UserDataFullInfo>, ApiError> {
        let url = self.config().api_url(&format!(
            "/userdata?dir={}&recurse=true&split=false&full_info=true",
            urlencoding::encode(dir),
        ));

        match api_request(Method::Get, &url, self.config().user(), None).await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(ApiError::RequestFailed(404, _)) => Ok(vec![]),
            Err(err) => Err(err),
        }
    }

    /// Fetches the server's multi-user storage configuration.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a valid user config
    pub async fn get_user_config(&self) -> Result<UserConfig, ApiError> {
        let value = api_request(
            Method::Get,
            &self.config().api_url("/users"),
            self.config().user(),
            None,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Creates a new user and returns its id.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a user id
    pub async fn create_user(&self, username: &str) -> Result<String, ApiError> {
        log::debug!("create_user: username={username}");

        let value = api_request(
            Method::Post,
            &self.config().api_url("/users"),
            self.config().user(),
            Some(serde_json::json!({ "username": username })),
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Fetches the server's buffered terminal log output.
    ///
    /// # Errors
    ///
    /// * If the request fails or the response is not a log report
    pub async fn get_raw_logs(&self) -> Result<RawLogs, ApiError> {
        let value = api_request(
            Method::Get,
            &self.config().internal_url("/logs/raw"),
            self.config().user(),
            None,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Subscribes or unsubscribes this client from streamed `logs`
    /// events on the realtime channel.
    ///
    /// # Errors
    ///
    /// * If the request fails
    pub async fn subscribe_logs(&self, enabled: bool) -> Result<(), ApiError> {
        let client_id = self.client_id_or_init();

        log::debug!("subscribe_logs: enabled={enabled} client_id={client_id}");

        api_request_inner(
            Method::Patch,
            &self.config().internal_url("/logs/subscribe"),
            self.config().user(),
            Some(serde_json::json!({ "enabled": enabled, "clientId": client_id })),
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr as _;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    use crate::ClientConfig;

    use super::*;

    /// Serves the same raw HTTP response to every connection and returns a
    /// client pointed at it.
    async fn client_against_canned(response: &'static str) -> ApiClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = [0_u8; 1024];
                let _ = stream.read(&mut request).await;
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        ApiClient::new(ClientConfig::new(addr.to_string()))
    }

    #[test_log::test]
    fn queue_prompt_body_appends_by_default() {
        let body = queue_prompt_body(0, None, json!({"1": {}}), json!({"nodes": []}));

        assert_eq!(
            body,
            json!({
                "prompt": {"1": {}},
                "extra_data": { "extra_pnginfo": { "workflow": {"nodes": []} } },
            })
        );
    }

    #[test_log::test]
    fn queue_prompt_body_front_loads_for_negative_one() {
        let body = queue_prompt_body(-1, Some("abc".to_string()), json!({}), json!({}));

        assert_eq!(
            body,
            json!({
                "client_id": "abc",
                "prompt": {},
                "extra_data": { "extra_pnginfo": { "workflow": {} } },
                "front": true,
            })
        );
    }

    #[test_log::test]
    fn queue_prompt_body_carries_explicit_position() {
        let body = queue_prompt_body(7, None, json!({}), json!({}));

        assert_eq!(body.get("front"), None);
        assert_eq!(body.get("number"), Some(&json!(7)));
    }

    #[test_log::test]
    fn filters_non_model_folders() {
        let folders: Vec<ModelFolder> = serde_json::from_value(json!([
            { "name": "checkpoints", "folders": ["/models/checkpoints"] },
            { "name": "configs", "folders": ["/models/configs"] },
            { "name": "custom_nodes", "folders": ["/custom_nodes"] },
            { "name": "loras", "folders": ["/models/loras"] },
        ]))
        .unwrap();

        let filtered = filter_model_folders(folders);

        assert_eq!(
            filtered.iter().map(|x| x.name.as_str()).collect::<Vec<_>>(),
            vec!["checkpoints", "loras"]
        );
    }

    #[test_log::test]
    fn item_kind_matches_endpoint_names() {
        assert_eq!(ItemKind::Queue.as_ref(), "queue");
        assert_eq!(ItemKind::History.as_ref(), "history");
        assert_eq!(ItemKind::from_str("history").unwrap(), ItemKind::History);
    }

    #[test_log::test(tokio::test)]
    async fn unauthorized_responses_surface_as_unauthorized() {
        let client = client_against_canned(
            "HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        assert!(matches!(
            client.get_settings().await,
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            client.get_user_data("file.json").await,
            Err(ApiError::Unauthorized)
        ));
    }

    #[test_log::test(tokio::test)]
    async fn absent_resources_read_as_empty_or_none() {
        let client = client_against_canned(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        assert_eq!(client.get_user_data("missing.json").await.unwrap(), None);
        assert_eq!(client.get_model_folders().await.unwrap(), vec![]);
        assert_eq!(
            client.list_user_data_full_info("workflows").await.unwrap(),
            vec![]
        );

        // Anywhere else a 404 is an ordinary request failure.
        let result = client.get_queue().await;
        let Err(ApiError::RequestFailed(404, _)) = result else {
            panic!("expected request failure, got {result:?}");
        };
    }

    #[test_log::test(tokio::test)]
    async fn other_failures_carry_status_and_body() {
        let client = client_against_canned(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-type: text/plain\r\ncontent-length: 15\r\nconnection: close\r\n\r\nengine on fire!",
        )
        .await;

        let result = client.get_system_stats().await;

        let Err(ApiError::RequestFailed(status, body)) = result else {
            panic!("expected request failure, got {result:?}");
        };
        assert_eq!(status, 500);
        assert_eq!(body, "engine on fire!");
    }

    #[test_log::test]
    fn store_user_data_defaults_overwrite() {
        let options = StoreUserDataOptions::default();

        assert!(options.overwrite);
        assert!(!options.full_info);
    }
}
