//! HTTP implementation of the [Client](immigrate_shared::Client) trait, talking to an Immich server's REST API

#![deny(warnings)]

use {
    anyhow::{anyhow, Result},
    async_trait::async_trait,
    futures::{
        stream::{self, BoxStream},
        StreamExt, TryStreamExt,
    },
    immigrate_shared::{
        Album, AssetQuery, AssetStatistics, Client, ClientError, ServerAsset, SupportedMedia, Tag,
        UpdateResult, UploadRequest, UploadResponse, User,
    },
    reqwest::{
        multipart::{Form, Part},
        Body, Method, RequestBuilder, Response,
    },
    serde::de::DeserializeOwned,
    serde_derive::{Deserialize, Serialize},
    std::{path::Path, time::Duration},
    tokio_util::io::ReaderStream,
    tracing::debug,
};

/// Error code the server reports for an asset which was already part of an album or already tagged
const DUPLICATE: &str = "duplicate";

#[derive(Deserialize, Debug)]
struct Pong {
    res: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    items: Vec<ServerAsset>,
    next_page: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    assets: SearchPage,
}

#[derive(Deserialize, Debug)]
struct AssetId {
    id: String,
}

#[derive(Deserialize, Debug)]
struct AlbumAssets {
    #[serde(default)]
    assets: Vec<AssetId>,
}

#[derive(Serialize, Debug)]
struct Ids<'a> {
    ids: &'a [String],
}

#[derive(Serialize, Debug)]
struct DeleteAssets<'a> {
    ids: &'a [String],
    force: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreateAlbum<'a> {
    album_name: &'a str,
    description: &'a str,
    asset_ids: &'a [String],
}

#[derive(Serialize, Debug)]
struct UpsertTags<'a> {
    tags: &'a [String],
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreateStack<'a> {
    asset_ids: &'a [String],
}

#[derive(Deserialize, Debug)]
struct ServerMessage {
    message: Option<serde_json::Value>,
    error: Option<String>,
}

/// Connection to an Immich server
///
/// Every call carries the API key in the `x-api-key` header.  API calls are bounded by the configured timeout,
/// while uploads are only bounded by the connection timeout since their size is unknown up front.
pub struct ImmichClient {
    client: reqwest::Client,
    root: String,
    api_key: String,
    timeout: Duration,
}

impl ImmichClient {
    /// Create a client for the server at `server` (e.g. "http://localhost:2283"), authenticating with `api_key`.
    pub fn new(server: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        if server.is_empty() {
            return Err(anyhow!("missing server address"));
        }

        if api_key.is_empty() {
            return Err(anyhow!("missing API key"));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .connect_timeout(timeout)
                .user_agent(concat!("immigrate/", env!("CARGO_PKG_VERSION")))
                .build()?,
            root: api_root(server),
            api_key: api_key.to_owned(),
            timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{path}", self.root))
            .header("x-api-key", &self.api_key)
            .header("accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();

            Err(ClientError::Http {
                status,
                message: server_message(&body),
            }
            .into())
        }
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        Ok(self
            .send(request.timeout(self.timeout))
            .await?
            .json::<T>()
            .await?)
    }

    async fn file_part(path: &Path, name: String) -> Result<Part> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        Ok(
            Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
                .file_name(name)
                .mime_str("application/octet-stream")?,
        )
    }
}

fn api_root(server: &str) -> String {
    let server = server.trim_end_matches('/');

    if server.ends_with("/api") {
        server.to_owned()
    } else {
        format!("{server}/api")
    }
}

/// Extract a readable message from an error response body, which is JSON when the server produced it and
/// anything else when a proxy did.
fn server_message(body: &str) -> String {
    match serde_json::from_str::<ServerMessage>(body) {
        Ok(ServerMessage {
            message: Some(serde_json::Value::String(message)),
            ..
        }) => message,

        Ok(ServerMessage {
            message: Some(serde_json::Value::Array(messages)),
            ..
        }) => messages
            .iter()
            .map(|m| m.as_str().map(String::from).unwrap_or_else(|| m.to_string()))
            .collect::<Vec<_>>()
            .join(", "),

        Ok(ServerMessage {
            error: Some(error), ..
        }) => error,

        _ => body.trim().to_owned(),
    }
}

/// The server reports assets already in an album (or already tagged) as failures; treat them as successes.
fn bulk_results(results: Vec<UpdateResult>) -> Vec<UpdateResult> {
    results
        .into_iter()
        .map(|result| {
            if result.error.as_deref() == Some(DUPLICATE) {
                UpdateResult {
                    success: true,
                    error: None,
                    ..result
                }
            } else {
                result
            }
        })
        .collect()
}

#[async_trait]
impl Client for ImmichClient {
    async fn ping_server(&self) -> Result<()> {
        let pong = self
            .call::<Pong>(self.request(Method::GET, "server/ping"))
            .await?;

        if pong.res == "pong" {
            Ok(())
        } else {
            Err(ClientError::UnexpectedPing(pong.res).into())
        }
    }

    async fn validate_connection(&self) -> Result<User> {
        self.call(self.request(Method::GET, "users/me")).await
    }

    async fn get_supported_media_types(&self) -> Result<SupportedMedia> {
        self.call(self.request(Method::GET, "server/media-types"))
            .await
    }

    async fn get_asset_statistics(&self) -> Result<AssetStatistics> {
        self.call(self.request(Method::GET, "assets/statistics"))
            .await
    }

    fn get_all_assets(&self, query: AssetQuery) -> BoxStream<'_, Result<ServerAsset>> {
        stream::try_unfold(Some(query), move |query| async move {
            let query = if let Some(query) = query {
                query
            } else {
                return Ok(None);
            };

            debug!("fetching asset page {}", query.page);

            let response = self
                .call::<SearchResponse>(self.request(Method::POST, "search/metadata").json(&query))
                .await?;

            let next = response
                .assets
                .next_page
                .and_then(|page| page.parse::<u32>().ok())
                .map(|page| AssetQuery { page, ..query });

            Ok::<_, anyhow::Error>(Some((
                stream::iter(response.assets.items.into_iter().map(Ok::<_, anyhow::Error>)),
                next,
            )))
        })
        .try_flatten()
        .boxed()
    }

    async fn get_all_albums(&self) -> Result<Vec<Album>> {
        self.call(self.request(Method::GET, "albums")).await
    }

    async fn get_album_asset_ids(&self, album_id: &str) -> Result<Vec<String>> {
        Ok(self
            .call::<AlbumAssets>(self.request(Method::GET, &format!("albums/{album_id}")))
            .await?
            .assets
            .into_iter()
            .map(|asset| asset.id)
            .collect())
    }

    async fn asset_upload(&self, request: &UploadRequest) -> Result<UploadResponse> {
        let mut form = Form::new()
            .text("deviceAssetId", request.device_asset_id.clone())
            .text("deviceId", request.device_id.clone())
            .text("assetType", request.asset_type.to_string())
            .text(
                "fileCreatedAt",
                UploadRequest::format_time(&request.file_created_at),
            )
            .text(
                "fileModifiedAt",
                UploadRequest::format_time(&request.file_modified_at),
            )
            .text("isFavorite", request.is_favorite.to_string())
            .text("fileExtension", request.file_extension.clone())
            .text("duration", request.duration.clone())
            .text("isReadOnly", request.is_read_only.to_string())
            .text("isArchived", request.is_archived.to_string())
            .part(
                "assetData",
                Self::file_part(&request.file_path, request.wire_file_name()).await?,
            );

        if let Some(sidecar) = &request.sidecar_path {
            form = form.part(
                "sidecarData",
                Self::file_part(sidecar, format!("{}.xmp", request.file_name)).await?,
            );
        }

        debug!("uploading {}", request.file_name);

        Ok(self
            .send(self.request(Method::POST, "assets").multipart(form))
            .await?
            .json::<UploadResponse>()
            .await?)
    }

    async fn delete_assets(&self, ids: &[String], force: bool) -> Result<()> {
        self.send(
            self.request(Method::DELETE, "assets")
                .json(&DeleteAssets { ids, force })
                .timeout(self.timeout),
        )
        .await?;

        Ok(())
    }

    async fn create_album(
        &self,
        title: &str,
        description: &str,
        asset_ids: &[String],
    ) -> Result<Album> {
        self.call(self.request(Method::POST, "albums").json(&CreateAlbum {
            album_name: title,
            description,
            asset_ids,
        }))
        .await
    }

    async fn add_assets_to_album(
        &self,
        album_id: &str,
        asset_ids: &[String],
    ) -> Result<Vec<UpdateResult>> {
        Ok(bulk_results(
            self.call(
                self.request(Method::PUT, &format!("albums/{album_id}/assets"))
                    .json(&Ids { ids: asset_ids }),
            )
            .await?,
        ))
    }

    async fn upsert_tags(&self, values: &[String]) -> Result<Vec<Tag>> {
        self.call(
            self.request(Method::PUT, "tags")
                .json(&UpsertTags { tags: values }),
        )
        .await
    }

    async fn tag_assets(&self, tag_id: &str, asset_ids: &[String]) -> Result<Vec<UpdateResult>> {
        Ok(bulk_results(
            self.call(
                self.request(Method::PUT, &format!("tags/{tag_id}/assets"))
                    .json(&Ids { ids: asset_ids }),
            )
            .await?,
        ))
    }

    async fn create_stack(&self, asset_ids: &[String]) -> Result<String> {
        Ok(self
            .call::<AssetId>(
                self.request(Method::POST, "stacks")
                    .json(&CreateStack { asset_ids }),
            )
            .await?
            .id)
    }
}
