//! Species catalogue endpoints and data model.

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

use crate::client::{Client, MultipartForm, RequestConfig};
use crate::{Error, Result};

const LIST_PATH: &str = "/species/get-all";
const ADD_ONE_PATH: &str = "/species/add-one";
const ADD_MANY_PATH: &str = "/species/add-multi-species";
const DELETE_MANY_PATH: &str = "/species/delete-multiple";
const UPLOAD_IMAGES_PATH: &str = "/user/img";

/// Accepts `"12.5"`, `"12.5°"` or `12.5`.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s.trim().trim_end_matches('°').to_string()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(deserialize_with = "string_or_number")]
    pub latitude: String,
    #[serde(deserialize_with = "string_or_number")]
    pub longitude: String,
}

impl Coordinate {
    pub fn new(latitude: impl ToString, longitude: impl ToString) -> Self {
        Self {
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub display_name: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub thumbnail: String,
    #[serde(default)]
    pub is_main: bool,
}

/// A catalogue record as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    pub id: String,
    #[serde(flatten)]
    pub info: NewSpecies,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// A species record without an id, as sent on creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSpecies {
    pub group: Option<String>,
    pub phylum: Option<String>,
    pub class: Option<String>,
    pub order: Option<String>,
    pub family: Option<String>,
    pub genus: String,
    pub species: String,
    pub threatened_symbol: Option<String>,
    pub impact: Option<String>,
    pub description: Option<String>,
    pub characteristic: Option<String>,
    pub habitas: Option<String>,
    pub distribution_vietnam: Option<String>,
    pub distribution_world: Option<String>,
    #[serde(default, alias = "species_coordinates")]
    pub coordinates: Vec<Coordinate>,
    #[serde(default)]
    pub common_names: Vec<CommonName>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

impl NewSpecies {
    pub fn new(genus: impl Into<String>, species: impl Into<String>) -> Self {
        Self {
            genus: genus.into(),
            species: species.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.genus.trim().is_empty() || self.species.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "genus and species must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpeciesQuery {
    pub page: u32,
    pub limit: u32,
    pub search: String,
    pub sort_by: SortOrder,
}

impl Default for SpeciesQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            search: String::new(),
            sort_by: SortOrder::default(),
        }
    }
}

impl SpeciesQuery {
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn sort_by(mut self, order: SortOrder) -> Self {
        self.sort_by = order;
        self
    }

    fn apply(&self, config: RequestConfig) -> RequestConfig {
        config
            .query("page", self.page)
            .query("limit", self.limit)
            .query("search", &self.search)
            .query("sort_by", self.sort_by.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeciesPage {
    pub data: Vec<Species>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedImages {
    pub message: String,
    #[serde(rename = "publicIds")]
    pub public_ids: Vec<String>,
}

/// An image held in memory for upload.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub bytes: Bytes,
    /// Empty means "guess from the file name".
    pub mime_type: String,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            mime_type: String::new(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(file_name, bytes))
    }

    fn attach(self, form: MultipartForm, field: &str) -> MultipartForm {
        form.file(field, self.file_name, self.mime_type, self.bytes)
    }
}

/// One species and its images for a bulk upload.
#[derive(Debug, Clone)]
pub struct SpeciesUpload {
    pub species: NewSpecies,
    pub images: Vec<ImageFile>,
}

impl SpeciesUpload {
    pub fn new(species: NewSpecies) -> Self {
        Self {
            species,
            images: Vec::new(),
        }
    }

    pub fn image(mut self, image: ImageFile) -> Self {
        self.images.push(image);
        self
    }
}

/// Build the bulk-upload form: per entry a `speciesInfo` part followed by its
/// `speciesImg` files, then one `imageCounts` part per entry.
fn bulk_upload_form(entries: Vec<SpeciesUpload>) -> Result<MultipartForm> {
    let mut form = MultipartForm::new();
    let mut counts = Vec::with_capacity(entries.len());

    for entry in entries {
        form = form.text("speciesInfo", serde_json::to_string(&entry.species)?);
        counts.push(entry.images.len());
        for image in entry.images {
            form = image.attach(form, "speciesImg");
        }
    }

    for count in counts {
        form = form.text("imageCounts", count.to_string());
    }
    Ok(form)
}

pub struct SpeciesService<'a> {
    client: &'a Client,
}

impl<'a> SpeciesService<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub async fn list(&self, query: &SpeciesQuery) -> Result<SpeciesPage> {
        self.list_with(query, RequestConfig::default()).await
    }

    /// Same as [`list`](Self::list) with per-call options such as a cancel token.
    pub async fn list_with(
        &self,
        query: &SpeciesQuery,
        config: RequestConfig,
    ) -> Result<SpeciesPage> {
        let page: SpeciesPage = self
            .client
            .get_with(LIST_PATH, query.apply(config))
            .await?
            .json()?;
        tracing::debug!(
            page = page.pagination.page,
            returned = page.data.len(),
            total = page.pagination.total,
            "Fetched species page"
        );
        Ok(page)
    }

    pub async fn add_one(&self, species: &NewSpecies) -> Result<()> {
        species.validate()?;
        self.client.post_json(ADD_ONE_PATH, species).await?;
        tracing::info!(genus = %species.genus, species = %species.species, "Species added");
        Ok(())
    }

    /// Bulk create species with their images in one multipart request.
    pub async fn add_many(&self, entries: Vec<SpeciesUpload>) -> Result<serde_json::Value> {
        if entries.is_empty() {
            return Err(Error::InvalidRequest("no species to upload".into()));
        }
        for entry in &entries {
            entry.species.validate()?;
        }

        let count = entries.len();
        let form = bulk_upload_form(entries)?;
        let response = self.client.post_multipart(ADD_MANY_PATH, form).await?;
        tracing::info!(count, "Species uploaded");

        if response.body().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        response.json()
    }

    pub async fn upload_images(
        &self,
        images: Vec<ImageFile>,
        folder: &str,
    ) -> Result<UploadedImages> {
        if images.is_empty() {
            return Err(Error::InvalidRequest("no images to upload".into()));
        }

        let form = images
            .into_iter()
            .fold(MultipartForm::new(), |form, image| image.attach(form, "images"))
            .text("folderName", folder);

        self.client
            .post_multipart(UPLOAD_IMAGES_PATH, form)
            .await?
            .json()
    }

    pub async fn delete_many(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Err(Error::InvalidRequest("no species selected".into()));
        }
        self.client
            .delete_json(DELETE_MANY_PATH, &serde_json::json!({ "ids": ids }))
            .await?;
        tracing::info!(count = ids.len(), "Species deleted");
        Ok(())
    }
}
