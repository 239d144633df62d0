//! Text embeddings.

use super::{check_kwargs, optional, required, require_non_empty, CallOptions, ModelTable};
use crate::config::{ApiType, Config};
use crate::error::{ErnieError, ErnieResult};
use crate::logging::log_debug;
use crate::request::Request;
use crate::resource::Resource;
use crate::response::Envelope;
use crate::resources::chat_completion::Usage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inputs accepted per call.
pub const MAX_EMBEDDING_INPUTS: usize = 16;

pub(crate) static EMBEDDING_MODELS: ModelTable = ModelTable {
    resource: "embedding",
    api_types: &[
        ApiType::Qianfan,
        ApiType::QianfanIam,
        ApiType::AiStudio,
        ApiType::Custom,
    ],
    models: &[("ernie-text-embedding", "/embeddings/embedding-v1")],
};

const EMBEDDING_KWARGS: &[&str] = &["model", "input", "user_id"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingParams {
    #[serde(skip)]
    pub model: String,
    pub input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip)]
    pub options: CallOptions,
}

impl EmbeddingParams {
    pub fn new(model: impl Into<String>, input: Vec<String>) -> Self {
        Self {
            model: model.into(),
            input,
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_kwargs(kwargs: &Map<String, Value>) -> ErnieResult<Self> {
        check_kwargs(kwargs, EMBEDDING_KWARGS)?;
        Ok(Self {
            model: required(kwargs, "model")?,
            input: required(kwargs, "input")?,
            user_id: optional(kwargs, "user_id")?,
            options: CallOptions::from_kwargs(kwargs)?,
        })
    }

    fn validate(&self) -> ErnieResult<()> {
        require_non_empty("model", &self.model)?;
        if self.input.is_empty() {
            return Err(ErnieError::argument_not_found("input"));
        }
        if self.input.len() > MAX_EMBEDDING_INPUTS {
            return Err(ErnieError::invalid_argument(format!(
                "`input` holds {} texts, at most {MAX_EMBEDDING_INPUTS} are allowed",
                self.input.len()
            )));
        }
        if let Some(index) = self.input.iter().position(|text| text.is_empty()) {
            return Err(ErnieError::invalid_argument(format!(
                "`input[{index}]` must not be empty"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResponse {
    envelope: Envelope,
}

impl From<Envelope> for EmbeddingResponse {
    fn from(envelope: Envelope) -> Self {
        Self { envelope }
    }
}

impl EmbeddingResponse {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// One vector per input text, in input order.
    pub fn embeddings(&self) -> ErnieResult<Vec<Vec<f64>>> {
        let mut items: Vec<EmbeddingItem> = self.envelope.get_as("data")?;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }

    pub fn usage(&self) -> Option<Usage> {
        self.envelope.get_as("usage").ok()
    }
}

/// Embedding resource.
#[derive(Debug, Clone)]
pub struct Embedding {
    resource: Resource,
}

impl Embedding {
    pub fn new(config: Config) -> ErnieResult<Self> {
        Ok(Self {
            resource: Resource::new(config)?,
        })
    }

    pub fn from_resource(resource: Resource) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn supported_models() -> Vec<&'static str> {
        EMBEDDING_MODELS.model_names()
    }

    pub fn prepare_create(api_type: ApiType, params: &EmbeddingParams) -> ErnieResult<Request> {
        params.validate()?;
        let path = EMBEDDING_MODELS.path(api_type, &params.model)?;
        let body = serde_json::to_value(params).map_err(|e| {
            ErnieError::invalid_argument(format!("Could not serialize embedding parameters: {e}"))
        })?;
        log_debug!(model = %params.model, inputs = params.input.len(), "Prepared embedding request");
        Ok(params.options.apply(Request::post(path).with_json(body)))
    }

    pub async fn create(&self, params: EmbeddingParams) -> ErnieResult<EmbeddingResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        let envelope = resource.request(&request).await?.into_single()?;
        Ok(envelope.into())
    }

    pub fn create_blocking(&self, params: EmbeddingParams) -> ErnieResult<EmbeddingResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        let envelope = resource.request_blocking(&request)?.into_single()?;
        Ok(envelope.into())
    }
}
