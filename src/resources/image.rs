//! Text-to-image generation.
//!
//! The provider works asynchronously: a submit call returns a task id, and
//! the task is then polled until it succeeds or fails.

use super::{check_kwargs, optional, required, require_non_empty, CallOptions, ModelTable};
use crate::config::{ApiType, Config};
use crate::error::{ApiErrorDetails, ErnieError, ErnieResult};
use crate::logging::{log_debug, log_info};
use crate::request::Request;
use crate::resource::{PollPolicy, Resource};
use crate::response::Envelope;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const POLLING_INTERVAL_SECS: u64 = 5;
pub const POLLING_TIMEOUT_SECS: u64 = 60;

const QUERY_PATH: &str = "/getImgv2";

pub(crate) static IMAGE_MODELS: ModelTable = ModelTable {
    resource: "image generation",
    api_types: &[ApiType::Yinian],
    models: &[("ernie-vilg-v2", "/txt2imgv2")],
};

/// Accepted `(width, height)` pairs.
pub const SUPPORTED_SIZES: &[(u32, u32)] = &[
    (512, 512),
    (640, 360),
    (360, 640),
    (1024, 1024),
    (1280, 720),
    (720, 1280),
    (2048, 2048),
    (2560, 1440),
    (1440, 2560),
];

const IMAGE_KWARGS: &[&str] = &[
    "model",
    "prompt",
    "width",
    "height",
    "negative_prompt",
    "image_num",
    "image",
    "url",
    "change_degree",
];

#[derive(Debug, Clone, Default)]
pub struct ImageParams {
    pub model: String,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub negative_prompt: Option<String>,
    /// 1..=8
    pub image_num: Option<u32>,
    /// Base64-encoded reference image.
    pub image: Option<String>,
    /// URL of a reference image.
    pub url: Option<String>,
    /// How far to move away from the reference image, 1..=10.
    pub change_degree: Option<u32>,
    pub options: CallOptions,
}

impl ImageParams {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_image_num(mut self, image_num: u32) -> Self {
        self.image_num = Some(image_num);
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_change_degree(mut self, change_degree: u32) -> Self {
        self.change_degree = Some(change_degree);
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_kwargs(kwargs: &Map<String, Value>) -> ErnieResult<Self> {
        check_kwargs(kwargs, IMAGE_KWARGS)?;
        Ok(Self {
            model: required(kwargs, "model")?,
            prompt: required(kwargs, "prompt")?,
            width: required(kwargs, "width")?,
            height: required(kwargs, "height")?,
            negative_prompt: optional(kwargs, "negative_prompt")?,
            image_num: optional(kwargs, "image_num")?,
            image: optional(kwargs, "image")?,
            url: optional(kwargs, "url")?,
            change_degree: optional(kwargs, "change_degree")?,
            options: CallOptions::from_kwargs(kwargs)?,
        })
    }

    fn validate(&self) -> ErnieResult<()> {
        require_non_empty("model", &self.model)?;
        require_non_empty("prompt", &self.prompt)?;
        if !SUPPORTED_SIZES.contains(&(self.width, self.height)) {
            return Err(ErnieError::invalid_argument(format!(
                "Unsupported image size {}x{}",
                self.width, self.height
            )));
        }
        if self.image_num.is_some_and(|n| !(1..=8).contains(&n)) {
            return Err(ErnieError::invalid_argument("`image_num` must be in [1, 8]"));
        }
        if self.change_degree.is_some_and(|d| !(1..=10).contains(&d)) {
            return Err(ErnieError::invalid_argument(
                "`change_degree` must be in [1, 10]",
            ));
        }
        Ok(())
    }

    fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("prompt".to_string(), Value::from(self.prompt.clone()));
        body.insert("width".to_string(), Value::from(self.width));
        body.insert("height".to_string(), Value::from(self.height));
        super::insert_opt(&mut body, "negative_prompt", self.negative_prompt.clone());
        super::insert_opt(&mut body, "image_num", self.image_num);
        super::insert_opt(&mut body, "image", self.image.clone());
        super::insert_opt(&mut body, "url", self.url.clone());
        super::insert_opt(&mut body, "change_degree", self.change_degree);
        Value::Object(body)
    }
}

/// One generated image that passed content review.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedImage {
    pub img_url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub img_approve_conclusion: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageResponse {
    envelope: Envelope,
    images: Vec<GeneratedImage>,
}

impl ImageResponse {
    pub(crate) fn from_envelope(envelope: Envelope) -> Self {
        let images = envelope["data"]["sub_task_result_list"]
            .as_array()
            .into_iter()
            .flatten()
            .flat_map(|sub_task| {
                sub_task["final_image_list"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
            })
            .filter_map(|image| serde_json::from_value::<GeneratedImage>(image).ok())
            .filter(|image| image.img_approve_conclusion.as_deref() == Some("pass"))
            .collect();
        Self { envelope, images }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn task_id(&self) -> Option<&Value> {
        self.envelope["data"].get("task_id")
    }

    /// Images that passed review, in provider order.
    pub fn images(&self) -> &[GeneratedImage] {
        &self.images
    }

    pub fn image_urls(&self) -> Vec<&str> {
        self.images.iter().map(|image| image.img_url.as_str()).collect()
    }
}

/// `SUCCESS` finishes the poll, `FAILED` aborts it.
pub(crate) fn task_finished(envelope: &Envelope) -> ErnieResult<bool> {
    let status = envelope["data"]["task_status"].as_str().unwrap_or_default();
    log_debug!(
        task_status = status,
        progress = %envelope["data"]["task_progress"],
        "Image task status"
    );
    match status {
        "SUCCESS" => Ok(true),
        "FAILED" => Err(ErnieError::api(
            ApiErrorDetails::new("Image generation task failed")
                .with_status(envelope.status_code())
                .with_body(envelope.body().to_string())
                .with_headers(envelope.headers().clone()),
        )),
        _ => Ok(false),
    }
}

/// Image generation resource.
#[derive(Debug, Clone)]
pub struct Image {
    resource: Resource,
    poll_policy: PollPolicy,
}

impl Image {
    pub fn new(config: Config) -> ErnieResult<Self> {
        Ok(Self::from_resource(Resource::new(config)?))
    }

    pub fn from_resource(resource: Resource) -> Self {
        Self {
            resource,
            poll_policy: PollPolicy::new(
                Duration::from_secs(POLLING_INTERVAL_SECS),
                Duration::from_secs(POLLING_TIMEOUT_SECS),
            ),
        }
    }

    pub fn with_poll_policy(mut self, poll_policy: PollPolicy) -> Self {
        self.poll_policy = poll_policy;
        self
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll_policy
    }

    pub fn supported_models() -> Vec<&'static str> {
        IMAGE_MODELS.model_names()
    }

    /// Build the submit request. No I/O.
    pub fn prepare_create(api_type: ApiType, params: &ImageParams) -> ErnieResult<Request> {
        params.validate()?;
        let path = IMAGE_MODELS.path(api_type, &params.model)?;
        log_debug!(
            model = %params.model,
            width = params.width,
            height = params.height,
            "Prepared image generation request"
        );
        Ok(params.options.apply(Request::post(path).with_json(params.body())))
    }

    /// Build the status query for a submitted task.
    pub fn prepare_query(submitted: &Envelope, options: &CallOptions) -> ErnieResult<Request> {
        let task_id = submitted["data"]
            .get("task_id")
            .filter(|id| !id.is_null())
            .cloned()
            .ok_or_else(|| {
                ErnieError::response_parsing_error("Image submit response carries no task_id")
            })?;
        log_info!(task_id = %task_id, "Image generation task submitted");
        Ok(options.apply(Request::post(QUERY_PATH).with_json(json!({ "task_id": task_id }))))
    }

    pub async fn create(&self, params: ImageParams) -> ErnieResult<ImageResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        let submitted = resource.request(&request).await?.into_single()?;
        let query = Self::prepare_query(&submitted, &params.options)?;
        let finished = resource
            .poll(&query, self.poll_policy, task_finished)
            .await?;
        Ok(ImageResponse::from_envelope(finished))
    }

    pub fn create_blocking(&self, params: ImageParams) -> ErnieResult<ImageResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        let submitted = resource.request_blocking(&request)?.into_single()?;
        let query = Self::prepare_query(&submitted, &params.options)?;
        let finished = resource.poll_blocking(&query, self.poll_policy, task_finished)?;
        Ok(ImageResponse::from_envelope(finished))
    }
}
