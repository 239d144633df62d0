//! Fine-tuning tasks and jobs (Qianfan only).
//!
//! Request bodies use the provider's camelCase field names.

use super::{check_kwargs, optional, required, require_non_empty, CallOptions};
use crate::config::{ApiType, Config};
use crate::error::{ErnieError, ErnieResult};
use crate::logging::log_debug;
use crate::request::Request;
use crate::resource::Resource;
use crate::response::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const FINE_TUNING_API_TYPES: &[ApiType] = &[ApiType::Qianfan, ApiType::QianfanIam];

const CREATE_TASK_PATH: &str = "/finetune/createTask";
const CREATE_JOB_PATH: &str = "/finetune/createJob";
const JOB_DETAIL_PATH: &str = "/finetune/jobDetail";
const STOP_JOB_PATH: &str = "/finetune/stopJob";

fn check_api_type(api_type: ApiType) -> ErnieResult<()> {
    if FINE_TUNING_API_TYPES.contains(&api_type) {
        return Ok(());
    }
    Err(ErnieError::configuration_error(format!(
        "Fine-tuning is not available for api type `{api_type}`"
    )))
}

fn to_body<T: Serialize>(params: &T) -> ErnieResult<Value> {
    serde_json::to_value(params).map_err(|e| {
        ErnieError::invalid_argument(format!("Could not serialize fine-tuning parameters: {e}"))
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub base_train_type: String,
    pub train_type: String,
    #[serde(skip)]
    pub options: CallOptions,
}

impl CreateTaskParams {
    pub fn new(
        name: impl Into<String>,
        base_train_type: impl Into<String>,
        train_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_train_type: base_train_type.into(),
            train_type: train_type.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn from_kwargs(kwargs: &Map<String, Value>) -> ErnieResult<Self> {
        check_kwargs(kwargs, &["name", "description", "base_train_type", "train_type"])?;
        Ok(Self {
            name: required(kwargs, "name")?,
            description: optional(kwargs, "description")?,
            base_train_type: required(kwargs, "base_train_type")?,
            train_type: required(kwargs, "train_type")?,
            options: CallOptions::from_kwargs(kwargs)?,
        })
    }

    fn validate(&self) -> ErnieResult<()> {
        require_non_empty("name", &self.name)?;
        require_non_empty("base_train_type", &self.base_train_type)?;
        require_non_empty("train_type", &self.train_type)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobParams {
    pub task_id: i64,
    pub base_train_type: String,
    pub train_type: String,
    pub train_mode: String,
    pub peft_type: String,
    pub train_config: Value,
    pub train_dataset: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_split_ratio: Option<u32>,
    #[serde(skip)]
    pub options: CallOptions,
}

impl CreateJobParams {
    pub fn from_kwargs(kwargs: &Map<String, Value>) -> ErnieResult<Self> {
        check_kwargs(
            kwargs,
            &[
                "task_id",
                "base_train_type",
                "train_type",
                "train_mode",
                "peft_type",
                "train_config",
                "train_dataset",
                "train_split_ratio",
            ],
        )?;
        Ok(Self {
            task_id: required(kwargs, "task_id")?,
            base_train_type: required(kwargs, "base_train_type")?,
            train_type: required(kwargs, "train_type")?,
            train_mode: required(kwargs, "train_mode")?,
            peft_type: required(kwargs, "peft_type")?,
            train_config: required(kwargs, "train_config")?,
            train_dataset: required(kwargs, "train_dataset")?,
            train_split_ratio: optional(kwargs, "train_split_ratio")?,
            options: CallOptions::from_kwargs(kwargs)?,
        })
    }

    fn validate(&self) -> ErnieResult<()> {
        require_non_empty("base_train_type", &self.base_train_type)?;
        require_non_empty("train_type", &self.train_type)?;
        require_non_empty("train_mode", &self.train_mode)?;
        require_non_empty("peft_type", &self.peft_type)?;
        if self.train_config.is_null() {
            return Err(ErnieError::argument_not_found("train_config"));
        }
        if self.train_dataset.is_null() {
            return Err(ErnieError::argument_not_found("train_dataset"));
        }
        if self.train_split_ratio.is_some_and(|r| r > 100) {
            return Err(ErnieError::invalid_argument(
                "`train_split_ratio` must be a percentage in [0, 100]",
            ));
        }
        Ok(())
    }
}

/// Identifies one job; used by retrieve and cancel.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    pub task_id: i64,
    pub job_id: i64,
    #[serde(skip)]
    pub options: CallOptions,
}

impl JobParams {
    pub fn new(task_id: i64, job_id: i64) -> Self {
        Self {
            task_id,
            job_id,
            options: CallOptions::default(),
        }
    }

    pub fn from_kwargs(kwargs: &Map<String, Value>) -> ErnieResult<Self> {
        check_kwargs(kwargs, &["task_id", "job_id"])?;
        Ok(Self {
            task_id: required(kwargs, "task_id")?,
            job_id: required(kwargs, "job_id")?,
            options: CallOptions::from_kwargs(kwargs)?,
        })
    }
}

/// Identifiers returned by create calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedIds {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    task_id: Option<i64>,
    #[serde(default)]
    job_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FineTuningResponse {
    envelope: Envelope,
}

impl From<Envelope> for FineTuningResponse {
    fn from(envelope: Envelope) -> Self {
        Self { envelope }
    }
}

impl FineTuningResponse {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// The provider's `result` object.
    pub fn result(&self) -> &Value {
        &self.envelope["result"]
    }

    fn ids(&self) -> Option<CreatedIds> {
        serde_json::from_value(self.result().clone()).ok()
    }

    /// Task id of a created task (`result.id`) or of a job (`result.taskId`).
    pub fn task_id(&self) -> Option<i64> {
        self.ids().and_then(|ids| ids.task_id.or(ids.id))
    }

    pub fn job_id(&self) -> Option<i64> {
        self.ids().and_then(|ids| ids.job_id)
    }

    /// Job status reported by `retrieve`, e.g. `Running` or `Succeeded`.
    pub fn status(&self) -> Option<&str> {
        self.result()
            .get("finetuneStatus")
            .or_else(|| self.result().get("status"))
            .and_then(Value::as_str)
    }
}

async fn send(resource: &Resource, request: Request) -> ErnieResult<FineTuningResponse> {
    Ok(resource.request(&request).await?.into_single()?.into())
}

fn send_blocking(resource: &Resource, request: Request) -> ErnieResult<FineTuningResponse> {
    Ok(resource.request_blocking(&request)?.into_single()?.into())
}

/// Fine-tuning tasks.
#[derive(Debug, Clone)]
pub struct FineTuningTask {
    resource: Resource,
}

impl FineTuningTask {
    pub fn new(config: Config) -> ErnieResult<Self> {
        Ok(Self {
            resource: Resource::new(config)?,
        })
    }

    pub fn from_resource(resource: Resource) -> Self {
        Self { resource }
    }

    pub fn prepare_create(api_type: ApiType, params: &CreateTaskParams) -> ErnieResult<Request> {
        check_api_type(api_type)?;
        params.validate()?;
        log_debug!(train_type = %params.train_type, "Prepared fine-tuning task request");
        Ok(params
            .options
            .apply(Request::post(CREATE_TASK_PATH).with_json(to_body(params)?)))
    }

    pub async fn create(&self, params: CreateTaskParams) -> ErnieResult<FineTuningResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        send(&resource, request).await
    }

    pub fn create_blocking(&self, params: CreateTaskParams) -> ErnieResult<FineTuningResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        send_blocking(&resource, request)
    }
}

/// Fine-tuning jobs.
#[derive(Debug, Clone)]
pub struct FineTuningJob {
    resource: Resource,
}

impl FineTuningJob {
    pub fn new(config: Config) -> ErnieResult<Self> {
        Ok(Self {
            resource: Resource::new(config)?,
        })
    }

    pub fn from_resource(resource: Resource) -> Self {
        Self { resource }
    }

    pub fn prepare_create(api_type: ApiType, params: &CreateJobParams) -> ErnieResult<Request> {
        check_api_type(api_type)?;
        params.validate()?;
        log_debug!(task_id = params.task_id, "Prepared fine-tuning job request");
        Ok(params
            .options
            .apply(Request::post(CREATE_JOB_PATH).with_json(to_body(params)?)))
    }

    pub fn prepare_retrieve(api_type: ApiType, params: &JobParams) -> ErnieResult<Request> {
        check_api_type(api_type)?;
        Ok(params
            .options
            .apply(Request::post(JOB_DETAIL_PATH).with_json(to_body(params)?)))
    }

    pub fn prepare_cancel(api_type: ApiType, params: &JobParams) -> ErnieResult<Request> {
        check_api_type(api_type)?;
        Ok(params
            .options
            .apply(Request::post(STOP_JOB_PATH).with_json(to_body(params)?)))
    }

    pub async fn create(&self, params: CreateJobParams) -> ErnieResult<FineTuningResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        send(&resource, request).await
    }

    pub fn create_blocking(&self, params: CreateJobParams) -> ErnieResult<FineTuningResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        send_blocking(&resource, request)
    }

    pub async fn retrieve(&self, params: JobParams) -> ErnieResult<FineTuningResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_retrieve(resource.api_type(), &params)?;
        send(&resource, request).await
    }

    pub fn retrieve_blocking(&self, params: JobParams) -> ErnieResult<FineTuningResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_retrieve(resource.api_type(), &params)?;
        send_blocking(&resource, request)
    }

    pub async fn cancel(&self, params: JobParams) -> ErnieResult<FineTuningResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_cancel(resource.api_type(), &params)?;
        send(&resource, request).await
    }

    pub fn cancel_blocking(&self, params: JobParams) -> ErnieResult<FineTuningResponse> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_cancel(resource.api_type(), &params)?;
        send_blocking(&resource, request)
    }
}
