use crate::config::{ApiType, Config};
use crate::error::ErnieResult;
use crate::http_client::HttpClient;
use crate::logging::log_debug;
use crate::resource::Resource;
use crate::resources::chat_completion::ChatCompletion;
use crate::resources::embedding::Embedding;
use crate::resources::fine_tuning::{FineTuningJob, FineTuningTask};
use crate::resources::image::Image;

/// Entry point holding one configuration and one shared HTTP session.
///
/// Every resource handed out sends through the same connection pool and
/// the same token cache.
#[derive(Debug, Clone)]
pub struct ErnieClient {
    config: Config,
    http: HttpClient,
}

impl ErnieClient {
    /// # Errors
    ///
    /// Returns [`ErnieError::Configuration`] if the configured proxy is invalid.
    pub fn new(config: Config) -> ErnieResult<Self> {
        let http = HttpClient::with_proxy(config.proxy.as_deref())?;
        log_debug!(
            api_type = %config.api_type,
            has_proxy = config.proxy.is_some(),
            "Created ERNIE Bot client"
        );
        Ok(Self { config, http })
    }

    /// Client configured from `EB_*` environment variables.
    pub fn from_env() -> ErnieResult<Self> {
        Self::new(Config::from_env()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// A resource for `api_type`, keeping every other setting.
    pub fn resource_for(&self, api_type: ApiType) -> ErnieResult<Resource> {
        let mut config = self.config.clone();
        if config.api_type != api_type {
            config.api_type = api_type;
            config.base_url = None;
        }
        Resource::with_http(config, self.http.clone())
    }

    fn resource(&self) -> ErnieResult<Resource> {
        Resource::with_http(self.config.clone(), self.http.clone())
    }

    pub fn chat_completion(&self) -> ErnieResult<ChatCompletion> {
        self.resource().map(ChatCompletion::from_resource)
    }

    pub fn embedding(&self) -> ErnieResult<Embedding> {
        self.resource().map(Embedding::from_resource)
    }

    /// Image generation always targets the Yinian backend.
    pub fn image(&self) -> ErnieResult<Image> {
        self.resource_for(ApiType::Yinian).map(Image::from_resource)
    }

    pub fn fine_tuning_task(&self) -> ErnieResult<FineTuningTask> {
        self.resource().map(FineTuningTask::from_resource)
    }

    pub fn fine_tuning_job(&self) -> ErnieResult<FineTuningJob> {
        self.resource().map(FineTuningJob::from_resource)
    }
}
