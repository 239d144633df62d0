//! Chat completion.
//!
//! # Example
//!
//! ```rust,no_run
//! use erniebot::{ChatCompletion, ChatCompletionParams, Config, Message};
//!
//! # async fn run() -> erniebot::ErnieResult<()> {
//! let chat = ChatCompletion::new(Config::from_env()?)?;
//! let params = ChatCompletionParams::new("ernie-bot", vec![Message::user("Hello!")]);
//! let response = chat.create(params).await?.into_response()?;
//! println!("{}", response.result());
//! # Ok(())
//! # }
//! ```

use super::{
    check_kwargs, check_range, optional, required, CallOptions, ModelTable,
};
use crate::config::{ApiType, Config};
use crate::error::{ErnieError, ErnieResult};
use crate::http_client::{BlockingTransmission, EnvelopeIter, Transmission};
use crate::logging::log_debug;
use crate::request::Request;
use crate::resource::Resource;
use crate::response::Envelope;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;

pub(crate) static CHAT_MODELS: ModelTable = ModelTable {
    resource: "chat completion",
    api_types: &[
        ApiType::Qianfan,
        ApiType::QianfanIam,
        ApiType::AiStudio,
        ApiType::Custom,
    ],
    models: &[
        ("ernie-bot", "/chat/completions"),
        ("ernie-bot-turbo", "/chat/eb-instant"),
        ("ernie-bot-4", "/chat/completions_pro"),
        ("ernie-bot-8k", "/chat/ernie_bot_8k"),
    ],
};

/// Models that do not accept `functions`.
const MODELS_WITHOUT_FUNCTIONS: &[&str] = &["ernie-bot-turbo"];

const CHAT_KWARGS: &[&str] = &[
    "model",
    "messages",
    "functions",
    "temperature",
    "top_p",
    "penalty_score",
    "system",
    "user_id",
    "stream",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Function,
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Function name, for [`Role::Function`] turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            name: Some(name.into()),
            function_call: None,
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatCompletionParams {
    #[serde(skip)]
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<Function>>,
    /// (0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// [1, 2]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalty_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip)]
    pub options: CallOptions,
}

impl ChatCompletionParams {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_functions(mut self, functions: Vec<Function>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_penalty_score(mut self, penalty_score: f64) -> Self {
        self.penalty_score = Some(penalty_score);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Build parameters from loosely typed keyword arguments.
    ///
    /// # Errors
    ///
    /// [`ErnieError::InvalidArgument`] for unknown keys or mistyped values,
    /// [`ErnieError::ArgumentNotFound`] when `model` or `messages` is missing.
    pub fn from_kwargs(kwargs: &Map<String, Value>) -> ErnieResult<Self> {
        check_kwargs(kwargs, CHAT_KWARGS)?;
        Ok(Self {
            model: required(kwargs, "model")?,
            messages: required(kwargs, "messages")?,
            functions: optional(kwargs, "functions")?,
            temperature: optional(kwargs, "temperature")?,
            top_p: optional(kwargs, "top_p")?,
            penalty_score: optional(kwargs, "penalty_score")?,
            system: optional(kwargs, "system")?,
            user_id: optional(kwargs, "user_id")?,
            stream: optional(kwargs, "stream")?.unwrap_or(false),
            options: CallOptions::from_kwargs(kwargs)?,
        })
    }

    fn validate(&self) -> ErnieResult<()> {
        if self.model.trim().is_empty() {
            return Err(ErnieError::argument_not_found("model"));
        }
        if self.messages.is_empty() {
            return Err(ErnieError::argument_not_found("messages"));
        }
        if self.messages.len() % 2 == 0 {
            return Err(ErnieError::invalid_argument(format!(
                "`messages` must contain an odd number of turns, got {}",
                self.messages.len()
            )));
        }
        if let Some(last) = self.messages.last() {
            if last.role == Role::Assistant {
                return Err(ErnieError::invalid_argument(
                    "The last message must come from the user or a function",
                ));
            }
        }
        check_range("temperature", self.temperature, |v| v > 0.0 && v <= 1.0, "(0, 1]")?;
        check_range("top_p", self.top_p, |v| (0.0..=1.0).contains(&v), "[0, 1]")?;
        check_range(
            "penalty_score",
            self.penalty_score,
            |v| (1.0..=2.0).contains(&v),
            "[1, 2]",
        )?;
        if self.functions.is_some() && MODELS_WITHOUT_FUNCTIONS.contains(&self.model.as_str()) {
            return Err(ErnieError::invalid_argument(format!(
                "{} does not support function calling",
                self.model
            )));
        }
        Ok(())
    }
}

/// What the model produced: text, or a function call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResult {
    Text(String),
    FunctionCall(FunctionCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One chat completion response, or one chunk of a streamed one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionResponse {
    envelope: Envelope,
}

impl From<Envelope> for ChatCompletionResponse {
    fn from(envelope: Envelope) -> Self {
        Self { envelope }
    }
}

impl ChatCompletionResponse {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    /// Generated text; empty for function-call responses.
    pub fn result(&self) -> &str {
        self.envelope
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn is_function_response(&self) -> bool {
        self.envelope
            .get("function_call")
            .is_some_and(|call| !call.is_null())
    }

    pub fn function_call(&self) -> Option<FunctionCall> {
        self.envelope
            .get("function_call")
            .filter(|call| !call.is_null())
            .and_then(|call| serde_json::from_value(call.clone()).ok())
    }

    /// The function call if there is one, else the text.
    pub fn get_result(&self) -> ChatResult {
        match self.function_call() {
            Some(call) => ChatResult::FunctionCall(call),
            None => ChatResult::Text(self.result().to_string()),
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        self.envelope.get_as("usage").ok()
    }

    /// Whether this is the last chunk of a stream.
    pub fn is_end(&self) -> bool {
        self.envelope
            .get("is_end")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn sentence_id(&self) -> Option<i64> {
        self.envelope.get("sentence_id").and_then(Value::as_i64)
    }

    pub fn need_clear_history(&self) -> bool {
        self.envelope
            .get("need_clear_history")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The assistant turn to append to the conversation.
    pub fn to_message(&self) -> Message {
        Message {
            role: Role::Assistant,
            content: self.result().to_string(),
            name: None,
            function_call: self.function_call(),
        }
    }
}

/// Async sequence of streamed chat chunks.
pub type ChatCompletionStream =
    Pin<Box<dyn Stream<Item = ErnieResult<ChatCompletionResponse>> + Send>>;

pub enum ChatCompletionResult {
    Single(ChatCompletionResponse),
    Stream(ChatCompletionStream),
}

impl fmt::Debug for ChatCompletionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(response) => f.debug_tuple("Single").field(response).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Transmission> for ChatCompletionResult {
    fn from(transmission: Transmission) -> Self {
        match transmission {
            Transmission::Single(envelope) => Self::Single(envelope.into()),
            Transmission::Stream(stream) => Self::Stream(Box::pin(
                stream.map(|chunk| chunk.map(ChatCompletionResponse::from)),
            )),
        }
    }
}

impl ChatCompletionResult {
    /// # Errors
    ///
    /// [`ErnieError::ResponseParsing`] if the response was streamed.
    pub fn into_response(self) -> ErnieResult<ChatCompletionResponse> {
        match self {
            Self::Single(response) => Ok(response),
            Self::Stream(_) => Err(ErnieError::response_parsing_error(
                "Expected a single chat completion but received a stream",
            )),
        }
    }

    /// A single response yields once.
    pub fn into_stream(self) -> ChatCompletionStream {
        match self {
            Self::Single(response) => Box::pin(futures_util::stream::iter([Ok(response)])),
            Self::Stream(stream) => stream,
        }
    }
}

/// Blocking iterator over streamed chat chunks.
///
/// Dropping it early releases the connection.
#[derive(Debug)]
pub struct ChatCompletionIter {
    inner: EnvelopeIter,
}

impl ChatCompletionIter {
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl Iterator for ChatCompletionIter {
    type Item = ErnieResult<ChatCompletionResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|chunk| chunk.map(ChatCompletionResponse::from))
    }
}

#[derive(Debug)]
pub enum BlockingChatCompletionResult {
    Single(ChatCompletionResponse),
    Stream(ChatCompletionIter),
}

impl From<BlockingTransmission> for BlockingChatCompletionResult {
    fn from(transmission: BlockingTransmission) -> Self {
        match transmission {
            BlockingTransmission::Single(envelope) => Self::Single(envelope.into()),
            BlockingTransmission::Stream(inner) => Self::Stream(ChatCompletionIter { inner }),
        }
    }
}

impl BlockingChatCompletionResult {
    /// # Errors
    ///
    /// [`ErnieError::ResponseParsing`] if the response was streamed.
    pub fn into_response(self) -> ErnieResult<ChatCompletionResponse> {
        match self {
            Self::Single(response) => Ok(response),
            Self::Stream(_) => Err(ErnieError::response_parsing_error(
                "Expected a single chat completion but received a stream",
            )),
        }
    }
}

/// Chat completion resource.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    resource: Resource,
}

impl ChatCompletion {
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
        CHAT_MODELS.model_names()
    }

    /// Validate `params` and build the request for `api_type`. No I/O.
    pub fn prepare_create(api_type: ApiType, params: &ChatCompletionParams) -> ErnieResult<Request> {
        params.validate()?;
        let path = CHAT_MODELS.path(api_type, &params.model)?;
        let body = serde_json::to_value(params).map_err(|e| {
            ErnieError::invalid_argument(format!("Could not serialize chat parameters: {e}"))
        })?;
        log_debug!(
            model = %params.model,
            messages = params.messages.len(),
            stream = params.stream,
            has_functions = params.functions.is_some(),
            "Prepared chat completion request"
        );
        Ok(params.options.apply(
            Request::post(path)
                .with_json(body)
                .with_stream(params.stream),
        ))
    }

    pub async fn create(&self, params: ChatCompletionParams) -> ErnieResult<ChatCompletionResult> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        resource.request(&request).await.map(ChatCompletionResult::from)
    }

    pub fn create_blocking(
        &self,
        params: ChatCompletionParams,
    ) -> ErnieResult<BlockingChatCompletionResult> {
        let resource = self.resource.derive(params.options.config.as_ref())?;
        let request = Self::prepare_create(resource.api_type(), &params)?;
        resource
            .request_blocking(&request)
            .map(BlockingChatCompletionResult::from)
    }

    /// [`create`](Self::create) with keyword arguments.
    pub async fn create_from_kwargs(&self, kwargs: &Map<String, Value>) -> ErnieResult<ChatCompletionResult> {
        self.create(ChatCompletionParams::from_kwargs(kwargs)?).await
    }
}
