pub mod wire;

pub mod llm {
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::Stream;
    use serde::{Deserialize, Serialize};
    use std::pin::Pin;
    use thiserror::Error;

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        User,
        Assistant,
        System,
    }

    impl Role {
        pub fn as_str(&self) -> &'static str {
            match self {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            }
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    pub struct ChatMessage {
        pub role: Role,
        pub content: String,
    }

    impl ChatMessage {
        pub fn user<S: Into<String>>(s: S) -> Self {
            Self {
                role: Role::User,
                content: s.into(),
            }
        }
        pub fn assistant<S: Into<String>>(s: S) -> Self {
            Self {
                role: Role::Assistant,
                content: s.into(),
            }
        }
        pub fn system<S: Into<String>>(s: S) -> Self {
            Self {
                role: Role::System,
                content: s.into(),
            }
        }
    }

    /// Ordered chat history owned by the client for one session.
    ///
    /// Messages are only ever appended; turn order is insertion order.
    #[derive(Clone, Debug, Default)]
    pub struct Conversation {
        messages: Vec<ChatMessage>,
    }

    impl Conversation {
        pub fn new() -> Self {
            Self::default()
        }
        pub fn push(&mut self, msg: ChatMessage) {
            self.messages.push(msg);
        }
        pub fn push_user<S: Into<String>>(&mut self, s: S) {
            self.push(ChatMessage::user(s));
        }
        pub fn push_assistant<S: Into<String>>(&mut self, s: S) {
            self.push(ChatMessage::assistant(s));
        }
        pub fn clear(&mut self) {
            self.messages.clear();
        }
        pub fn messages(&self) -> &[ChatMessage] {
            &self.messages
        }
        pub fn len(&self) -> usize {
            self.messages.len()
        }
        pub fn is_empty(&self) -> bool {
            self.messages.is_empty()
        }
    }

    /// One incremental fragment of an assistant reply.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct StreamChunk {
        pub delta_content: String,
        pub is_final: bool,
    }

    #[derive(Clone, Debug)]
    pub struct ChatOpts {
        pub model: String,
    }

    #[derive(Error, Debug)]
    pub enum ChatError {
        #[error("bad request: {0}")]
        BadRequest(String),
        #[error("backend unreachable: {0}")]
        BackendUnreachable(String),
        #[error("stream failed mid-reply after {} bytes", partial.len())]
        MidStreamFailure { partial: String },
        #[error("stream closed without a terminal marker after {} bytes", partial.len())]
        AbnormalTermination { partial: String },
        #[error("timeout: {0}")]
        Timeout(String),
        #[error("network: {0}")]
        Network(String),
        #[error("decode: {0}")]
        Decode(String),
        #[error("canceled")]
        Canceled,
        #[error("other: {0}")]
        Other(String),
    }

    impl ChatError {
        /// Text received before the failure, for variants that carry it.
        pub fn partial_reply(&self) -> Option<&str> {
            match self {
                ChatError::MidStreamFailure { partial }
                | ChatError::AbnormalTermination { partial } => Some(partial),
                _ => None,
            }
        }

        pub fn with_partial(self, text: &str) -> Self {
            match self {
                ChatError::MidStreamFailure { .. } => ChatError::MidStreamFailure {
                    partial: text.to_string(),
                },
                ChatError::AbnormalTermination { .. } => ChatError::AbnormalTermination {
                    partial: text.to_string(),
                },
                other => other,
            }
        }
    }

    pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

    /// A streaming inference backend.
    ///
    /// `stream_chat` resolves once the backend has accepted the request; the
    /// returned stream carries the backend's raw response bytes untouched.
    #[async_trait]
    pub trait ModelClient: Send + Sync {
        async fn stream_chat(
            &self,
            msgs: &[ChatMessage],
            opts: &ChatOpts,
        ) -> Result<ByteStream, ChatError>;
    }

}

pub mod pod {
    use async_trait::async_trait;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum PodError {
        #[error("pod control is not configured")]
        NotConfigured,
        #[error("network: {0}")]
        Network(String),
        #[error("provider api: {0}")]
        Api(String),
        #[error("decode: {0}")]
        Decode(String),
    }

    /// Lifecycle control of the compute instance hosting the backend.
    ///
    /// Both operations express intent and may be repeated; the payload is
    /// whatever status the provider reports.
    #[async_trait]
    pub trait PodController: Send + Sync {
        async fn ensure_running(&self) -> Result<serde_json::Value, PodError>;
        async fn ensure_stopped(&self) -> Result<serde_json::Value, PodError>;
    }
}
