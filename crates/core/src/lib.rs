pub mod citations;
pub mod directive;
pub mod errors;

pub mod llm {
    use futures::Stream;
    use serde::{Deserialize, Serialize};

    use crate::citations::Citation;
    use crate::errors::{ChatError, FinishReason};

    #[derive(Clone, Debug, Default, Serialize)]
    pub struct ChatRequest {
        pub message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub conversation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub max_tokens: Option<u32>,
    }

    impl ChatRequest {
        pub fn new<S: Into<String>>(message: S) -> Self {
            Self {
                message: message.into(),
                ..Self::default()
            }
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    pub struct Document {
        pub document_id: String,
        #[serde(default)]
        pub title: Option<String>,
        #[serde(default)]
        pub url: Option<String>,
        #[serde(default)]
        pub text: Option<String>,
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    pub struct StreamEnd {
        pub finish_reason: FinishReason,
        #[serde(default)]
        pub error: Option<String>,
        #[serde(default)]
        pub text: String,
        #[serde(default)]
        pub generation_id: Option<String>,
        #[serde(default)]
        pub conversation_id: Option<String>,
        #[serde(default)]
        pub citations: Vec<Citation>,
        #[serde(default)]
        pub documents: Vec<Document>,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum StreamEvent {
        StreamStart {
            generation_id: Option<String>,
            conversation_id: Option<String>,
        },
        SearchResults(Vec<Document>),
        TextGeneration(String),
        CitationGeneration(Vec<Citation>),
        StreamEnd(StreamEnd),
    }

    /// Everything a front end keeps about one streamed answer.
    #[derive(Clone, Debug, Default)]
    pub struct ChatResponse {
        pub text: String,
        pub generation_id: String,
        pub conversation_id: Option<String>,
        pub citations: Vec<Citation>,
        pub documents: Vec<Document>,
        pub finish_reason: Option<FinishReason>,
    }

    impl ChatResponse {
        pub fn apply(&mut self, ev: &StreamEvent) {
            match ev {
                StreamEvent::StreamStart {
                    generation_id,
                    conversation_id,
                } => {
                    if let Some(g) = generation_id {
                        self.generation_id = g.clone();
                    }
                    if conversation_id.is_some() {
                        self.conversation_id = conversation_id.clone();
                    }
                }
                StreamEvent::SearchResults(docs) => self.documents.extend(docs.iter().cloned()),
                StreamEvent::TextGeneration(t) => self.text.push_str(t),
                StreamEvent::CitationGeneration(c) => self.citations.extend(c.iter().cloned()),
                StreamEvent::StreamEnd(end) => {
                    // The final event carries the authoritative text and citations.
                    if !end.text.is_empty() {
                        self.text = end.text.clone();
                    }
                    if !end.citations.is_empty() {
                        self.citations = end.citations.clone();
                    }
                    if !end.documents.is_empty() {
                        self.documents = end.documents.clone();
                    }
                    if let Some(g) = &end.generation_id {
                        self.generation_id = g.clone();
                    }
                    if end.conversation_id.is_some() {
                        self.conversation_id = end.conversation_id.clone();
                    }
                    self.finish_reason = Some(end.finish_reason.clone());
                }
            }
        }
    }

    pub type ChatStream<'a> =
        Pin<Box<dyn Stream<Item = Result<StreamEvent, ChatError>> + Send + 'a>>;

    use std::pin::Pin;

    #[allow(async_fn_in_trait)]
    pub trait ChatClient: Send + Sync {
        async fn stream_chat<'a>(&'a self, req: ChatRequest) -> Result<ChatStream<'a>, ChatError>;
    }

}
