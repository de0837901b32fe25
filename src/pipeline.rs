//! Question Answering Pipeline
//!
//! Drives load → chunk → embed/index → retrieve → prompt → generate for one
//! document. A [`DocumentSession`] owns the document, its chunks and its
//! index; nothing is shared between sessions. Loading and chunking run on
//! the blocking pool. The index is built by the first question that needs
//! it and reused by every later one; a failed build fails only the question
//! that attempted it, and the next question retries.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::answer::{Answer, AnswerEngine, ChatModel, GenerationError, PromptAssembler};
use crate::config::{ConfigError, Credentials, EmbeddingProvider, QaConfig, DEFAULT_MAX_CONCURRENT_QUESTIONS};
use crate::context::{Cl100kTokenizer, TokenLength, TokenizerError};
use crate::documents::index::DEFAULT_BATCH_SIZE;
use crate::documents::{
    ChunkedDocument, Chunker, ChunkerError, Document, DocumentLoader, Embedder, EmbeddingError,
    FileLoader, HashingEmbedder, IndexError, LoadError, RetrievalResult, Retriever, RetrieverError,
    VectorIndex,
};
use crate::openai::{ClientError, OpenAiChatModel, OpenAiClient, OpenAiEmbedder};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Chunker(#[from] ChunkerError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<RetrieverError> for PipelineError {
    fn from(e: RetrieverError) -> Self {
        match e {
            RetrieverError::Embedding(e) => PipelineError::Embedding(e),
            RetrieverError::Index(e) => PipelineError::Index(e),
        }
    }
}

impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Session stages. `Idle → Chunked → Indexed` belong to the session;
/// `Retrieved → Prompted → Answered` are traced per question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Chunked,
    Indexed,
    Retrieved,
    Prompted,
    Answered,
}

/// Result for one question of a batch
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QuestionOutcome {
    Answered(Answer),
    Failed { error: PipelineError },
}

impl QuestionOutcome {
    pub fn answer(&self) -> Option<&Answer> {
        match self {
            QuestionOutcome::Answered(answer) => Some(answer),
            QuestionOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            QuestionOutcome::Answered(_) => None,
            QuestionOutcome::Failed { error } => Some(error),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, QuestionOutcome::Answered(_))
    }
}

impl From<Result<Answer, PipelineError>> for QuestionOutcome {
    fn from(result: Result<Answer, PipelineError>) -> Self {
        match result {
            Ok(answer) => QuestionOutcome::Answered(answer),
            Err(error) => QuestionOutcome::Failed { error },
        }
    }
}

pub struct QaPipeline {
    loader: Arc<dyn DocumentLoader>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    retriever: Retriever,
    assembler: PromptAssembler,
    engine: AnswerEngine,
    batch_size: usize,
    max_concurrent_questions: usize,
}

impl QaPipeline {
    pub fn new(chunker: Chunker, embedder: Arc<dyn Embedder>, chat: Arc<dyn ChatModel>) -> Self {
        Self {
            loader: Arc::new(FileLoader::new()),
            chunker,
            embedder,
            retriever: Retriever::default(),
            assembler: PromptAssembler::new(),
            engine: AnswerEngine::new(chat),
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_questions: DEFAULT_MAX_CONCURRENT_QUESTIONS,
        }
    }

    /// Wire every component from configuration. Credentials are passed in,
    /// never read from the environment.
    pub fn from_config(config: &QaConfig, credentials: &Credentials) -> Result<Self, PipelineError> {
        config.validate()?;

        let tokenizer: Arc<dyn TokenLength> = Arc::new(Cl100kTokenizer::new()?);
        let chunker = Chunker::new(config.chunking.clone(), tokenizer.clone())?;

        let embedding = &config.embedding;
        let embedder: Arc<dyn Embedder> = match embedding.provider {
            EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(embedding.dimensions)),
            EmbeddingProvider::OpenAi => {
                let key = credentials.require("the embedding backend")?;
                let client = OpenAiClient::new(&embedding.base_url, key, embedding.timeout())?;
                Arc::new(
                    OpenAiEmbedder::new(client, &embedding.model, embedding.dimensions, tokenizer)
                        .with_batch_size(embedding.batch_size)
                        .with_max_input_tokens(embedding.max_input_tokens),
                )
            }
        };

        let chat = &config.chat;
        let key = credentials.require("the chat backend")?;
        let client = OpenAiClient::new(&chat.base_url, key, chat.timeout())?;
        let chat_model = OpenAiChatModel::new(client, &chat.model).with_temperature(chat.temperature);

        info!(
            embedder = %embedder.model(),
            chat = %chat_model.model(),
            top_k = config.retrieval.top_k,
            "Pipeline configured"
        );

        Ok(Self::new(chunker, embedder, Arc::new(chat_model))
            .with_retriever(Retriever::new(config.retrieval.top_k))
            .with_batch_size(embedding.batch_size)
            .with_max_concurrent_questions(config.pipeline.max_concurrent_questions))
    }

    pub fn with_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrent_questions(mut self, max: usize) -> Self {
        self.max_concurrent_questions = max.max(1);
        self
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Load a document on the blocking pool and start a session for it.
    pub async fn open_session(&self, path: &Path) -> Result<DocumentSession<'_>, PipelineError> {
        let loader = self.loader.clone();
        let owned = path.to_path_buf();
        let document = tokio::task::spawn_blocking(move || loader.load(&owned))
            .await
            .map_err(|e| LoadError::ParseError(format!("{}: loader task failed: {}", path.display(), e)))??;
        Ok(self.session(document))
    }

    /// Start a session for an already loaded document.
    pub fn session(&self, document: Document) -> DocumentSession<'_> {
        let id = Ulid::new().to_string();
        info!(session = %id, document = %document.id(), "Session opened");
        DocumentSession {
            id,
            pipeline: self,
            document: Arc::new(document),
            chunked: OnceCell::new(),
            index: OnceCell::new(),
        }
    }

    pub async fn answer_question(&self, path: impl AsRef<Path>, question: &str) -> Result<Answer, PipelineError> {
        let session = self.open_session(path.as_ref()).await?;
        session.ask(question).await
    }

    /// Answer every question against one shared index.
    ///
    /// Only a load failure aborts the batch. Any later failure, including a
    /// failed index build, is reported in that question's own entry.
    /// Duplicate question strings collapse to a single entry.
    pub async fn answer_questions<Q: AsRef<str>>(
        &self,
        path: impl AsRef<Path>,
        questions: &[Q],
    ) -> Result<BTreeMap<String, QuestionOutcome>, PipelineError> {
        let session = self.open_session(path.as_ref()).await?;
        if questions.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(session.ask_all(questions).await)
    }

    /// Like [`answer_questions`](Self::answer_questions), but the first
    /// failing question fails the whole batch.
    pub async fn answer_questions_all_or_nothing<Q: AsRef<str>>(
        &self,
        path: impl AsRef<Path>,
        questions: &[Q],
    ) -> Result<BTreeMap<String, Answer>, PipelineError> {
        let outcomes = self.answer_questions(path, questions).await?;
        let mut answers = BTreeMap::new();
        for (question, outcome) in outcomes {
            match outcome {
                QuestionOutcome::Answered(answer) => {
                    answers.insert(question, answer);
                }
                QuestionOutcome::Failed { error } => return Err(error),
            }
        }
        Ok(answers)
    }
}

/// One document's answering session.
pub struct DocumentSession<'p> {
    id: String,
    pipeline: &'p QaPipeline,
    document: Arc<Document>,
    chunked: OnceCell<ChunkedDocument>,
    index: OnceCell<VectorIndex>,
}

impl<'p> DocumentSession<'p> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn stage(&self) -> Stage {
        if self.index.initialized() {
            Stage::Indexed
        } else if self.chunked.initialized() {
            Stage::Chunked
        } else {
            Stage::Idle
        }
    }

    /// Split the document on the blocking pool. Repeated calls return the
    /// same chunks.
    pub async fn chunk(&self) -> Result<&ChunkedDocument, PipelineError> {
        self.chunked
            .get_or_try_init(|| async {
                let chunker = self.pipeline.chunker.clone();
                let document = self.document.clone();
                let chunked = tokio::task::spawn_blocking(move || chunker.split(&document))
                    .await
                    .map_err(|e| ChunkerError::Interrupted(e.to_string()))?;
                debug!(
                    session = %self.id,
                    stage = ?Stage::Chunked,
                    chunks = chunked.chunks.len(),
                    handling = ?chunked.handling,
                    "Document chunked"
                );
                Ok::<_, PipelineError>(chunked)
            })
            .await
    }

    /// Embed every chunk and build the index, chunking first if needed.
    ///
    /// Concurrent callers wait for a single build. A failed build leaves the
    /// session unindexed, so the next call tries again.
    pub async fn build_index(&self) -> Result<&VectorIndex, PipelineError> {
        self.index
            .get_or_try_init(|| async {
                let chunks = self.chunk().await?.chunks.clone();
                let pipeline = self.pipeline;
                let index = VectorIndex::build(chunks, pipeline.embedder.as_ref(), pipeline.batch_size)
                    .await
                    .map_err(|e| {
                        warn!(session = %self.id, error = %e, "Index build failed");
                        e
                    })?;
                info!(session = %self.id, stage = ?Stage::Indexed, chunks = index.len(), "Session indexed");
                Ok::<_, PipelineError>(index)
            })
            .await
    }

    /// The built index, or [`IndexError::NotBuilt`] before `Indexed`.
    pub fn index(&self) -> Result<&VectorIndex, IndexError> {
        self.index.get().ok_or(IndexError::NotBuilt)
    }

    /// Retrieve the top chunks for a question from the built index.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult, PipelineError> {
        let pipeline = self.pipeline;
        let retrieved = pipeline.retriever.retrieve(self.index()?, question, pipeline.embedder.as_ref()).await?;
        debug!(session = %self.id, stage = ?Stage::Retrieved, hits = retrieved.len(), "Question");
        Ok(retrieved)
    }

    /// Answer one question, building the index first if no earlier
    /// question has.
    pub async fn ask(&self, question: &str) -> Result<Answer, PipelineError> {
        self.build_index().await?;
        let pipeline = self.pipeline;

        let retrieved = self.retrieve(question).await?;

        let prompt = pipeline.assembler.assemble(retrieved.chunks(), question);
        debug!(session = %self.id, stage = ?Stage::Prompted, chars = prompt.user.len(), "Question");

        let answer = pipeline.engine.generate(&prompt).await?;
        debug!(
            session = %self.id,
            stage = ?Stage::Answered,
            not_available = answer.is_not_available(),
            "Question"
        );
        Ok(answer)
    }

    /// Answer each distinct question, at most `max_concurrent_questions` at a time.
    pub async fn ask_all<Q: AsRef<str>>(&self, questions: &[Q]) -> BTreeMap<String, QuestionOutcome> {
        let distinct: BTreeSet<String> = questions.iter().map(|q| q.as_ref().to_string()).collect();
        if distinct.len() < questions.len() {
            debug!(
                session = %self.id,
                submitted = questions.len(),
                distinct = distinct.len(),
                "Duplicate questions collapsed"
            );
        }

        let results: Vec<(String, Result<Answer, PipelineError>)> = stream::iter(distinct)
            .map(|question| async move {
                let result = self.ask(&question).await;
                (question, result)
            })
            .buffer_unordered(self.pipeline.max_concurrent_questions)
            .collect()
            .await;

        results.into_iter()
            .map(|(question, result)| {
                if let Err(e) = &result {
                    warn!(session = %self.id, question = %question, error = %e, "Question failed");
                }
                (question, QuestionOutcome::from(result))
            })
            .collect()
    }
}
