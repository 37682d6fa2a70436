use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("part result name {key} does not match pattern {pattern}")]
    MalformedPartName { key: String, pattern: String },

    #[error("part {index} of {document} was delivered more than once ({first}, {second})")]
    DuplicatePart {
        document: String,
        index: usize,
        first: String,
        second: String,
    },

    #[error("part {index} of {document} exceeds the expected total of {expected}")]
    UnexpectedPart {
        document: String,
        index: usize,
        expected: usize,
    },

    #[error("page key {0:?} is not a page number")]
    InvalidPageKey(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("part store error: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("prompt exceeds the model context window: {0}")]
    ContextTooLong(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("cannot answer {question:?} with 0 pages of context")]
    ContextExhausted { question: String },

    #[error("no page embeddings available to rank")]
    NoPages,

    #[error("embedding for page {page} has {found} dimensions, question has {expected}")]
    DimensionMismatch {
        page: u32,
        expected: usize,
        found: usize,
    },

    #[error("page {0} was ranked but has no text")]
    MissingPageText(u32),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Model(#[from] ModelError),
}
