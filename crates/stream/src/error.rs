use thiserror::Error;

/// Configuration rejected before it reaches the broker.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ConfigError {
    /// The requested update can't be applied in place.
    #[error("stream `{stream}` can't be updated in place: {fields:?} changed incompatibly")]
    IncompatibleUpdate {
        /// Stream name.
        stream: String,

        /// Offending fields.
        fields: Vec<&'static str>,
    },

    /// Invalid stream or consumer name.
    #[error("invalid name `{0}`")]
    InvalidName(String),

    /// Invalid subject or subject pattern.
    #[error("invalid subject `{subject}`: {reason}")]
    InvalidSubject {
        /// The subject.
        subject: String,

        /// What is wrong with it.
        reason: &'static str,
    },

    /// A stream needs at least one subject.
    #[error("stream `{0}` has no subjects")]
    NoSubjects(String),

    /// Replica count out of range.
    #[error("replica count {0} out of range")]
    Replicas(usize),

    /// The adapter is bound to a different stream.
    #[error("adapter is bound to stream `{bound}`, not `{requested}`")]
    StreamMismatch {
        /// Stream the adapter was built for.
        bound: String,

        /// Stream named by the request.
        requested: String,
    },

    /// A limit was set to zero.
    #[error("`{0}` must be greater than zero")]
    ZeroLimit(&'static str),
}
