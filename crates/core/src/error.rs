use crate::service::RemoteError;

/// All errors surfaced by the mapping layer.
///
/// Remote failures are carried unchanged inside [`Error::Remote`], annotated
/// only with the logical operation that was in flight; nothing is retried or
/// reinterpreted here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Lookup by identifier, URI or filename resolved to nothing. Driven by
    /// the service's own unresolvable marker, never inferred from empty
    /// fields.
    #[error("{kind} '{id}' was not found")]
    NotFound { kind: &'static str, id: String },

    /// An enum or custom-field value failed catalog validation.
    #[error("'{value}' is not a valid value for field '{field}'")]
    InvalidFieldValue { field: String, value: String },

    /// An add-record operation targets a case already executed in the run.
    #[error("test case '{test_case_id}' is already part of the test run")]
    DuplicateRecord { test_case_id: String },

    /// The case is not part of this run, or has not been executed yet.
    #[error("test case '{test_case_id}' is not part of this test run or has not been executed")]
    RecordNotFound { test_case_id: String },

    /// A record or step index past the current effective count.
    #[error("index {index} is out of range: there are only {count} {what}")]
    IndexOutOfRange {
        index: usize,
        count: usize,
        what: &'static str,
    },

    /// No attribute with this name is mapped for the entity type.
    #[error("no attribute '{name}' is mapped for this entity type")]
    UnknownField { name: String },

    /// The operation requires an entity obtained by identifier or URI; the
    /// caller passed a newly constructed blank one.
    #[error("operation requires a populated {kind}; construct it by identifier or uri first")]
    Unpopulated { kind: &'static str },

    /// The custom-field schema document could not be fetched or parsed, or
    /// names an entity marker the registry does not know.
    #[error("custom field schema for project '{project_id}': {message}")]
    Schema { project_id: String, message: String },

    /// The transport or remote service reported a failure.
    #[error("{operation} failed: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },
}

impl Error {
    /// Annotate a transport failure with the logical operation in flight.
    pub fn remote(operation: &'static str, source: RemoteError) -> Self {
        Error::Remote { operation, source }
    }

    pub fn invalid_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Error::InvalidFieldValue {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn schema(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Schema {
            project_id: project_id.into(),
            message: message.into(),
        }
    }
}
