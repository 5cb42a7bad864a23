/// A defect in a step or phase definition rather than a problem with the data.
///
/// Contract violations are never turned into ledger events: they abort the phase
/// whatever the error policy is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ContractViolation {
    pub message: String,
}

impl ContractViolation {
    pub fn new(message: impl Into<String>) -> Self {
        ContractViolation {
            message: message.into(),
        }
    }
}

/// Failure raised by a step while processing a row, a batch or the context.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Report the problem and keep going, as the error policy decides
    #[error("{message}")]
    DataError { message: String, row: Option<u64> },

    /// Evict the current row (row steps only)
    #[error("{message}")]
    DropRow { message: String },

    /// Record a warning and keep the row unchanged
    #[error("{message}")]
    Warning { message: String, row: Option<u64> },

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    /// Any other failure; routed through the error policy
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    pub fn data(message: impl Into<String>) -> Self {
        StepError::DataError {
            message: message.into(),
            row: None,
        }
    }

    /// A data error attributed to a specific row, for use in batch steps.
    pub fn data_at(row: u64, message: impl Into<String>) -> Self {
        StepError::DataError {
            message: message.into(),
            row: Some(row),
        }
    }

    pub fn drop_row(message: impl Into<String>) -> Self {
        StepError::DropRow {
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        StepError::Warning {
            message: message.into(),
            row: None,
        }
    }

    pub fn warning_at(row: u64, message: impl Into<String>) -> Self {
        StepError::Warning {
            message: message.into(),
            row: Some(row),
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        StepError::Contract(ContractViolation::new(message))
    }

    pub fn other(error: impl Into<anyhow::Error>) -> Self {
        StepError::Other(error.into())
    }

    /// Row number the failure names explicitly, if any.
    pub fn row(&self) -> Option<u64> {
        match self {
            StepError::DataError { row, .. } | StepError::Warning { row, .. } => *row,
            _ => None,
        }
    }

    /// Message recorded in the ledger for this failure.
    pub fn ledger_message(&self) -> String {
        match self {
            StepError::DataError { message, .. } => format!("DataError raised ({})", message),
            StepError::DropRow { message } | StepError::Warning { message, .. } => {
                message.clone()
            }
            StepError::Contract(violation) => violation.message.clone(),
            StepError::Other(err) => {
                let text = format!("{:#}", err);
                if text.is_empty() {
                    "Error raised.".to_string()
                } else {
                    format!("Error raised ({})", text)
                }
            }
        }
    }
}

/// Errors returned from running a phase.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),

    #[error("Phase '{phase}' stopped in step '{step}': {source}")]
    Stopped {
        phase: String,
        step: String,
        row: Option<u64>,
        #[source]
        source: StepError,
    },

    #[error("No data loaded for phase '{phase}'")]
    NoData { phase: String },

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Errors from loading or saving tabular data and configuration.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV {path} has duplicate column names and cannot reliably be parsed")]
    DuplicateHeaders { path: String },

    #[error("Inconsistent # of fields ({found}, expected {expected}) detected first in record {record}")]
    InconsistentFields {
        record: usize,
        found: usize,
        expected: usize,
    },

    #[error("Expected a JSON array of objects in {path}")]
    NotRecords { path: String },

    #[error("Mapping source '{name}' needs 'key' and 'value' columns")]
    NotAMapping { name: String },
}
