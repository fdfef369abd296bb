//! Error types for the AQL execution engine.
//!
//! All fallible engine operations return [`AqlResult`]. The error enum is
//! serializable so that cluster peers can ship errors across the wire as
//! `{errorNum, errorMessage}` pairs and reconstruct them on the other side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for AQL engine operations.
pub type AqlResult<T> = Result<T, AqlError>;

/// An error that occurred during query execution.
///
/// Variants map 1:1 onto numeric wire codes (see [`AqlError::code`]); any
/// code not produced by this engine deserializes to [`AqlError::Internal`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AqlError {
    /// The query was marked as killed while an operator was running.
    #[error("query killed")]
    QueryKilled,

    /// An allocation failed or a resource limit was exceeded. Fatal to the
    /// query.
    #[error("out of memory")]
    OutOfMemory,

    /// A value that must be an array (FOR loop operand, IN right-hand side)
    /// was something else.
    #[error("array expected {context}")]
    ArrayExpected {
        /// Where the non-array value was encountered.
        context: String,
    },

    /// A mutation referenced a document that does not exist.
    #[error("document not found")]
    DocumentNotFound,

    /// A `_id`/`_from`/`_to` value did not parse as `collection/key`.
    #[error("illegal document handle")]
    DocumentHandleBad,

    /// A mutation input carried no usable `_key`.
    #[error("document key missing")]
    DocumentKeyMissing,

    /// A mutation input had the wrong shape (e.g. a number where an object
    /// was required).
    #[error("invalid document type: {got}")]
    DocumentTypeInvalid {
        /// Short description of the offending value's type.
        got: String,
    },

    /// A routed insert carried a `_key` although the target collection
    /// shards on other attributes.
    #[error("must not specify _key for this collection")]
    MustNotSpecifyKey,

    /// A collection referenced by the plan could not be resolved.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// The unresolved collection name or id.
        name: String,
    },

    /// An index referenced by the plan does not exist on the collection.
    #[error("index not found")]
    IndexNotFound,

    /// The peer has no query registered under the given id. Tolerated during
    /// remote shutdown, an error everywhere else.
    #[error("query not found")]
    QueryNotFound,

    /// A cluster-internal request did not complete within its deadline.
    #[error("cluster timeout: {message}")]
    ClusterTimeout {
        /// Transport-level detail.
        message: String,
    },

    /// The connection to a cluster peer broke before a response arrived.
    #[error("cluster connection lost: {message}")]
    ClusterConnectionLost {
        /// Transport-level detail.
        message: String,
    },

    /// A peer answered, but with something the engine could not make sense
    /// of.
    #[error("cluster communication error: {message}")]
    ClusterCommunication {
        /// What was wrong with the response.
        message: String,
    },

    /// The request asked for something the engine does not implement.
    #[error("unsupported: {message}")]
    Unsupported {
        /// What was requested.
        message: String,
    },

    /// An internal invariant was violated. Always a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl AqlError {
    /// The numeric wire code for this error.
    pub fn code(&self) -> i32 {
        match self {
            AqlError::QueryKilled => 1500,
            AqlError::OutOfMemory => 3,
            AqlError::ArrayExpected { .. } => 1563,
            AqlError::DocumentNotFound => 1202,
            AqlError::DocumentHandleBad => 1205,
            AqlError::DocumentKeyMissing => 1221,
            AqlError::DocumentTypeInvalid { .. } => 1227,
            AqlError::MustNotSpecifyKey => 1466,
            AqlError::CollectionNotFound { .. } => 1203,
            AqlError::IndexNotFound => 1209,
            AqlError::QueryNotFound => 1591,
            AqlError::ClusterTimeout { .. } => 1457,
            AqlError::ClusterConnectionLost { .. } => 1458,
            AqlError::ClusterCommunication { .. } => 1474,
            AqlError::Unsupported { .. } => 10,
            AqlError::Internal { .. } => 4,
        }
    }

    /// Reconstruct an error from a wire code and message, as received from a
    /// cluster peer.
    pub fn from_code(code: i32, message: String) -> Self {
        match code {
            1500 => AqlError::QueryKilled,
            3 => AqlError::OutOfMemory,
            1563 => AqlError::ArrayExpected { context: message },
            1202 => AqlError::DocumentNotFound,
            1205 => AqlError::DocumentHandleBad,
            1221 => AqlError::DocumentKeyMissing,
            1227 => AqlError::DocumentTypeInvalid { got: message },
            1466 => AqlError::MustNotSpecifyKey,
            1203 => AqlError::CollectionNotFound { name: message },
            1209 => AqlError::IndexNotFound,
            1591 => AqlError::QueryNotFound,
            1457 => AqlError::ClusterTimeout { message },
            1458 => AqlError::ClusterConnectionLost { message },
            1474 => AqlError::ClusterCommunication { message },
            10 => AqlError::Unsupported { message },
            _ => AqlError::Internal { message },
        }
    }

    /// Whether this error may be counted instead of surfaced when a mutation
    /// operator runs with `ignore_errors`.
    pub fn is_ignorable_write_error(&self) -> bool {
        matches!(
            self,
            AqlError::DocumentNotFound
                | AqlError::DocumentHandleBad
                | AqlError::DocumentKeyMissing
                | AqlError::DocumentTypeInvalid { .. }
        )
    }
}

/// Construct an [`AqlError::Internal`] with a formatted message.
#[macro_export]
macro_rules! internal_err {
    ($($format_args:tt)*) => {
        $crate::AqlError::Internal {
            message: format!($($format_args)*),
        }
    };
}

/// Return early with an [`AqlError::Internal`].
#[macro_export]
macro_rules! internal {
    ($($format_args:tt)*) => {
        return Err($crate::internal_err!($($format_args)*).into())
    };
}

/// Construct an [`AqlError::Unsupported`] with a formatted message.
#[macro_export]
macro_rules! unsupported_err {
    ($($format_args:tt)*) => {
        $crate::AqlError::Unsupported {
            message: format!($($format_args)*),
        }
    };
}

/// Return early with an [`AqlError::Unsupported`].
#[macro_export]
macro_rules! unsupported {
    ($($format_args:tt)*) => {
        return Err($crate::unsupported_err!($($format_args)*).into())
    };
}

/// Return early with an [`AqlError::Internal`] if the given condition does
/// not hold.
#[macro_export]
macro_rules! invariant {
    ($expr:expr) => {
        if !$expr {
            $crate::internal!("invariant failed: {}", stringify!($expr));
        }
    };
    ($expr:expr, $($format_args:tt)*) => {
        if !$expr {
            $crate::internal!($($format_args)*);
        }
    };
}

/// Return early with an [`AqlError::Internal`] if the two expressions are
/// not equal.
#[macro_export]
macro_rules! invariant_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            $crate::internal!(
                "invariant failed: {} == {} ({:?} != {:?})",
                stringify!($left),
                stringify!($right),
                $left,
                $right
            );
        }
    };
}
