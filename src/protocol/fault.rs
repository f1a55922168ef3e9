//! Remote faults carried by error-class responses.
//!
//! A server reports a failed request as a chain of `(identifier, message)`
//! descriptors, outermost fault first. The identifier names the kind of
//! failure; the client maps it onto a [`FaultKind`] through a fixed registry
//! instead of reconstructing types at runtime. Identifiers the registry does
//! not know still survive verbatim on the [`RemoteFault`], so no server-side
//! detail is lost.

use std::fmt;

use thiserror::Error;

/// Local classification of a server-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Database,
    Storage,
    CommandExecution,
    QueryParsing,
    ConcurrentModification,
    RecordNotFound,
    RecordDuplicated,
    Transaction,
    Validation,
    Security,
    Configuration,
    Serialization,
    Lock,
    Timeout,
    NetworkProtocol,
    /// Identifier not present in the registry.
    Unknown,
}

/// Wire identifiers understood by this client, paired with their kind.
const REGISTRY: &[(&str, FaultKind)] = &[
    ("database", FaultKind::Database),
    ("storage", FaultKind::Storage),
    ("command-execution", FaultKind::CommandExecution),
    ("query-parsing", FaultKind::QueryParsing),
    ("concurrent-modification", FaultKind::ConcurrentModification),
    ("record-not-found", FaultKind::RecordNotFound),
    ("record-duplicated", FaultKind::RecordDuplicated),
    ("transaction", FaultKind::Transaction),
    ("validation", FaultKind::Validation),
    ("security", FaultKind::Security),
    ("configuration", FaultKind::Configuration),
    ("serialization", FaultKind::Serialization),
    ("lock", FaultKind::Lock),
    ("timeout", FaultKind::Timeout),
    ("network-protocol", FaultKind::NetworkProtocol),
];

impl FaultKind {
    /// Looks up a wire identifier; unknown identifiers yield [`FaultKind::Unknown`].
    pub fn lookup(identifier: &str) -> Self {
        REGISTRY
            .iter()
            .find(|(id, _)| *id == identifier)
            .map(|(_, kind)| *kind)
            .unwrap_or(FaultKind::Unknown)
    }

    /// Canonical wire identifier, `None` for [`FaultKind::Unknown`].
    pub fn identifier(self) -> Option<&'static str> {
        REGISTRY
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(id, _)| *id)
    }
}

/// A failure reported by the server, optionally wrapping the fault that
/// caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct RemoteFault {
    kind: FaultKind,
    identifier: String,
    message: Option<String>,
    #[source]
    cause: Option<Box<RemoteFault>>,
}

impl RemoteFault {
    pub fn new(
        identifier: impl Into<String>,
        message: Option<String>,
        cause: Option<RemoteFault>,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            kind: FaultKind::lookup(&identifier),
            identifier,
            message,
            cause: cause.map(Box::new),
        }
    }

    /// Builds a fault of a registered kind.
    pub fn of(kind: FaultKind, message: impl Into<String>) -> Self {
        Self::new(kind.identifier().unwrap_or_default(), Some(message.into()), None)
    }

    /// Wraps `cause` with this fault, returning the new outermost fault.
    pub fn caused_by(mut self, cause: RemoteFault) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Composes a fault from descriptors in wire order (outermost first).
    /// The last descriptor becomes the root cause.
    pub fn from_chain<I>(descriptors: I) -> Option<Self>
    where
        I: IntoIterator<Item = (String, Option<String>)>,
        I::IntoIter: DoubleEndedIterator,
    {
        descriptors
            .into_iter()
            .rev()
            .fold(None, |cause, (identifier, message)| {
                Some(RemoteFault::new(identifier, message, cause))
            })
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// The identifier exactly as the server sent it.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&RemoteFault> {
        self.cause.as_deref()
    }

    /// Iterates from this fault down to the root cause.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    pub fn root_cause(&self) -> &RemoteFault {
        self.chain().last().unwrap_or(self)
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "[{}] {}", self.identifier, message),
            None => write!(f, "[{}]", self.identifier),
        }
    }
}

/// Iterator over a fault and its causes, outermost first.
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    next: Option<&'a RemoteFault>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a RemoteFault;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        assert_eq!(FaultKind::lookup("storage"), FaultKind::Storage);
        assert_eq!(FaultKind::lookup("record-not-found"), FaultKind::RecordNotFound);
        assert_eq!(FaultKind::lookup("Storage"), FaultKind::Unknown);
        assert_eq!(FaultKind::Unknown.identifier(), None);
        assert_eq!(FaultKind::Timeout.identifier(), Some("timeout"));
    }

    #[test]
    fn unknown_identifier_is_kept_verbatim() {
        let fault = RemoteFault::new("acme.QuotaExceeded", Some("quota".into()), None);

        assert_eq!(fault.kind(), FaultKind::Unknown);
        assert_eq!(fault.identifier(), "acme.QuotaExceeded");
        assert_eq!(fault.message(), Some("quota"));
        assert_eq!(fault.to_string(), "[acme.QuotaExceeded] quota");
    }

    #[test]
    fn chain_folds_last_descriptor_into_root() {
        let fault = RemoteFault::from_chain(vec![
            ("X".to_string(), Some("outer".to_string())),
            ("Y".to_string(), Some("inner".to_string())),
        ])
        .unwrap();

        let root_first = fault
            .chain()
            .map(|f| f.identifier())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>();
        assert_eq!(root_first, vec!["Y", "X"]);
        assert_eq!(fault.root_cause().message(), Some("inner"));
        assert_eq!(fault.message(), Some("outer"));
    }

    #[test]
    fn empty_chain_composes_nothing() {
        assert!(RemoteFault::from_chain(Vec::new()).is_none());
    }

    #[test]
    fn source_walks_the_chain() {
        use std::error::Error;

        let fault = RemoteFault::of(FaultKind::Transaction, "commit failed")
            .caused_by(RemoteFault::of(FaultKind::Lock, "timed out on record"));

        let source = fault.source().unwrap();
        assert_eq!(source.to_string(), "[lock] timed out on record");
        assert!(source.source().is_none());
    }
}
