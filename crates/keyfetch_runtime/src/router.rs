//! Command router.
//!
//! Filters incoming commands down to fetches and clears, and expands every
//! refetch into a clear immediately followed by a fetch for the same key.

use keyfetch_core::{Command, DataKey, FetchRequest, Origin};

/// A command together with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The command
    pub command: Command,
    /// Caller or engine
    pub origin: Origin,
}

impl Envelope {
    /// Wrap a caller command
    #[must_use]
    pub fn external(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
            origin: Origin::External,
        }
    }

    /// Wrap an engine-produced command
    #[must_use]
    pub fn synthesized(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
            origin: Origin::Synthesized,
        }
    }
}

/// Operation carried by a routed command
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedOp {
    /// Forget the key and cancel its task
    Clear,
    /// Admit the request unless the key is satisfied
    Fetch(FetchRequest),
}

/// A command after routing, keyed
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCommand {
    /// Target key
    pub key: DataKey,
    /// What to do with it
    pub op: RoutedOp,
    /// Origin of the envelope this came from
    pub origin: Origin,
}

impl RoutedCommand {
    /// Whether this is a clear
    #[must_use]
    pub const fn is_clear(&self) -> bool {
        matches!(self.op, RoutedOp::Clear)
    }
}

/// Route one envelope into zero, one or two keyed commands
///
/// The clear produced by a refetch always directly precedes its fetch.
#[must_use]
pub fn route(envelope: Envelope) -> Vec<RoutedCommand> {
    let origin = envelope.origin;
    match envelope.command {
        Command::FetchRequest(request) => {
            let key = request.key();
            let refetch = request.policy.is_refetch();
            let fetch = RoutedCommand {
                key: key.clone(),
                op: RoutedOp::Fetch(request),
                origin,
            };
            if refetch {
                vec![
                    RoutedCommand {
                        key,
                        op: RoutedOp::Clear,
                        origin,
                    },
                    fetch,
                ]
            } else {
                vec![fetch]
            }
        }
        Command::CacheClear(clear) => vec![RoutedCommand {
            key: clear.key(),
            op: RoutedOp::Clear,
            origin,
        }],
        Command::Other => Vec::new(),
    }
}
