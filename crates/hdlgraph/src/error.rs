use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::graph::{ConstructionSite, NodeId};

/// A violated invariant of the core itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("internal error at {file}:{line}: `{condition}` failed{}", hint_suffix(.hint))]
pub struct InternalError {
    pub file: &'static str,
    pub line: u32,
    pub condition: &'static str,
    pub hint: String,
}

fn hint_suffix(hint: &str) -> String {
    if hint.is_empty() {
        String::new()
    } else {
        format!(" ({hint})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesignErrorKind {
    MixedReadWritePort,
    WritePortClockMismatch,
    EnableMismatch,
    AsyncReadFeedsMemory,
    ResetBlocksRetiming,
    NonCombinationalInRetiming,
    FeedbackInRetiming,
    ClockMismatch,
    EnableMismatchRetiming,
    NoRetimingClock,
    MissingSyncRegister,
    TooManyPorts,
    CombinationalLoop,
    InterpretationMismatch,
}

impl DesignErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::MixedReadWritePort => "hdlgraph::memory::mixed_port",
            Self::WritePortClockMismatch => "hdlgraph::memory::write_clock",
            Self::EnableMismatch => "hdlgraph::memory::enable",
            Self::AsyncReadFeedsMemory => "hdlgraph::retiming::async_read",
            Self::ResetBlocksRetiming => "hdlgraph::retiming::reset",
            Self::NonCombinationalInRetiming => "hdlgraph::retiming::non_combinational",
            Self::FeedbackInRetiming => "hdlgraph::retiming::feedback",
            Self::ClockMismatch => "hdlgraph::retiming::clock",
            Self::EnableMismatchRetiming => "hdlgraph::retiming::enable",
            Self::NoRetimingClock => "hdlgraph::retiming::no_clock",
            Self::MissingSyncRegister => "hdlgraph::verify::sync_read",
            Self::TooManyPorts => "hdlgraph::verify::port_count",
            Self::CombinationalLoop => "hdlgraph::sim::loop",
            Self::InterpretationMismatch => "hdlgraph::graph::interpretation",
        }
    }

    fn help(self) -> &'static str {
        match self {
            Self::MixedReadWritePort => "split the access into a dedicated read port and write port",
            Self::WritePortClockMismatch => "drive every write port of one memory from the same clock",
            Self::EnableMismatch => "drive ENABLE and WR_ENABLE of the write port from the same signal",
            Self::AsyncReadFeedsMemory => {
                "register the read data before it reaches another memory"
            }
            Self::ResetBlocksRetiming => {
                "remove the reset from registers behind an asynchronous block memory read"
            }
            Self::NonCombinationalInRetiming => {
                "only combinational logic may sit between a block memory read and its registers"
            }
            Self::FeedbackInRetiming => {
                "register the read data directly, before it is combined with the fed back value"
            }
            Self::ClockMismatch => "registers behind one read port must share a clock",
            Self::EnableMismatchRetiming => "registers behind one read port must share an enable",
            Self::NoRetimingClock => "add a register after the read port or use distributed memory",
            Self::MissingSyncRegister => "add a register directly behind the read data output",
            Self::TooManyPorts => "reduce the number of ports or change the memory kind",
            Self::CombinationalLoop => "break the loop with a register",
            Self::InterpretationMismatch => "convert one operand before combining them",
        }
    }
}

/// One node implicated in a [`DesignError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub role: &'static str,
    pub node: NodeId,
    pub kind: &'static str,
    pub name: Option<String>,
    pub site: ConstructionSite,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} node {}", self.role, self.kind, self.node)?;
        if let Some(name) = &self.name {
            write!(f, " '{name}'")?;
        }
        write!(f, " created at {}", self.site)
    }
}

/// The input circuit breaks a modeling rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DesignError {
    pub kind: DesignErrorKind,
    pub message: String,
    pub sites: Vec<Provenance>,
}

impl DesignError {
    pub fn new(kind: DesignErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sites: Vec::new(),
        }
    }

    pub fn with_site(mut self, site: Provenance) -> Self {
        self.sites.push(site);
        self
    }

    pub fn implicates(&self, node: NodeId) -> bool {
        self.sites.iter().any(|s| s.node == node)
    }

    /// Renders the message followed by one line per implicated node.
    pub fn report(&self) -> String {
        let mut out = self.message.clone();
        for site in &self.sites {
            out.push_str("\n  ");
            out.push_str(&site.to_string());
        }
        out
    }
}

impl Diagnostic for DesignError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.help()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error(transparent)]
    Internal(#[from] InternalError),
    #[error(transparent)]
    Design(#[from] DesignError),
}

impl GraphError {
    pub fn as_design(&self) -> Option<&DesignError> {
        match self {
            GraphError::Design(err) => Some(err),
            GraphError::Internal(_) => None,
        }
    }
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Returns an [`InternalError`] from the enclosing function unless `$cond` holds.
#[macro_export]
macro_rules! internal_assert {
    ($cond:expr) => {
        if !$cond {
            return Err($crate::InternalError {
                file: file!(),
                line: line!(),
                condition: stringify!($cond),
                hint: String::new(),
            }
            .into());
        }
    };
    ($cond:expr, $($hint:tt)+) => {
        if !$cond {
            return Err($crate::InternalError {
                file: file!(),
                line: line!(),
                condition: stringify!($cond),
                hint: format!($($hint)+),
            }
            .into());
        }
    };
}

/// Returns an [`InternalError`] for a state the caller should never reach.
#[macro_export]
macro_rules! internal_bail {
    ($($hint:tt)+) => {
        return Err($crate::InternalError {
            file: file!(),
            line: line!(),
            condition: "unreachable",
            hint: format!($($hint)+),
        }
        .into())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(value: usize) -> Result<(), GraphError> {
        internal_assert!(value < 4, "value was {value}");
        Ok(())
    }

    #[test]
    fn test_internal_assert_reports_condition() {
        assert!(check(3).is_ok());
        let Err(GraphError::Internal(err)) = check(7) else {
            panic!("expected an internal error");
        };
        assert_eq!(err.condition, "value < 4");
        assert_eq!(err.hint, "value was 7");
        assert!(err.file.ends_with("error.rs"));
    }

    #[test]
    fn test_design_error_code() {
        let err = DesignError::new(DesignErrorKind::TooManyPorts, "too many ports");
        assert_eq!(
            err.code().map(|c| c.to_string()).as_deref(),
            Some("hdlgraph::verify::port_count")
        );
        insta::assert_snapshot!(err.report(), @"too many ports");
    }
}
