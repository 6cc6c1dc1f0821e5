use std::fmt::Display;

use crate::{Vertex, plugin::error::PluginDataError};

#[derive(Clone, Default, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CyclicInteractionError {
    cycle: Vec<Vertex>,
}

impl CyclicInteractionError {
    pub(crate) fn new(cycle: Vec<Vertex>) -> Self {
        Self { cycle }
    }

    pub(crate) fn into_cycle(self) -> Vec<Vertex> {
        self.cycle
    }
}

impl Display for CyclicInteractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cycle = display_cycle(&self.cycle);
        write!(f, "cyclic interaction detected: {cycle}")
    }
}

impl std::error::Error for CyclicInteractionError {}

pub(crate) fn display_cycle(cycle: &[Vertex]) -> String {
    cycle
        .iter()
        .map(|v| {
            if let Some(edge_type) = v.out_edge_type() {
                format!("{} --[{}]-> ", v.name(), edge_type)
            } else {
                v.name().to_owned()
            }
        })
        .chain(cycle.first().iter().map(|v| v.name().to_owned()))
        .collect()
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum PathfindingError {
    PrecedingNodeNotFound(String),
    FollowingNodeNotFound(String),
}

impl Display for PathfindingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrecedingNodeNotFound(n) => write!(
                f,
                "unexpectedly could not find the node before \"{n}\" in the path that was found",
            ),
            Self::FollowingNodeNotFound(n) => write!(
                f,
                "unexpectedly could not find the node after \"{n}\" in the path that was found",
            ),
        }
    }
}

impl std::error::Error for PathfindingError {}

#[derive(Debug)]
pub(crate) enum PluginGraphValidationError {
    CycleFound(CyclicInteractionError),
    PluginDataError(PluginDataError),
}

impl Display for PluginGraphValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleFound(_) => write!(f, "found a cycle in the plugin graph"),
            Self::PluginDataError(_) => write!(f, "failed to read plugin data"),
        }
    }
}

impl std::error::Error for PluginGraphValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CycleFound(e) => Some(e),
            Self::PluginDataError(e) => Some(e),
        }
    }
}

impl From<CyclicInteractionError> for PluginGraphValidationError {
    fn from(value: CyclicInteractionError) -> Self {
        PluginGraphValidationError::CycleFound(value)
    }
}

impl From<PluginDataError> for PluginGraphValidationError {
    fn from(value: PluginDataError) -> Self {
        PluginGraphValidationError::PluginDataError(value)
    }
}

#[derive(Debug)]
pub(crate) enum SortingError {
    ValidationError(PluginGraphValidationError),
    CycleFound(CyclicInteractionError),
    CycleInvolving(String),
    PluginDataError(PluginDataError),
    PathfindingError(PathfindingError),
}

impl Display for SortingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ValidationError(_) => write!(f, "plugin graph validation failed"),
            Self::CycleFound(_) => write!(f, "found a cycle"),
            Self::CycleInvolving(n) => write!(f, "found a cycle involving \"{n}\""),
            Self::PluginDataError(_) => write!(f, "failed to read plugin data"),
            Self::PathfindingError(_) => write!(f, "failed to find a path in the plugins graph"),
        }
    }
}

impl std::error::Error for SortingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ValidationError(e) => Some(e),
            Self::CycleFound(e) => Some(e),
            Self::CycleInvolving(_) => None,
            Self::PluginDataError(e) => Some(e),
            Self::PathfindingError(e) => Some(e),
        }
    }
}

impl From<PluginGraphValidationError> for SortingError {
    fn from(value: PluginGraphValidationError) -> Self {
        SortingError::ValidationError(value)
    }
}

impl From<CyclicInteractionError> for SortingError {
    fn from(value: CyclicInteractionError) -> Self {
        SortingError::CycleFound(value)
    }
}

impl From<PluginDataError> for SortingError {
    fn from(value: PluginDataError) -> Self {
        SortingError::PluginDataError(value)
    }
}

impl From<PathfindingError> for SortingError {
    fn from(value: PathfindingError) -> Self {
        SortingError::PathfindingError(value)
    }
}
