// src/types.rs

//! Small shared vocabulary types: spec identities and the phase lifecycle.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical spec identity type used throughout the engine
/// (e.g. `"local.zlib@1.3"`).
pub type Identity = String;

/// Boxed, sendable future returned by the collaborator traits
/// ([`crate::fetch::Fetcher`], [`crate::exec::RecipeBody`]).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One step of the fixed, totally ordered lifecycle every spec passes through.
///
/// The discriminants double as the `phase_num` values written to trace sinks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    RecipeFetch = 0,
    AssetCheck = 1,
    AssetFetch = 2,
    AssetStage = 3,
    AssetBuild = 4,
    AssetInstall = 5,
    AssetDeploy = 6,
    Completion = 7,
}

/// Needed-by phase applied to dependency edges that do not declare one.
pub const DEFAULT_NEEDED_BY: Phase = Phase::AssetBuild;

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::RecipeFetch,
        Phase::AssetCheck,
        Phase::AssetFetch,
        Phase::AssetStage,
        Phase::AssetBuild,
        Phase::AssetInstall,
        Phase::AssetDeploy,
        Phase::Completion,
    ];

    pub fn num(self) -> u8 {
        self as u8
    }

    pub fn from_num(n: u8) -> Option<Phase> {
        Phase::ALL.get(n as usize).copied()
    }

    /// The phase after this one, or `None` for [`Phase::Completion`].
    pub fn next(self) -> Option<Phase> {
        Phase::from_num(self.num() + 1)
    }

    /// The phase before this one, or `None` for [`Phase::RecipeFetch`].
    pub fn prev(self) -> Option<Phase> {
        self.num().checked_sub(1).and_then(Phase::from_num)
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Completion
    }

    /// Canonical long name, as written to trace sinks.
    pub fn name(self) -> &'static str {
        match self {
            Phase::RecipeFetch => "recipe_fetch",
            Phase::AssetCheck => "asset_check",
            Phase::AssetFetch => "asset_fetch",
            Phase::AssetStage => "asset_stage",
            Phase::AssetBuild => "asset_build",
            Phase::AssetInstall => "asset_install",
            Phase::AssetDeploy => "asset_deploy",
            Phase::Completion => "completion",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts both the short names used in `needed_by` declarations
/// (`"build"`) and the long canonical names (`"asset_build"`).
impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        let short = normalized.strip_prefix("asset_").unwrap_or(&normalized);
        match short {
            "recipe_fetch" => Ok(Phase::RecipeFetch),
            "check" => Ok(Phase::AssetCheck),
            "fetch" => Ok(Phase::AssetFetch),
            "stage" => Ok(Phase::AssetStage),
            "build" => Ok(Phase::AssetBuild),
            "install" => Ok(Phase::AssetInstall),
            "deploy" => Ok(Phase::AssetDeploy),
            "completion" => Ok(Phase::Completion),
            other => Err(format!(
                "invalid phase name: {other} (expected one of recipe_fetch, check, fetch, \
                 stage, build, install, deploy, completion)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_totally_ordered_and_numbered() {
        for (i, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.num() as usize, i);
            assert_eq!(Phase::from_num(i as u8), Some(*phase));
        }
        assert!(Phase::RecipeFetch < Phase::AssetCheck);
        assert!(Phase::AssetDeploy < Phase::Completion);
        assert_eq!(Phase::Completion.next(), None);
        assert_eq!(Phase::RecipeFetch.prev(), None);
        assert_eq!(Phase::AssetBuild.prev(), Some(Phase::AssetStage));
    }

    #[test]
    fn parses_short_and_long_names() {
        assert_eq!("build".parse::<Phase>(), Ok(Phase::AssetBuild));
        assert_eq!("asset_build".parse::<Phase>(), Ok(Phase::AssetBuild));
        assert_eq!(" Stage ".parse::<Phase>(), Ok(Phase::AssetStage));
        assert_eq!("recipe-fetch".parse::<Phase>(), Ok(Phase::RecipeFetch));
        assert_eq!("completion".parse::<Phase>(), Ok(Phase::Completion));
        assert!("compile".parse::<Phase>().is_err());
    }

    #[test]
    fn default_needed_by_is_build() {
        assert_eq!(DEFAULT_NEEDED_BY, Phase::AssetBuild);
    }
}
