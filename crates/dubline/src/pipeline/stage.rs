use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One named unit of work in the dubbing pipeline. The declaration order is
/// the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Asr,
    Punctuate,
    Translate,
    Tts,
    SeparateMusic,
    Mix,
    ReplaceAudio,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Asr,
        Stage::Punctuate,
        Stage::Translate,
        Stage::Tts,
        Stage::SeparateMusic,
        Stage::Mix,
        Stage::ReplaceAudio,
    ];

    pub fn first() -> Stage {
        Stage::ALL[0]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Asr => "asr",
            Stage::Punctuate => "punctuate",
            Stage::Translate => "translate",
            Stage::Tts => "tts",
            Stage::SeparateMusic => "separate_music",
            Stage::Mix => "mix",
            Stage::ReplaceAudio => "replace_audio",
        }
    }

    /// Zero-based position in the chain.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The stage scheduled after this one, or `None` for the last stage.
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }

    /// Job progress once this stage has succeeded.
    pub fn progress_after(&self) -> f64 {
        let done = (self.index() + 1) as f64;
        let total = Stage::ALL.len() as f64;
        (done / total * 10000.0).round() / 100.0
    }

    pub fn names() -> [&'static str; 7] {
        Stage::ALL.map(|s| s.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}
