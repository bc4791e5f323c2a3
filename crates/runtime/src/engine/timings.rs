//! Completion request and timing types shared by engines and the coordinator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sampling parameters for one completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    pub prompt: String,
    /// Maximum tokens to generate, `-1` for no limit
    pub n_predict: i32,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl CompletionParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            n_predict: 512,
            temperature: 0.7,
            top_p: 0.9,
            stop: Vec::new(),
            seed: None,
        }
    }
}

/// Native timing counters for one completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionTimings {
    pub prompt_n: u32,
    pub prompt_ms: f64,
    pub prompt_per_token_ms: f64,
    pub prompt_per_second: f64,
    pub predicted_n: u32,
    pub predicted_ms: f64,
    pub predicted_per_token_ms: f64,
    pub predicted_per_second: f64,
}

impl fmt::Display for CompletionTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Prompt Timings]")?;
        if self.prompt_n > 0 {
            writeln!(f, "Prompt Per Token: {:.2} ms/token", self.prompt_per_token_ms)?;
            writeln!(f, "Prompt Per Second: {:.2} tokens/s", self.prompt_per_second)?;
            writeln!(f, "Prompt Time: {:.2}s", self.prompt_ms / 1000.0)?;
            writeln!(f, "Prompt Tokens: {} tokens", self.prompt_n)?;
        } else {
            writeln!(f, "No Tokens Processed")?;
        }

        writeln!(f)?;
        writeln!(f, "[Predicted Timings]")?;
        if self.predicted_n > 0 {
            writeln!(
                f,
                "Predicted Per Token: {:.2} ms/token",
                self.predicted_per_token_ms
            )?;
            writeln!(
                f,
                "Predicted Per Second: {:.2} tokens/s",
                self.predicted_per_second
            )?;
            writeln!(f, "Prediction Time: {:.2}s", self.predicted_ms / 1000.0)?;
            write!(f, "Predicted Tokens: {} tokens", self.predicted_n)
        } else {
            write!(f, "No Tokens Generated")
        }
    }
}

/// What an engine returns once generation ends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOutput {
    pub text: String,
    pub timings: CompletionTimings,
    /// Generation ended because `stop_completion` was requested
    pub stopped: bool,
}
