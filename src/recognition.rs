use log::{debug, info};
use serde::Serialize;

use crate::error::{InkError, Result};

/// Class order of the EMNIST "byclass" split.
pub const EMNIST_BYCLASS: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Ordered symbol set; position `i` is the classifier's output `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<char>,
}

impl Default for Alphabet {
    fn default() -> Self {
        Self {
            symbols: EMNIST_BYCLASS.chars().collect(),
        }
    }
}

impl Alphabet {
    pub fn new(symbols: &str) -> Result<Self> {
        let symbols: Vec<char> = symbols.chars().collect();
        if symbols.is_empty() {
            return Err(InkError::Config("alphabet is empty".into()));
        }
        for (i, c) in symbols.iter().enumerate() {
            if symbols[..i].contains(c) {
                return Err(InkError::Config(format!("alphabet repeats symbol '{c}'")));
            }
        }
        Ok(Self { symbols })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn get(&self, index: usize) -> Option<char> {
        self.symbols.get(index).copied()
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecognitionOutcome {
    pub character: char,
    pub confidence: f32,
    pub index: usize,
}

/// First index holding the maximum; NaN never wins.
pub fn stable_argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some(b) if values[b] >= *v => {}
            _ => best = Some(i),
        }
    }
    best
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
    text: String,
    last: Option<RecognitionOutcome>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn last(&self) -> Option<&RecognitionOutcome> {
        self.last.as_ref()
    }

    pub fn on_recognized(
        &mut self,
        confidences: &[f32],
        alphabet: &Alphabet,
    ) -> Result<RecognitionOutcome> {
        if confidences.is_empty() {
            return Err(InkError::InvalidInput("empty confidence vector".into()));
        }
        if confidences.len() != alphabet.len() {
            return Err(InkError::InvalidInput(format!(
                "confidence vector has {} entries, alphabet has {}",
                confidences.len(),
                alphabet.len()
            )));
        }
        let index = stable_argmax(confidences)
            .ok_or_else(|| InkError::InvalidInput("confidence vector has no numbers".into()))?;

        if log::log_enabled!(log::Level::Debug) {
            let table: Vec<String> = alphabet
                .symbols()
                .iter()
                .zip(confidences)
                .map(|(c, v)| format!("{c} {v:.4}"))
                .collect();
            debug!("confidence values:\n{}", table.join("\n"));
        }

        let character = alphabet
            .get(index)
            .ok_or_else(|| InkError::InvalidInput(format!("no symbol at index {index}")))?;
        let outcome = RecognitionOutcome {
            character,
            confidence: confidences[index],
            index,
        };
        info!(
            "prediction result: {} {}",
            outcome.character, outcome.confidence
        );
        self.text.push(outcome.character);
        self.last = Some(outcome);
        Ok(outcome)
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.last = None;
    }
}
