use crate::consts::{DEFAULT_OPTIONS, MAX_OPTIONS};
use crate::detector::{GridConfig, SubjectRange};
use crate::error::{OmrError, OmrResult};
use crate::options::OptionSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Rows a derived layout prints per question block.
const DERIVED_ROWS_PER_BLOCK: u32 = 20;

fn default_options() -> u8 {
    DEFAULT_OPTIONS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectKey {
    pub name: String,
    pub questions: Vec<u32>,
    pub answers: Vec<OptionSet>,
}

impl SubjectKey {
    pub fn new(name: impl Into<String>, questions: Vec<u32>, answers: Vec<OptionSet>) -> Self {
        Self {
            name: name.into(),
            questions,
            answers,
        }
    }

    /// Question numbers paired with their accepted sets.
    pub fn pairs(&self) -> impl Iterator<Item = (u32, OptionSet)> + '_ {
        self.questions.iter().copied().zip(self.answers.iter().copied())
    }
}

/// Versioned answer key: subjects in sheet order, each an ordered list of
/// questions with the set of letters accepted for each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_options")]
    pub options: u8,
    #[serde(deserialize_with = "subjects_any_form")]
    pub subjects: Vec<SubjectKey>,
}

#[derive(Deserialize)]
struct SubjectBody {
    questions: Vec<u32>,
    answers: Vec<OptionSet>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SubjectsRepr {
    List(Vec<SubjectKey>),
    Map(BTreeMap<String, SubjectBody>),
}

/// Subjects may be a list or an object keyed by subject name. Objects are
/// ordered by each subject's first question.
fn subjects_any_form<'de, D>(deserializer: D) -> Result<Vec<SubjectKey>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match SubjectsRepr::deserialize(deserializer)? {
        SubjectsRepr::List(list) => list,
        SubjectsRepr::Map(map) => {
            let mut list: Vec<SubjectKey> = map
                .into_iter()
                .map(|(name, body)| SubjectKey::new(name, body.questions, body.answers))
                .collect();
            list.sort_by_key(|s| s.questions.iter().min().copied().unwrap_or(u32::MAX));
            list
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub name: String,
    pub questions: usize,
    pub first: Option<u32>,
    pub last: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySummary {
    pub version: String,
    pub name: String,
    pub options: u8,
    pub total_questions: usize,
    pub subjects: Vec<SubjectSummary>,
}

impl AnswerKey {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: String::new(),
            description: String::new(),
            options: DEFAULT_OPTIONS,
            subjects: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: u8) -> Self {
        self.options = options;
        self
    }

    pub fn with_subject(mut self, subject: SubjectKey) -> Self {
        self.subjects.push(subject);
        self
    }

    pub fn from_json_str(json: &str) -> OmrResult<Self> {
        let key: AnswerKey = serde_json::from_str(json)
            .map_err(|e| OmrError::KeyValidation(format!("malformed answer key: {}", e)))?;
        key.validate()?;
        Ok(key)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OmrResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn total_questions(&self) -> usize {
        self.subjects.iter().map(|s| s.questions.len()).sum()
    }

    /// Structural checks run before a key may be registered.
    pub fn validate(&self) -> OmrResult<()> {
        let fail = |msg: String| Err(OmrError::KeyValidation(msg));

        if self.options == 0 || self.options > MAX_OPTIONS {
            return fail(format!(
                "options must be 1..={}, got {}",
                MAX_OPTIONS, self.options
            ));
        }
        if self.subjects.is_empty() {
            return fail("key has no subjects".to_string());
        }

        let mut seen: HashSet<u32> = HashSet::new();
        for subject in &self.subjects {
            if subject.name.trim().is_empty() {
                return fail("subject with an empty name".to_string());
            }
            if subject.questions.len() != subject.answers.len() {
                return fail(format!(
                    "subject '{}' has {} questions but {} answers",
                    subject.name,
                    subject.questions.len(),
                    subject.answers.len()
                ));
            }
            for (q, accepted) in subject.pairs() {
                if q == 0 {
                    return fail(format!("subject '{}': question numbers start at 1", subject.name));
                }
                if !seen.insert(q) {
                    return fail(format!("question {} appears more than once", q));
                }
                if accepted.is_empty() {
                    return fail(format!("question {} has an empty answer set", q));
                }
                if !accepted.fits(self.options) {
                    return fail(format!(
                        "question {} accepts '{}', outside the {}-option alphabet",
                        q, accepted, self.options
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> KeySummary {
        KeySummary {
            version: self.version.clone(),
            name: self.name.clone(),
            options: self.options,
            total_questions: self.total_questions(),
            subjects: self
                .subjects
                .iter()
                .map(|s| SubjectSummary {
                    name: s.name.clone(),
                    questions: s.questions.len(),
                    first: s.questions.iter().min().copied(),
                    last: s.questions.iter().max().copied(),
                })
                .collect(),
        }
    }

    /// Layout implied by the key alone: questions 1..=max in blocks of twenty
    /// rows, numbered across each row.
    pub fn derive_grid(&self) -> GridConfig {
        let questions = self
            .subjects
            .iter()
            .flat_map(|s| s.questions.iter().copied())
            .max()
            .unwrap_or(0);
        let subjects: Vec<SubjectRange> = self
            .subjects
            .iter()
            .filter_map(|s| {
                let first = s.questions.iter().min().copied()?;
                let last = s.questions.iter().max().copied()?;
                Some(SubjectRange {
                    name: s.name.clone(),
                    first,
                    last,
                })
            })
            .collect();
        GridConfig::builder()
            .questions(questions)
            .options(self.options)
            .question_columns(questions.div_ceil(DERIVED_ROWS_PER_BLOCK).max(1))
            .subjects(subjects)
            .build()
    }
}
