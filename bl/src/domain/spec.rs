//! Parsed specification document

use serde::{Deserialize, Serialize};

/// One requirement extracted from the specification document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub criteria: Vec<String>,
}

impl Feature {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            criteria: Vec::new(),
        }
    }
}

/// Structured form of a specification document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub name: String,
    pub features: Vec<Feature>,
}

impl Spec {
    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }
}
