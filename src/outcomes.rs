use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::model::{Outcome, ALL_STAGES};

pub const SUBJECT_ORDER: [&str; 16] = [
    "Circle/Guardian",
    "English",
    "Mathematics",
    "Science",
    "Science & Technology",
    "HSIE",
    "Geography",
    "History",
    "PDHPE",
    "Visual Art",
    "Music",
    "Drama",
    "Creative Arts",
    "Outdoor Education",
    "Electives",
    "Other",
];

/// Heading that collects outcomes whose subject area matches no label.
pub const FALLBACK_SUBJECT: &str = "Other";

/// The three subjects that get their own outcome and idea fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignatedSubject {
    English,
    Maths,
    Science,
}

impl DesignatedSubject {
    pub const ALL: [DesignatedSubject; 3] = [
        DesignatedSubject::English,
        DesignatedSubject::Maths,
        DesignatedSubject::Science,
    ];

    /// Prefix used in program field names (`english_outcomes`, `maths_ideas`).
    pub fn key(self) -> &'static str {
        match self {
            DesignatedSubject::English => "english",
            DesignatedSubject::Maths => "maths",
            DesignatedSubject::Science => "science",
        }
    }

    pub fn parse(s: &str) -> Option<DesignatedSubject> {
        let s = s.trim().to_lowercase();
        DesignatedSubject::ALL
            .into_iter()
            .find(|d| d.key() == s || d.labels().iter().any(|l| l.to_lowercase() == s))
    }

    pub fn labels(self) -> &'static [&'static str] {
        match self {
            DesignatedSubject::English => &["English"],
            DesignatedSubject::Maths => &["Mathematics"],
            DesignatedSubject::Science => &["Science", "Science & Technology"],
        }
    }

    pub fn matches(self, subject_area: &str) -> bool {
        let area = normalize_subject(subject_area);
        self.labels().iter().any(|l| normalize_subject(l) == area)
    }

    pub fn outcomes_field(self) -> String {
        format!("{}_outcomes", self.key())
    }

    pub fn ideas_field(self) -> String {
        format!("{}_ideas", self.key())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeGroups {
    /// HTML: one heading per subject, one paragraph per outcome.
    pub combined: String,
    pub english: String,
    pub maths: String,
    pub science: String,
    /// Selected codes whose subject area matched no label; listed under "Other".
    pub unmatched: Vec<String>,
    /// Selected codes not present in the catalog.
    pub missing: Vec<String>,
}

impl OutcomeGroups {
    pub fn subject_text(&self, subject: DesignatedSubject) -> &str {
        match subject {
            DesignatedSubject::English => &self.english,
            DesignatedSubject::Maths => &self.maths,
            DesignatedSubject::Science => &self.science,
        }
    }
}

fn normalize_subject(s: &str) -> String {
    s.trim().to_lowercase()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn outcome_line(o: &Outcome) -> String {
    format!("{} — {}", o.code, o.description)
}

/// Group the selected outcomes by subject.
///
/// Iteration runs over the selection in code order, so every per-subject list
/// comes out sorted by code without a separate sort. When the catalog holds
/// the same code twice the first entry wins.
pub fn group_outcomes(
    catalog: &[Outcome],
    subject_order: &[&str],
    selected: &BTreeSet<String>,
) -> OutcomeGroups {
    let mut by_code: HashMap<&str, &Outcome> = HashMap::with_capacity(catalog.len());
    for o in catalog {
        by_code.entry(o.code.as_str()).or_insert(o);
    }

    let order: Vec<String> = subject_order.iter().map(|s| normalize_subject(s)).collect();
    let fallback = order
        .iter()
        .position(|s| *s == normalize_subject(FALLBACK_SUBJECT));

    let mut buckets: Vec<Vec<&Outcome>> = vec![Vec::new(); subject_order.len()];
    let mut overflow: Vec<&Outcome> = Vec::new();
    let mut designated: [Vec<&Outcome>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut groups = OutcomeGroups::default();

    for code in selected {
        let Some(outcome) = by_code.get(code.as_str()).copied() else {
            groups.missing.push(code.clone());
            continue;
        };
        let area = normalize_subject(&outcome.subject_area);
        match order.iter().position(|s| *s == area) {
            Some(idx) => buckets[idx].push(outcome),
            None => {
                groups.unmatched.push(code.clone());
                match fallback {
                    Some(idx) => buckets[idx].push(outcome),
                    None => overflow.push(outcome),
                }
            }
        }
        for (slot, subject) in DesignatedSubject::ALL.iter().enumerate() {
            if subject.matches(&outcome.subject_area) {
                designated[slot].push(outcome);
            }
        }
    }

    let mut blocks: Vec<String> = Vec::new();
    let labelled = subject_order
        .iter()
        .copied()
        .zip(buckets.iter())
        .chain(std::iter::once((FALLBACK_SUBJECT, &overflow)));
    for (label, list) in labelled {
        if list.is_empty() {
            continue;
        }
        let mut block = format!("<h1><strong>{}</strong></h1>", escape_html(label));
        for o in list {
            block.push_str(&format!("<p>{}</p>", escape_html(&outcome_line(o))));
        }
        blocks.push(block);
    }
    groups.combined = blocks.join("\n");

    let [english, maths, science] = designated.map(|list| {
        list.iter()
            .map(|o| outcome_line(o))
            .collect::<Vec<_>>()
            .join("\n")
    });
    groups.english = english;
    groups.maths = maths;
    groups.science = science;
    groups
}

/// Outcomes offered for a program stage: exact stage matches plus outcomes
/// tagged for all stages.
pub fn outcomes_for_stage<'a>(catalog: &'a [Outcome], stage: &str) -> Vec<&'a Outcome> {
    let stage = stage.trim();
    catalog
        .iter()
        .filter(|o| o.stage == stage || o.stage == ALL_STAGES)
        .collect()
}
