use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The six graded-work classifications recognized by the weight table.
/// Grade rows carrying any other category string are ignored by the
/// averager: they contribute neither score nor weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Homework,
    Quiz,
    Test,
    Exam,
    Behavior,
    Participation,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Homework,
        Category::Quiz,
        Category::Test,
        Category::Exam,
        Category::Behavior,
        Category::Participation,
    ];

    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_lowercase().as_str() {
            "homework" => Some(Category::Homework),
            "quiz" => Some(Category::Quiz),
            "test" => Some(Category::Test),
            "exam" => Some(Category::Exam),
            "behavior" => Some(Category::Behavior),
            "participation" => Some(Category::Participation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Homework => "Homework",
            Category::Quiz => "Quiz",
            Category::Test => "Test",
            Category::Exam => "Exam",
            Category::Behavior => "Behavior",
            Category::Participation => "Participation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Immutable category-weight configuration, passed into the averager
/// instead of living as a module-level constant so a class or school can
/// carry its own table later.
#[derive(Debug, Clone)]
pub struct WeightTable {
    weights: [(Category, f64); 6],
}

impl WeightTable {
    /// The portal's standard table. Weights sum to 100 by construction.
    pub fn standard() -> Self {
        Self {
            weights: [
                (Category::Homework, 20.0),
                (Category::Quiz, 15.0),
                (Category::Test, 25.0),
                (Category::Exam, 25.0),
                (Category::Behavior, 7.5),
                (Category::Participation, 7.5),
            ],
        }
    }

    /// Builds an override table. Every category must appear exactly once
    /// and the weights must sum to exactly 100 percentage points.
    pub fn new(entries: &[(Category, f64)]) -> Result<Self, CalcError> {
        let mut weights: [(Category, f64); 6] = Self::standard().weights;
        for slot in weights.iter_mut() {
            let mut found: Option<f64> = None;
            for (cat, w) in entries {
                if *cat == slot.0 {
                    if found.is_some() {
                        return Err(CalcError::new(
                            "bad_weights",
                            format!("duplicate weight for {}", slot.0.as_str()),
                        ));
                    }
                    found = Some(*w);
                }
            }
            let Some(w) = found else {
                return Err(CalcError::new(
                    "bad_weights",
                    format!("missing weight for {}", slot.0.as_str()),
                ));
            };
            if w < 0.0 {
                return Err(CalcError::new(
                    "bad_weights",
                    format!("negative weight for {}", slot.0.as_str()),
                ));
            }
            slot.1 = w;
        }
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if (total - 100.0).abs() > 1e-9 {
            return Err(CalcError::new(
                "bad_weights",
                format!("weights must sum to 100, got {}", total),
            ));
        }
        Ok(Self { weights })
    }

    pub fn weight(&self, category: Category) -> f64 {
        self.weights
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.weights.iter().map(|(_, w)| w).sum()
    }
}

/// One persisted grade document, flattened for the averager. A document
/// may be shared by several students.
#[derive(Debug, Clone)]
pub struct GradeRow {
    pub subject: String,
    pub student_ids: Vec<String>,
    pub category: String,
    pub score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAverage {
    pub category: String,
    pub weight: f64,
    pub avg_percent: f64,
    pub graded_count: usize,
    /// True when the category had no entries and was treated as full credit.
    pub defaulted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub percent: f64,
    pub display: String,
    pub categories: Vec<CategoryAverage>,
}

fn entry_percent(score: f64, max_score: f64) -> f64 {
    // A zero (or bad) denominator counts as 0%, never a division fault.
    if max_score > 0.0 {
        100.0 * score / max_score
    } else {
        0.0
    }
}

/// Weighted subject average for one student.
///
/// Entries are filtered to the subject and student, bucketed by category,
/// averaged within each category (unweighted mean), then combined by the
/// weight table. A category with no entries defaults to 100 (full credit
/// for work not yet graded), so a subject with no entries at all comes out
/// as "100.00".
pub fn subject_average(
    rows: &[GradeRow],
    student_id: &str,
    subject: &str,
    weights: &WeightTable,
) -> SubjectAverage {
    let mut by_category: HashMap<Category, Vec<f64>> = HashMap::new();
    for row in rows {
        if row.subject != subject {
            continue;
        }
        if !row.student_ids.iter().any(|s| s == student_id) {
            continue;
        }
        let Some(category) = Category::parse(&row.category) else {
            continue;
        };
        by_category
            .entry(category)
            .or_default()
            .push(entry_percent(row.score, row.max_score));
    }

    let mut weighted_sum = 0.0_f64;
    let mut categories: Vec<CategoryAverage> = Vec::with_capacity(Category::ALL.len());
    for category in Category::ALL {
        let weight = weights.weight(category);
        let scores = by_category.get(&category);
        let graded_count = scores.map(|v| v.len()).unwrap_or(0);
        let avg_percent = match scores {
            Some(v) if !v.is_empty() => v.iter().sum::<f64>() / (v.len() as f64),
            _ => 100.0,
        };
        weighted_sum += (avg_percent / 100.0) * weight;
        categories.push(CategoryAverage {
            category: category.as_str().to_string(),
            weight,
            avg_percent,
            graded_count,
            defaulted: graded_count == 0,
        });
    }

    SubjectAverage {
        percent: weighted_sum,
        display: format!("{:.2}", weighted_sum),
        categories,
    }
}
