//! Ordinal bucket classes for the distribution charts.
//!
//! A [`BucketScheme`] is the single definition behind both the SQL that
//! assigns each value a sort order and the labels shown for those orders.

use serde::Serialize;

/// Which values a class accepts. Classes are tested in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Bound {
    Exactly(u64),
    AtMost(u64),
    AtLeast(u64),
    /// Everything not taken by an earlier class.
    Rest,
}

impl Bound {
    fn matches(&self, value: u64) -> bool {
        match *self {
            Self::Exactly(n) => value == n,
            Self::AtMost(n) => value <= n,
            Self::AtLeast(n) => value >= n,
            Self::Rest => true,
        }
    }

    fn sql_condition(&self, column: &str) -> Option<String> {
        match *self {
            Self::Exactly(n) => Some(format!("{column} = {n}")),
            Self::AtMost(n) => Some(format!("{column} <= {n}")),
            Self::AtLeast(n) => Some(format!("{column} >= {n}")),
            Self::Rest => None,
        }
    }
}

/// One labelled class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketClass {
    label: String,
    sort_order: u32,
    bound: Bound,
}

impl BucketClass {
    /// Returns the display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the 1-based sort order.
    #[must_use]
    pub fn sort_order(&self) -> u32 {
        self.sort_order
    }

    /// Returns the accepted range.
    #[must_use]
    pub fn bound(&self) -> Bound {
        self.bound
    }
}

/// An ordered list of bucket classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketScheme {
    classes: Vec<BucketClass>,
}

/// Response lengths at or below this maximum use the fixed length scheme.
pub const FIXED_LENGTH_MAX: u64 = 1000;

impl BucketScheme {
    /// Builds a scheme from `(label, bound)` pairs in sort order.
    #[must_use]
    pub fn new<L: Into<String>>(classes: impl IntoIterator<Item = (L, Bound)>) -> Self {
        let classes = classes
            .into_iter()
            .zip(1..)
            .map(|((label, bound), sort_order)| BucketClass {
                label: label.into(),
                sort_order,
                bound,
            })
            .collect();
        Self { classes }
    }

    /// `0 Citations` through `4+ Citations`.
    #[must_use]
    pub fn citations_per_prompt() -> Self {
        Self::counted("Citation", "Citations", 0, 4)
    }

    /// `0 Sections` through `4+ Sections`.
    #[must_use]
    pub fn sections_per_prompt() -> Self {
        Self::counted("Section", "Sections", 0, 4)
    }

    /// `1 Turn` through `5+ Turns`.
    #[must_use]
    pub fn turns_per_thread() -> Self {
        Self::counted("Turn", "Turns", 1, 5)
    }

    /// One class per exact count from `first` up to `open_from`, which
    /// starts the open-ended class.
    fn counted(singular: &str, plural: &str, first: u64, open_from: u64) -> Self {
        let noun = |n: u64| if n == 1 { singular } else { plural };
        let exact = (first..open_from).map(|n| (format!("{n} {}", noun(n)), Bound::Exactly(n)));
        let open = std::iter::once((format!("{open_from}+ {plural}"), Bound::AtLeast(open_from)));
        Self::new(exact.chain(open))
    }

    /// Picks the response-length scheme for the largest non-zero length.
    #[must_use]
    pub fn response_length(max_length: u64) -> Self {
        if max_length <= FIXED_LENGTH_MAX {
            Self::fixed_length()
        } else {
            Self::scaled_length(max_length)
        }
    }

    /// 200-character steps up to 800.
    #[must_use]
    pub fn fixed_length() -> Self {
        Self::new([
            ("No Response", Bound::Exactly(0)),
            ("Very Short (≤200)", Bound::AtMost(200)),
            ("Short (201-400)", Bound::AtMost(400)),
            ("Medium (401-600)", Bound::AtMost(600)),
            ("Long (601-800)", Bound::AtMost(800)),
            ("Very Long (800+)", Bound::Rest),
        ])
    }

    /// Cuts at 20%, 40%, 60%, and 80% of the maximum, rounded.
    #[must_use]
    pub fn scaled_length(max_length: u64) -> Self {
        let cut = |fraction: f64| (max_length as f64 * fraction).round() as u64;
        let (a, b, c, d) = (cut(0.2), cut(0.4), cut(0.6), cut(0.8));
        Self::new([
            ("No Response".to_string(), Bound::Exactly(0)),
            (format!("Very Short (≤{a})"), Bound::AtMost(a)),
            (format!("Short ({a}-{b})"), Bound::AtMost(b)),
            (format!("Medium ({b}-{c})"), Bound::AtMost(c)),
            (format!("Long ({c}-{d})"), Bound::AtMost(d)),
            (format!("Very Long ({d}+)"), Bound::Rest),
        ])
    }

    /// Returns the classes in sort order.
    #[must_use]
    pub fn classes(&self) -> &[BucketClass] {
        &self.classes
    }

    /// Returns the first class accepting `value`.
    #[must_use]
    pub fn classify(&self, value: u64) -> Option<&BucketClass> {
        self.classes.iter().find(|class| class.bound.matches(value))
    }

    /// Returns the label for a sort order.
    #[must_use]
    pub fn label(&self, sort_order: u32) -> Option<&str> {
        self.classes
            .iter()
            .find(|class| class.sort_order == sort_order)
            .map(BucketClass::label)
    }

    /// Renders a `multiIf` expression mapping `column` to its sort order.
    ///
    /// Values no class accepts map to 0.
    #[must_use]
    pub fn sql_sort_order(&self, column: &str) -> String {
        let mut arms = Vec::with_capacity(self.classes.len() * 2 + 1);
        let mut fallback = 0;
        for class in &self.classes {
            match class.bound.sql_condition(column) {
                Some(condition) => {
                    arms.push(condition);
                    arms.push(class.sort_order.to_string());
                }
                None => {
                    fallback = class.sort_order;
                    break;
                }
            }
        }
        arms.push(fallback.to_string());
        format!("multiIf({})", arms.join(", "))
    }
}
