//! Rule-based responder. Answers from the context bundle with no network.
//!
//! Questions are classified by keyword, first match wins, and each kind
//! has a templated answer built only from what the bundle carries:
//! totals, categorical breakdowns, numeric summaries, and the most recent
//! record digests. Everything here is synchronous, pure, and total: any
//! question against any bundle yields a non-empty answer.

use opsdesk_core::context::{ContextBundle, LocalResponder, RecordDigest, TableSection};
use opsdesk_core::domain::Breakdown;
use std::fmt::Write as _;

/// Breakdowns shown by a general count.
const MAX_BREAKDOWNS: usize = 7;
const MAX_SEARCH_RESULTS: usize = 10;
const MAX_LIST_RECORDS: usize = 20;
const MAX_DISTINCT_VALUES: usize = 15;
const SUMMARY_TOP_VALUES: usize = 3;

/// Categorical values recognised by name in questions.
const KNOWN_VALUES: &[&str] = &[
    "critical", "high", "medium", "low", "open", "closed", "resolved", "pending", "active",
    "inactive", "in_progress",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "should", "could", "may", "might", "must", "can", "find", "show",
    "search", "get", "display", "me", "any", "records", "record", "all",
];

/// What a question is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Count,
    Statistics,
    Search,
    Filter,
    Comparison,
    Trend,
    Value,
    List,
    Summary,
    General,
}

impl QuestionKind {
    /// Keyword table in priority order.
    const RULES: [(QuestionKind, &'static [&'static str]); 9] = [
        (Self::Count, &["how many", "count", "total", "number of", "quantity"]),
        (
            Self::Statistics,
            &["average", "mean", "median", "min", "max", "sum", "statistics", "stats", "avg"],
        ),
        (Self::Search, &["find", "search", "show", "display", "get"]),
        (Self::Filter, &["where", "which", "what", "who", "when", "with", "having"]),
        (
            Self::Comparison,
            &["compare", "difference", "vs", "versus", "more than", "less than", "greater", "smaller"],
        ),
        (
            Self::Trend,
            &["trend", "over time", "recent", "latest", "oldest", "newest", "earliest", "last"],
        ),
        (Self::Value, &["value", "tell me", "give me"]),
        (Self::List, &["list", "all", "every", "each"]),
        (Self::Summary, &["summary", "overview", "describe"]),
    ];

    /// Classify a question. Keywords match on word boundaries.
    pub fn classify(question: &str) -> Self {
        let text = Normalized::new(question);
        Self::RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| text.has(k)))
            .map(|(kind, _)| *kind)
            .unwrap_or(Self::General)
    }
}

/// Lower-cased question split into words, for boundary-aware matching.
struct Normalized {
    words: Vec<String>,
    padded: String,
}

impl Normalized {
    fn new(text: &str) -> Self {
        let words: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        let padded = format!(" {} ", words.join(" "));
        Self { words, padded }
    }

    /// Whole-word (or whole-phrase) match.
    fn has(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.padded.contains(&format!(" {} ", keyword.trim()))
    }

    fn numbers(&self) -> Vec<f64> {
        self.words.iter().filter_map(|w| w.parse::<f64>().ok()).collect()
    }
}

/// The deterministic fallback responder.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRuleResponder;

impl LocalRuleResponder {
    pub fn new() -> Self {
        Self
    }

    fn answer(&self, question: &str, bundle: &ContextBundle) -> String {
        if bundle.is_empty() {
            return no_data(bundle);
        }

        let text = Normalized::new(question);
        let mut out = match QuestionKind::classify(question) {
            QuestionKind::Count => count(&text, bundle),
            QuestionKind::Statistics => statistics(&text, bundle),
            QuestionKind::Search => search(&text, bundle),
            QuestionKind::Filter => filter(&text, bundle),
            QuestionKind::Comparison => comparison(&text, bundle),
            QuestionKind::Trend => trend(&text, bundle),
            QuestionKind::Value => value(&text, bundle),
            QuestionKind::List => list(bundle),
            QuestionKind::Summary => summary(bundle),
            QuestionKind::General => general(&text, bundle),
        };

        if !bundle.unavailable.is_empty() {
            let names: Vec<&str> = bundle.unavailable.iter().map(|t| t.label()).collect();
            let _ = write!(out, "\n\n_Unavailable right now: {}._", names.join(", "));
        }
        out
    }
}

impl LocalResponder for LocalRuleResponder {
    fn respond(&self, question: &str, bundle: &ContextBundle) -> String {
        let answer = self.answer(question, bundle);
        if answer.trim().is_empty() {
            no_data(bundle)
        } else {
            answer.trim_end().to_string()
        }
    }
}

// ── Answers ───────────────────────────────────────────────────────────────

fn no_data(bundle: &ContextBundle) -> String {
    let mut out = format!(
        "I can only summarize available data, and there is none I can show to the {} role right now.",
        bundle.role
    );
    if !bundle.unavailable.is_empty() {
        let names: Vec<&str> = bundle.unavailable.iter().map(|t| t.label()).collect();
        let _ = write!(out, " The data store did not respond for: {}.", names.join(", "));
    }
    out
}

fn count(text: &Normalized, bundle: &ContextBundle) -> String {
    let fields = mentioned_fields(text, bundle);
    let values = mentioned_values(text);
    let mut out = String::new();

    if !values.is_empty() {
        for section in &bundle.sections {
            for breakdown in &section.breakdowns {
                if !fields.is_empty() && !fields.contains(&breakdown.field.to_lowercase()) {
                    continue;
                }
                for value in &values {
                    if let Some(n) = breakdown.count_of(value) {
                        let _ = writeln!(
                            out,
                            "- **{} with {} = '{}':** {n}",
                            section.table.label(),
                            breakdown.field,
                            title_case(value)
                        );
                    }
                }
            }
        }
        if !out.is_empty() {
            return format!("**Matching counts:**\n\n{out}");
        }
    }

    if !fields.is_empty() {
        for section in &bundle.sections {
            for breakdown in section.breakdowns.iter().filter(|b| fields.contains(&b.field.to_lowercase())) {
                let _ = writeln!(out, "**{} by {}:**\n", section.table.label(), breakdown.field);
                write_distribution(&mut out, breakdown, section.total_count, usize::MAX);
                out.push('\n');
            }
        }
        if !out.is_empty() {
            return out;
        }
    }

    for section in &bundle.sections {
        let _ = writeln!(out, "**{}:** {} records\n", section.table.label(), section.total_count);
        for breakdown in section.breakdowns.iter().take(MAX_BREAKDOWNS) {
            let _ = writeln!(out, "{} distribution:", breakdown.field);
            write_distribution(&mut out, breakdown, section.total_count, 10);
            out.push('\n');
        }
    }
    if bundle.sections.len() > 1 {
        let _ = writeln!(out, "**Total across tables:** {}", bundle.total_records());
    }
    out
}

fn statistics(text: &Normalized, bundle: &ContextBundle) -> String {
    let mentioned = mentioned_numeric(text, bundle);
    let mut out = String::from("**Statistical analysis:**\n\n");
    let mut any = false;

    for section in &bundle.sections {
        let summaries: Vec<_> = if mentioned.is_empty() {
            section.numeric.iter().take(5).collect()
        } else {
            section
                .numeric
                .iter()
                .filter(|n| mentioned.contains(&n.field.to_lowercase()))
                .collect()
        };
        for n in summaries {
            any = true;
            let _ = writeln!(
                out,
                "**{} {}:** count {}, min {:.2}, max {:.2}, mean {:.2}",
                section.table.label(),
                n.field,
                n.count,
                n.min,
                n.max,
                n.mean
            );
        }
    }

    if !any {
        out.push_str("No numeric fields are available for statistics.\n\n");
        for section in &bundle.sections {
            for breakdown in section.breakdowns.iter().take(3) {
                let _ = writeln!(out, "**{} {}:**", section.table.label(), breakdown.field);
                write_distribution(&mut out, breakdown, section.total_count, 5);
                out.push('\n');
            }
        }
    }
    out
}

fn search(text: &Normalized, bundle: &ContextBundle) -> String {
    let terms: Vec<&str> = text
        .words
        .iter()
        .map(String::as_str)
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
        .collect();

    if terms.is_empty() {
        return "Please give me something specific to look for. For example: \"Find incidents with high severity\".".into();
    }

    let matches: Vec<(&TableSection, &RecordDigest)> = all_records(bundle)
        .filter(|(_, d)| {
            let haystack = digest_haystack(d);
            terms.iter().any(|t| haystack.contains(t))
        })
        .collect();

    if matches.is_empty() {
        return format!(
            "No records found matching: {}\n\nTry different terms, or ask about a specific field or value.",
            terms.join(", ")
        );
    }

    let mut out = format!("**Found {} matching records:**\n\n", matches.len());
    write_records(&mut out, matches.iter().copied().take(MAX_SEARCH_RESULTS));
    if matches.len() > MAX_SEARCH_RESULTS {
        let _ = writeln!(out, "\n... and {} more results.", matches.len() - MAX_SEARCH_RESULTS);
    }
    out
}

fn filter(text: &Normalized, bundle: &ContextBundle) -> String {
    let fields = mentioned_fields(text, bundle);
    let values = mentioned_values(text);
    let mut applied: Vec<String> = Vec::new();
    let mut counts = String::new();

    // Categorical: field (optional) = value.
    for section in &bundle.sections {
        for breakdown in &section.breakdowns {
            let field = breakdown.field.to_lowercase();
            if !fields.is_empty() && !fields.contains(&field) {
                continue;
            }
            for value in &values {
                if let Some(n) = breakdown.count_of(value) {
                    let label = format!("{} = {value}", breakdown.field);
                    if !applied.contains(&label) {
                        applied.push(label);
                    }
                    let _ = writeln!(counts, "- {} with {} = {value}: {n}", section.table.label(), breakdown.field);
                }
            }
        }
    }

    // Numeric thresholds on record digests: "hours greater than 4".
    let threshold = comparison_threshold(text);
    let numeric = mentioned_numeric(text, bundle);

    let matches: Vec<(&TableSection, &RecordDigest)> = all_records(bundle)
        .filter(|(_, d)| {
            let categorical_ok = applied.is_empty()
                || d.fields.iter().any(|(k, v)| {
                    (fields.is_empty() || fields.contains(&k.to_lowercase()))
                        && values.iter().any(|val| v.eq_ignore_ascii_case(val))
                });
            let numeric_ok = match (threshold, numeric.first()) {
                (Some((above, limit)), Some(field)) => d
                    .fields
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(field))
                    .and_then(|(_, v)| v.parse::<f64>().ok())
                    .is_some_and(|x| if above { x > limit } else { x < limit }),
                _ => true,
            };
            categorical_ok && numeric_ok
        })
        .collect();

    if let (Some((above, limit)), Some(field)) = (threshold, numeric.first()) {
        applied.push(format!("{field} {} {limit}", if above { ">" } else { "<" }));
    }

    if applied.is_empty() {
        return search(text, bundle);
    }

    let mut out = format!("**Filtered results:** {}\n\n", applied.join(", "));
    if !counts.is_empty() {
        let _ = writeln!(out, "Counts across all records:\n{counts}");
    }
    if matches.is_empty() {
        out.push_str("None of the most recent records match.\n");
    } else {
        let _ = writeln!(out, "Matching recent records ({}):\n", matches.len());
        write_records(&mut out, matches.iter().copied().take(MAX_SEARCH_RESULTS));
        if matches.len() > MAX_SEARCH_RESULTS {
            let _ = writeln!(out, "\n... and {} more records.", matches.len() - MAX_SEARCH_RESULTS);
        }
    }
    out
}

fn comparison(text: &Normalized, bundle: &ContextBundle) -> String {
    let fields = mentioned_fields(text, bundle);
    let mut out = String::from("**Comparison:**\n\n");

    if bundle.sections.len() > 1 {
        let totals: Vec<String> = bundle
            .sections
            .iter()
            .map(|s| format!("{}: {}", s.table.label(), s.total_count))
            .collect();
        let _ = writeln!(out, "Records per table: {}\n", totals.join(" vs "));
    }

    let mut any = false;
    for section in &bundle.sections {
        let breakdowns: Vec<&Breakdown> = if fields.is_empty() {
            section.breakdowns.iter().take(3).collect()
        } else {
            section
                .breakdowns
                .iter()
                .filter(|b| fields.contains(&b.field.to_lowercase()))
                .collect()
        };
        for breakdown in breakdowns {
            any = true;
            let _ = writeln!(out, "**{} {}:**", section.table.label(), breakdown.field);
            write_distribution(&mut out, breakdown, section.total_count, usize::MAX);
            out.push('\n');
        }
    }

    if !any {
        for section in &bundle.sections {
            for n in section.numeric.iter().take(3) {
                any = true;
                let _ = writeln!(
                    out,
                    "- **{} {}:** min {:.2}, max {:.2}, avg {:.2}",
                    section.table.label(),
                    n.field,
                    n.min,
                    n.max,
                    n.mean
                );
            }
        }
    }

    if !any && bundle.sections.len() < 2 {
        out.push_str("There are no breakdowns to compare in the data I can see.\n");
    }
    out
}

fn trend(text: &Normalized, bundle: &ContextBundle) -> String {
    let mut out = String::from("**Trend analysis:**\n\n");

    if ["recent", "latest", "newest", "last"].iter().any(|k| text.has(k)) {
        let mut records: Vec<_> = all_records(bundle).collect();
        records.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at).then_with(|| a.1.id.cmp(&b.1.id)));
        out.push_str("Most recent records:\n\n");
        write_records(&mut out, records.into_iter().take(MAX_SEARCH_RESULTS));
        return out;
    }

    if ["oldest", "earliest"].iter().any(|k| text.has(k)) {
        for section in &bundle.sections {
            if let Some(earliest) = section.earliest {
                let _ = writeln!(
                    out,
                    "- **{}:** earliest record {}",
                    section.table.label(),
                    earliest.format("%Y-%m-%d %H:%M UTC")
                );
            }
        }
        let mut records: Vec<_> = all_records(bundle).collect();
        records.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.1.id.cmp(&b.1.id)));
        if let Some(oldest) = records.first() {
            out.push_str("\nOldest of the recent records I can see:\n\n");
            write_records(&mut out, std::iter::once(*oldest));
        }
        return out;
    }

    for section in &bundle.sections {
        match (section.earliest, section.latest) {
            (Some(from), Some(to)) => {
                let _ = writeln!(
                    out,
                    "- **{}:** {} records from {} to {}",
                    section.table.label(),
                    section.total_count,
                    from.format("%Y-%m-%d"),
                    to.format("%Y-%m-%d")
                );
            }
            _ => {
                let _ = writeln!(out, "- **{}:** {} records (no dates)", section.table.label(), section.total_count);
            }
        }
    }
    out
}

fn value(text: &Normalized, bundle: &ContextBundle) -> String {
    let fields = mentioned_fields(text, bundle);
    if fields.is_empty() {
        return search(text, bundle);
    }

    let mut out = String::from("**Values:**\n\n");
    for section in &bundle.sections {
        for breakdown in section.breakdowns.iter().filter(|b| fields.contains(&b.field.to_lowercase())) {
            let _ = writeln!(out, "**{} {}:**", section.table.label(), breakdown.field);
            for vc in breakdown.counts.iter().take(MAX_DISTINCT_VALUES) {
                let _ = writeln!(out, "- {}", vc.value);
            }
            if breakdown.counts.len() > MAX_DISTINCT_VALUES {
                let _ = writeln!(out, "... and {} more", breakdown.counts.len() - MAX_DISTINCT_VALUES);
            }
            out.push('\n');
        }
    }
    out
}

fn list(bundle: &ContextBundle) -> String {
    let records: Vec<_> = all_records(bundle).collect();
    let total = bundle.total_records();
    let shown = records.len().min(MAX_LIST_RECORDS);

    let mut out = format!("**Most recent records ({shown} of {total} total):**\n\n");
    if records.is_empty() {
        out.push_str("No individual records are included in the data I can see.\n");
        return out;
    }
    write_records(&mut out, records.into_iter().take(MAX_LIST_RECORDS));
    let remaining = total.saturating_sub(shown as u64);
    if remaining > 0 {
        let _ = writeln!(out, "\n... and {remaining} more records.");
    }
    out
}

fn summary(bundle: &ContextBundle) -> String {
    let mut out = String::from("**Data summary:**\n\n");

    for section in &bundle.sections {
        let _ = writeln!(out, "**{}** ({} records)", section.table.label(), section.total_count);

        let mut fields: Vec<&str> = section.breakdowns.iter().map(|b| b.field.as_str()).collect();
        fields.extend(section.numeric.iter().map(|n| n.field.as_str()));
        if !fields.is_empty() {
            let _ = writeln!(out, "- Fields: {}", fields.join(", "));
        }

        for n in section.numeric.iter().take(5) {
            let _ = writeln!(out, "- {}: min {:.2}, max {:.2}, avg {:.2}", n.field, n.min, n.max, n.mean);
        }

        for breakdown in section.breakdowns.iter().take(3) {
            let top: Vec<String> = breakdown
                .counts
                .iter()
                .take(SUMMARY_TOP_VALUES)
                .map(|c| format!("{}({})", c.value, c.count))
                .collect();
            let _ = writeln!(out, "- {}: {}", breakdown.field, top.join(", "));
        }

        if let (Some(from), Some(to)) = (section.earliest, section.latest) {
            let _ = writeln!(out, "- Date range: {} to {}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d"));
        }
        out.push('\n');
    }

    if bundle.truncated {
        out.push_str("_Some detail was left out to keep this summary short._\n");
    }
    out
}

fn general(text: &Normalized, bundle: &ContextBundle) -> String {
    let fields = mentioned_fields(text, bundle);
    if !fields.is_empty() {
        let mut out = String::from("**About the fields you mentioned:**\n\n");
        for section in &bundle.sections {
            for breakdown in section.breakdowns.iter().filter(|b| fields.contains(&b.field.to_lowercase())) {
                let top: Vec<String> = breakdown
                    .counts
                    .iter()
                    .take(5)
                    .map(|c| format!("{}({})", c.value, c.count))
                    .collect();
                let _ = writeln!(
                    out,
                    "**{} {}:** {} distinct values; top: {}",
                    section.table.label(),
                    breakdown.field,
                    breakdown.counts.len(),
                    top.join(", ")
                );
            }
            for n in section.numeric.iter().filter(|n| fields.contains(&n.field.to_lowercase())) {
                let _ = writeln!(
                    out,
                    "**{} {}:** min {:.2}, max {:.2}, avg {:.2}",
                    section.table.label(),
                    n.field,
                    n.min,
                    n.max,
                    n.mean
                );
            }
        }
        return out;
    }

    let mut out = String::from("**I can help you with:**\n\n");
    out.push_str("- **Counts:** \"How many open tickets are there?\"\n");
    out.push_str("- **Statistics:** \"What's the average resolution hours?\"\n");
    out.push_str("- **Search:** \"Find incidents mentioning phishing\"\n");
    out.push_str("- **Filters:** \"Which incidents have critical severity?\"\n");
    out.push_str("- **Comparisons:** \"Compare ticket priorities\"\n");
    out.push_str("- **Trends:** \"Show me the latest incidents\"\n");
    out.push_str("- **Lists:** \"List all tickets\"\n");
    out.push_str("- **Summaries:** \"Give me an overview\"\n\n");

    let fields = all_field_names(bundle);
    if !fields.is_empty() {
        let _ = writeln!(out, "**Available fields:** {}", fields.join(", "));
    }
    for section in &bundle.sections {
        let _ = writeln!(out, "**{}:** {} records", section.table.label(), section.total_count);
    }
    out
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn all_records(bundle: &ContextBundle) -> impl Iterator<Item = (&TableSection, &RecordDigest)> {
    bundle
        .sections
        .iter()
        .flat_map(|s| s.recent.iter().map(move |d| (s, d)))
}

/// Field names (lower-cased) the question mentions, from breakdowns and numeric summaries.
fn mentioned_fields(text: &Normalized, bundle: &ContextBundle) -> Vec<String> {
    all_field_names(bundle)
        .into_iter()
        .map(|f| f.to_lowercase())
        .filter(|f| text.has(f) || text.has(&f.replace('_', " ")))
        .collect()
}

fn mentioned_numeric(text: &Normalized, bundle: &ContextBundle) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for n in bundle.sections.iter().flat_map(|s| s.numeric.iter()) {
        let field = n.field.to_lowercase();
        if (text.has(&field) || text.has(&field.replace('_', " "))) && !out.contains(&field) {
            out.push(field);
        }
    }
    out
}

fn mentioned_values(text: &Normalized) -> Vec<&'static str> {
    KNOWN_VALUES
        .iter()
        .copied()
        .filter(|v| text.has(v) || text.has(&v.replace('_', " ")))
        .collect()
}

fn all_field_names(bundle: &ContextBundle) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for section in &bundle.sections {
        let fields = section
            .breakdowns
            .iter()
            .map(|b| &b.field)
            .chain(section.numeric.iter().map(|n| &n.field));
        for field in fields {
            if !names.contains(field) {
                names.push(field.clone());
            }
        }
    }
    names
}

/// `(above, limit)` from "greater than 4", "more than 4", "less than 4", "smaller than 4".
fn comparison_threshold(text: &Normalized) -> Option<(bool, f64)> {
    let above = text.has("greater than") || text.has("more than");
    let below = text.has("less than") || text.has("smaller than");
    if above == below {
        return None;
    }
    text.numbers().first().map(|n| (above, *n))
}

fn digest_haystack(digest: &RecordDigest) -> String {
    let mut s = digest.id.to_lowercase();
    for value in digest.fields.values().chain(digest.text.values()) {
        s.push(' ');
        s.push_str(&value.to_lowercase());
    }
    s
}

fn write_distribution(out: &mut String, breakdown: &Breakdown, total: u64, limit: usize) {
    for vc in breakdown.counts.iter().take(limit) {
        let _ = writeln!(out, "- {}: {} ({:.1}%)", vc.value, vc.count, percent(vc.count, total));
    }
}

fn write_records<'a>(out: &mut String, records: impl Iterator<Item = (&'a TableSection, &'a RecordDigest)>) {
    for (section, digest) in records {
        let fields: Vec<String> = digest
            .fields
            .iter()
            .take(3)
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        let _ = write!(
            out,
            "- [{}] **{}** ({})",
            section.table.label(),
            digest.id,
            digest.created_at.format("%Y-%m-%d")
        );
        if !fields.is_empty() {
            let _ = write!(out, " | {}", fields.join(" | "));
        }
        if let Some(title) = digest.text.get("title").or_else(|| digest.text.values().next()) {
            let _ = write!(out, " | {title}");
        }
        out.push('\n');
    }
}

fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn title_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
