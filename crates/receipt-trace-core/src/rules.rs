//! Deterministic rule candidate generator.
//!
//! Scans the lines of an [`OcrResult`] with regular expressions and simple
//! layout heuristics, proposing typed [`RuleCandidate`]s for each
//! [`FieldKind`]. Generation is a pure function of the OCR text: no I/O, no
//! randomness, and it never fails. A field kind with no match yields zero
//! candidates, never a placeholder.
//!
//! # Scoring
//!
//! | Kind | Pattern ids | Confidence |
//! |------|-------------|------------|
//! | currency | `iso_code` / `qualified_symbol` / `symbol` | 0.7 / 0.65 / 0.6 |
//! | total_amount | `total_same_line` / `total_next_line` / `trailing_amount` | 0.8 / 0.7 / 0.4, adjusted by anchor strength and position |
//! | date | `iso_ymd`, `ymd_slash`, `ymd_dot`, `mdy_slash`, `mdy_dash`, `dmy_slash`, `dmy_dot` | 0.6, +0.2 with a time, +0.1 near the bottom |
//! | merchant | `first_text_line` / `header_line` | 0.4 / 0.3, +0.1 when upper-case |
//!
//! Within each kind, candidates are ordered by confidence descending with
//! ties resolved by the configured [`TieBreak`].

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;

use crate::models::{FieldKind, OcrResult, RuleCandidate, SourceSpan, TieBreak};

/// Tunables for candidate generation.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleOptions {
    /// Upper bound on candidates kept per field kind.
    pub max_candidates_per_kind: usize,
    pub tie_break: TieBreak,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            max_candidates_per_kind: 5,
            tie_break: TieBreak::EarlierLine,
        }
    }
}

/// Lines considered when looking for the merchant name.
const MERCHANT_HEAD_LINES: usize = 8;

/// Lines scanned from the bottom for the un-anchored amount fallback.
const TRAILING_AMOUNT_WINDOW: usize = 12;

/// Generate candidates for every field kind.
///
/// Output is grouped in [`FieldKind::ALL`] order; each group is ranked and
/// truncated to `options.max_candidates_per_kind`.
pub fn generate(ocr: &OcrResult, options: &RuleOptions) -> Vec<RuleCandidate> {
    let lines = ocr.line_texts();
    let mut out = Vec::new();
    for kind in FieldKind::ALL {
        let mut group = match kind {
            FieldKind::Merchant => merchant_candidates(&lines),
            FieldKind::Date => date_candidates(&lines),
            FieldKind::TotalAmount => total_candidates(&lines),
            FieldKind::Currency => currency_candidates(&lines),
        };
        group.sort_by(|a, b| options.tie_break.rank(a, b));
        group.truncate(options.max_candidates_per_kind);
        out.extend(group);
    }
    out
}

/// Convenience wrapper for plain text input.
pub fn generate_from_text(text: &str, options: &RuleOptions) -> Vec<RuleCandidate> {
    generate(&OcrResult::from_text(text), options)
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("rule pattern must compile"))
}

fn span(line_index: usize, line: &str, start: usize, end: usize) -> SourceSpan {
    SourceSpan {
        line_index,
        line_text: line.to_string(),
        start,
        end,
    }
}

fn push_unique(out: &mut Vec<RuleCandidate>, cand: RuleCandidate) {
    let dup = out.iter_mut().find(|c| {
        c.value == cand.value && c.source_span.line_index == cand.source_span.line_index
    });
    match dup {
        Some(existing) if existing.confidence < cand.confidence => *existing = cand,
        Some(_) => {}
        None => out.push(cand),
    }
}

// ============ Currency ============

const ISO_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF", "CNY", "INR", "KRW", "NZD", "HKD", "SGD",
    "MXN",
];

fn qualified_symbol_code(prefix: &str) -> &'static str {
    match prefix {
        "US" => "USD",
        "CA" | "C" => "CAD",
        "AU" | "A" => "AUD",
        "NZ" => "NZD",
        "HK" => "HKD",
        _ => "SGD",
    }
}

fn symbol_code(symbol: char) -> Option<&'static str> {
    match symbol {
        '$' => Some("USD"),
        '€' => Some("EUR"),
        '£' => Some("GBP"),
        '¥' => Some("JPY"),
        '₩' => Some("KRW"),
        '₹' => Some("INR"),
        _ => None,
    }
}

fn currency_candidates(lines: &[&str]) -> Vec<RuleCandidate> {
    static CODE_RE: OnceLock<Regex> = OnceLock::new();
    static QUALIFIED_RE: OnceLock<Regex> = OnceLock::new();
    let code_re = regex(&CODE_RE, r"\b([A-Z]{3})\b");
    let qualified_re = regex(&QUALIFIED_RE, r"\b(US|CA|AU|NZ|HK|C|A|S)\$");

    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        for caps in code_re.captures_iter(line) {
            let m = caps.get(1).expect("group 1 always participates");
            if ISO_CODES.contains(&m.as_str()) {
                push_unique(
                    &mut out,
                    RuleCandidate::new(
                        FieldKind::Currency,
                        m.as_str(),
                        "iso_code",
                        0.7,
                        span(i, line, m.start(), m.end()),
                    ),
                );
            }
        }

        let mut qualified_ranges = Vec::new();
        for caps in qualified_re.captures_iter(line) {
            let whole = caps.get(0).expect("group 0 always participates");
            let code = qualified_symbol_code(&caps[1]);
            qualified_ranges.push(whole.start()..whole.end());
            push_unique(
                &mut out,
                RuleCandidate::new(
                    FieldKind::Currency,
                    code,
                    "qualified_symbol",
                    0.65,
                    span(i, line, whole.start(), whole.end()),
                ),
            );
        }

        for (pos, ch) in line.char_indices() {
            let Some(code) = symbol_code(ch) else {
                continue;
            };
            if qualified_ranges.iter().any(|r| r.contains(&pos)) {
                continue;
            }
            push_unique(
                &mut out,
                RuleCandidate::new(
                    FieldKind::Currency,
                    code,
                    "symbol",
                    0.6,
                    span(i, line, pos, pos + ch.len_utf8()),
                ),
            );
        }
    }
    out
}

// ============ Total amount ============

fn amount_regex() -> &'static Regex {
    static AMOUNT_RE: OnceLock<Regex> = OnceLock::new();
    regex(&AMOUNT_RE, r"\b(\d{1,3}(?:[.,]\d{3})+[.,]\d{2}|\d+[.,]\d{2})\b")
}

/// Normalize a matched amount to a plain decimal string.
///
/// The last separator followed by exactly two digits is the decimal mark;
/// every other separator is a thousands separator.
pub fn normalize_amount(raw: &str) -> Option<String> {
    let sep = raw.rfind(|c: char| c == '.' || c == ',')?;
    let (int_part, frac_part) = (&raw[..sep], &raw[sep + 1..]);
    if frac_part.len() != 2 || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("{}.{}", digits, frac_part))
}

#[derive(Clone, Copy, PartialEq)]
enum AnchorStrength {
    Strong,
    Plain,
    Weak,
}

/// Anchors are checked in order; more specific phrases come first.
const TOTAL_ANCHORS: &[(&str, AnchorStrength)] = &[
    ("grand total", AnchorStrength::Strong),
    ("amount due", AnchorStrength::Strong),
    ("balance due", AnchorStrength::Strong),
    ("total due", AnchorStrength::Strong),
    ("to pay", AnchorStrength::Strong),
    ("subtotal", AnchorStrength::Weak),
    ("sub total", AnchorStrength::Weak),
    ("sub-total", AnchorStrength::Weak),
    ("total", AnchorStrength::Plain),
];

/// Anchor lines that describe something other than the payable total.
const TOTAL_QUALIFIERS: &[&str] = &["tax", "savings", "discount", "items", "qty"];

/// Payment lines: cash handed over and change returned are never the total.
/// Whole words only, so `CASHIER` or `EXCHANGE` lines still count.
fn is_payment_line(line: &str) -> bool {
    static PAYMENT_RE: OnceLock<Regex> = OnceLock::new();
    regex(&PAYMENT_RE, r"(?i)\b(cash|change|tendered)\b").is_match(line)
}

fn anchor_strength(lower: &str) -> Option<AnchorStrength> {
    let (_, strength) = TOTAL_ANCHORS.iter().find(|(a, _)| lower.contains(a))?;
    if *strength == AnchorStrength::Plain && TOTAL_QUALIFIERS.iter().any(|q| lower.contains(q)) {
        return Some(AnchorStrength::Weak);
    }
    Some(*strength)
}

fn last_amount(line: &str) -> Option<(String, usize, usize)> {
    amount_regex()
        .find_iter(line)
        .filter_map(|m| normalize_amount(m.as_str()).map(|v| (v, m.start(), m.end())))
        .last()
}

fn total_candidates(lines: &[&str]) -> Vec<RuleCandidate> {
    let mut out = Vec::new();
    let n = lines.len().max(1) as f32;

    for (i, line) in lines.iter().enumerate() {
        let lower = line.to_lowercase();
        if is_payment_line(line) {
            continue;
        }
        let Some(strength) = anchor_strength(&lower) else {
            continue;
        };
        let adjust = match strength {
            AnchorStrength::Strong => 0.1,
            AnchorStrength::Plain => 0.05,
            AnchorStrength::Weak => -0.3,
        };

        if let Some((value, start, end)) = last_amount(line) {
            let confidence = (0.8 + adjust + 0.05 * (i as f32 / n)).clamp(0.0, 1.0);
            push_unique(
                &mut out,
                RuleCandidate::new(
                    FieldKind::TotalAmount,
                    value,
                    "total_same_line",
                    confidence,
                    span(i, line, start, end),
                ),
            );
            continue;
        }

        // Common layout: label on one line, amount right below it.
        if let Some(next) = lines.get(i + 1) {
            if let Some((value, start, end)) = last_amount(next) {
                let confidence = (0.7 + adjust + 0.05 * ((i + 1) as f32 / n)).clamp(0.0, 1.0);
                push_unique(
                    &mut out,
                    RuleCandidate::new(
                        FieldKind::TotalAmount,
                        value,
                        "total_next_line",
                        confidence,
                        span(i + 1, next, start, end),
                    ),
                );
            }
        }
    }

    if out.is_empty() {
        let window_start = lines.len().saturating_sub(TRAILING_AMOUNT_WINDOW);
        for i in (window_start..lines.len()).rev() {
            if is_payment_line(lines[i]) {
                continue;
            }
            if let Some((value, start, end)) = last_amount(lines[i]) {
                out.push(RuleCandidate::new(
                    FieldKind::TotalAmount,
                    value,
                    "trailing_amount",
                    0.4,
                    span(i, lines[i], start, end),
                ));
                break;
            }
        }
    }
    out
}

// ============ Date ============

struct DatePattern {
    id: &'static str,
    regex: Regex,
    order: DateOrder,
}

#[derive(Clone, Copy)]
enum DateOrder {
    Ymd,
    Mdy,
    Dmy,
}

fn date_patterns() -> &'static [DatePattern] {
    static PATTERNS: OnceLock<Vec<DatePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("date pattern must compile");
        vec![
            DatePattern {
                id: "iso_ymd",
                regex: compile(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b"),
                order: DateOrder::Ymd,
            },
            DatePattern {
                id: "ymd_slash",
                regex: compile(r"\b(\d{4})/(\d{1,2})/(\d{1,2})\b"),
                order: DateOrder::Ymd,
            },
            DatePattern {
                id: "ymd_dot",
                regex: compile(r"\b(\d{4})\.(\d{1,2})\.(\d{1,2})\b"),
                order: DateOrder::Ymd,
            },
            DatePattern {
                id: "mdy_slash",
                regex: compile(r"\b(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b"),
                order: DateOrder::Mdy,
            },
            DatePattern {
                id: "mdy_dash",
                regex: compile(r"\b(\d{1,2})-(\d{1,2})-(\d{4}|\d{2})\b"),
                order: DateOrder::Mdy,
            },
            DatePattern {
                id: "dmy_dot",
                regex: compile(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b"),
                order: DateOrder::Dmy,
            },
        ]
    })
}

fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    Some(match raw.len() {
        2 if year < 69 => 2000 + year,
        2 => 1900 + year,
        _ => year,
    })
}

/// Parse `(a, b, c)` captures into an ISO-8601 date string.
///
/// Returns `None` for impossible calendar dates; nothing is corrected.
fn to_iso(y: i32, m: u32, d: u32) -> Option<String> {
    NaiveDate::from_ymd_opt(y, m, d).map(|date| date.format("%Y-%m-%d").to_string())
}

/// Normalize a single date string in any supported format.
///
/// ```rust
/// use receipt_trace_core::rules::normalize_date;
///
/// assert_eq!(normalize_date("03/14/2024").as_deref(), Some("2024-03-14"));
/// assert_eq!(normalize_date("02/30/2024"), None);
/// ```
pub fn normalize_date(text: &str) -> Option<String> {
    date_matches(text).into_iter().next().map(|(value, ..)| value)
}

/// Every valid date in `line` as `(iso_value, pattern_id, start, end)`.
fn date_matches(line: &str) -> Vec<(String, &'static str, usize, usize)> {
    let mut found = Vec::new();
    for pattern in date_patterns() {
        for caps in pattern.regex.captures_iter(line) {
            let whole = caps.get(0).expect("group 0 always participates");
            let (a, b, c) = (&caps[1], &caps[2], &caps[3]);
            let parsed = match pattern.order {
                DateOrder::Ymd => {
                    let (Ok(m), Ok(d)) = (b.parse(), c.parse()) else {
                        continue;
                    };
                    expand_year(a).and_then(|y| to_iso(y, m, d)).map(|v| (v, pattern.id))
                }
                DateOrder::Dmy => {
                    let (Ok(d), Ok(m)) = (a.parse(), b.parse()) else {
                        continue;
                    };
                    expand_year(c).and_then(|y| to_iso(y, m, d)).map(|v| (v, pattern.id))
                }
                DateOrder::Mdy => {
                    let (Ok(first), Ok(second)) = (a.parse::<u32>(), b.parse::<u32>()) else {
                        continue;
                    };
                    let Some(y) = expand_year(c) else {
                        continue;
                    };
                    if first > 12 && pattern.id == "mdy_slash" {
                        // Day-first only when month-first is impossible.
                        to_iso(y, second, first).map(|v| (v, "dmy_slash"))
                    } else {
                        to_iso(y, first, second).map(|v| (v, pattern.id))
                    }
                }
            };
            if let Some((value, id)) = parsed {
                found.push((value, id, whole.start(), whole.end()));
            }
        }
    }
    found
}

fn date_candidates(lines: &[&str]) -> Vec<RuleCandidate> {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    let time_re = regex(&TIME_RE, r"\b\d{1,2}:\d{2}(:\d{2})?\b");

    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        for (value, pattern_id, start, end) in date_matches(line) {
            let mut confidence = 0.6;
            if time_re.is_match(line) {
                confidence += 0.2;
            }
            if i as f32 > lines.len() as f32 * 0.6 {
                confidence += 0.1;
            }
            if pattern_id == "dmy_slash" {
                confidence -= 0.1;
            }
            push_unique(
                &mut out,
                RuleCandidate::new(
                    FieldKind::Date,
                    value,
                    pattern_id,
                    confidence,
                    span(i, line, start, end),
                ),
            );
        }
    }
    out
}

// ============ Merchant ============

fn is_noise_line(line: &str) -> bool {
    static NOISE_RE: OnceLock<Regex> = OnceLock::new();
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    let noise_re = regex(
        &NOISE_RE,
        r"(?i)(\b(open|hours|tel|phone|fax|receipt|invoice|thank)\b|\b(tr|st|tc|op|te)#|https?://|www\.)",
    );
    let phone_re = regex(&PHONE_RE, r"\(?\d{3}\)?[\s.-]?\d{3}[\s.-]\d{4}");
    noise_re.is_match(line) || phone_re.is_match(line)
}

fn merchant_candidates(lines: &[&str]) -> Vec<RuleCandidate> {
    let mut out: Vec<RuleCandidate> = Vec::new();
    for (i, line) in lines.iter().take(MERCHANT_HEAD_LINES).enumerate() {
        if line.chars().count() < 3 || !line.chars().any(char::is_alphabetic) {
            continue;
        }
        if is_noise_line(line) {
            continue;
        }
        let (pattern_id, mut confidence) = if out.is_empty() {
            ("first_text_line", 0.4)
        } else {
            ("header_line", 0.3)
        };
        if !line.chars().any(char::is_lowercase) {
            confidence += 0.1;
        }
        out.push(RuleCandidate::new(
            FieldKind::Merchant,
            *line,
            pattern_id,
            confidence,
            span(i, line, 0, line.len()),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALMART: &str = "WALMART\nSAVE MONEY. LIVE BETTER.\n( 555 ) 555-1234\nST# 5748 OP# 00000158 TE# 14 TR# 03178\nBREAD 2.50\nMILK 3.49\nSUBTOTAL 5.99\nTAX 1 7.000 % 0.42\nTOTAL 6.41\nCASH TEND 10.00\nCHANGE DUE 3.59\n08/20/10 16:05:30";

    fn of_kind(cands: &[RuleCandidate], kind: FieldKind) -> Vec<&RuleCandidate> {
        cands.iter().filter(|c| c.field_kind == kind).collect()
    }

    fn run(text: &str) -> Vec<RuleCandidate> {
        generate_from_text(text, &RuleOptions::default())
    }

    #[test]
    fn test_empty_text_yields_no_candidates() {
        assert!(run("").is_empty());
        assert!(run("\n\n   \n").is_empty());
    }

    #[test]
    fn test_date_normalizes_month_first() {
        let cands = run("Date: 03/14/2024");
        let dates = of_kind(&cands, FieldKind::Date);
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].value, "2024-03-14");
        assert_eq!(dates[0].pattern_id, "mdy_slash");
        assert_eq!(dates[0].source_span.line_text, "Date: 03/14/2024");
        assert_eq!(&dates[0].source_span.line_text[dates[0].source_span.start..dates[0].source_span.end], "03/14/2024");
    }

    #[test]
    fn test_invalid_calendar_date_is_discarded() {
        let cands = run("02/30/2024");
        assert!(of_kind(&cands, FieldKind::Date).is_empty());
        assert_eq!(normalize_date("2023-02-29"), None);
        assert_eq!(normalize_date("13/32/2024"), None);
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(normalize_date("2026-01-05").as_deref(), Some("2026-01-05"));
        assert_eq!(normalize_date("2026/1/5").as_deref(), Some("2026-01-05"));
        assert_eq!(normalize_date("2026.01.05").as_deref(), Some("2026-01-05"));
        assert_eq!(normalize_date("08-20-2010").as_deref(), Some("2010-08-20"));
        assert_eq!(normalize_date("08/20/10").as_deref(), Some("2010-08-20"));
        assert_eq!(normalize_date("12/31/99").as_deref(), Some("1999-12-31"));
        assert_eq!(normalize_date("25.12.2023").as_deref(), Some("2023-12-25"));
    }

    #[test]
    fn test_day_first_only_when_month_first_impossible() {
        let cands = run("14/03/2024");
        let dates = of_kind(&cands, FieldKind::Date);
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].value, "2024-03-14");
        assert_eq!(dates[0].pattern_id, "dmy_slash");
        assert!(dates[0].confidence < 0.6);
    }

    #[test]
    fn test_date_with_time_near_bottom_scores_higher() {
        let cands = run(WALMART);
        let dates = of_kind(&cands, FieldKind::Date);
        assert_eq!(dates[0].value, "2010-08-20");
        assert!((dates[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_total_prefers_total_over_subtotal_and_change() {
        let cands = run(WALMART);
        let totals = of_kind(&cands, FieldKind::TotalAmount);
        assert_eq!(totals[0].value, "6.41");
        assert_eq!(totals[0].pattern_id, "total_same_line");
        assert!(totals.iter().all(|c| c.value != "3.59"), "change due must be skipped");
        let subtotal = totals.iter().find(|c| c.value == "5.99").unwrap();
        assert!(subtotal.confidence < totals[0].confidence);
    }

    #[test]
    fn test_payment_words_match_whole_words_only() {
        let cands = run("CASHIER: DANA\nTOTAL EXCHANGE ITEMS\nTOTAL 12.00\nCASH 20.00\nCHANGE 8.00");
        let totals = of_kind(&cands, FieldKind::TotalAmount);
        assert_eq!(totals[0].value, "12.00");
        assert!(totals.iter().all(|c| c.value != "20.00" && c.value != "8.00"));

        let cands = run("CASHIER TOTAL 7.25");
        let totals = of_kind(&cands, FieldKind::TotalAmount);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].value, "7.25");
        assert_eq!(totals[0].pattern_id, "total_same_line");
    }

    #[test]
    fn test_total_on_next_line() {
        let cands = run("ACME\nAMOUNT DUE\n$1,234.56");
        let totals = of_kind(&cands, FieldKind::TotalAmount);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].value, "1234.56");
        assert_eq!(totals[0].pattern_id, "total_next_line");
        assert_eq!(totals[0].source_span.line_index, 2);
    }

    #[test]
    fn test_later_total_preferred() {
        let cands = run("TOTAL 10.00\nitem 1.00\nTOTAL 11.00");
        let totals = of_kind(&cands, FieldKind::TotalAmount);
        assert_eq!(totals[0].value, "11.00");
    }

    #[test]
    fn test_trailing_amount_fallback() {
        let cands = run("CAFE\nLATTE 4.50\nMUFFIN 3,25");
        let totals = of_kind(&cands, FieldKind::TotalAmount);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].value, "3.25");
        assert_eq!(totals[0].pattern_id, "trailing_amount");
        assert!((totals[0].confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_amount() {
        assert_eq!(normalize_amount("1,234.56").as_deref(), Some("1234.56"));
        assert_eq!(normalize_amount("1.234,56").as_deref(), Some("1234.56"));
        assert_eq!(normalize_amount("12,50").as_deref(), Some("12.50"));
        assert_eq!(normalize_amount("12.5"), None);
        assert_eq!(normalize_amount("1234"), None);
    }

    #[test]
    fn test_currency_classes() {
        let cands = run("Total USD 5.00\nPaid US$ 5.00\n€ 3.00");
        let cur = of_kind(&cands, FieldKind::Currency);
        let by_pattern = |p: &str| cur.iter().find(|c| c.pattern_id == p).unwrap();
        assert_eq!(by_pattern("iso_code").value, "USD");
        assert!((by_pattern("iso_code").confidence - 0.7).abs() < 1e-6);
        assert_eq!(by_pattern("qualified_symbol").value, "USD");
        assert_eq!(by_pattern("symbol").value, "EUR");
        assert_eq!(cur[0].pattern_id, "iso_code");
    }

    #[test]
    fn test_qualified_symbol_not_double_counted() {
        let cands = run("C$ 12.00");
        let cur = of_kind(&cands, FieldKind::Currency);
        assert_eq!(cur.len(), 1);
        assert_eq!(cur[0].value, "CAD");
    }

    #[test]
    fn test_unknown_code_ignored() {
        let cands = run("REF ABC 123");
        assert!(of_kind(&cands, FieldKind::Currency).is_empty());
    }

    #[test]
    fn test_merchant_first_text_line() {
        let cands = run(WALMART);
        let merchants = of_kind(&cands, FieldKind::Merchant);
        assert_eq!(merchants[0].value, "WALMART");
        assert_eq!(merchants[0].pattern_id, "first_text_line");
        assert!(merchants.iter().all(|c| !c.value.starts_with("ST#")));
        assert!(merchants.iter().all(|c| !c.value.contains("555")));
    }

    #[test]
    fn test_merchant_skips_numeric_lines() {
        let cands = run("0042 7781\n12/01/2024\nBlue Bottle Coffee");
        let merchants = of_kind(&cands, FieldKind::Merchant);
        assert_eq!(merchants[0].value, "Blue Bottle Coffee");
        assert_eq!(merchants[0].source_span.line_index, 2);
    }

    #[test]
    fn test_max_candidates_per_kind() {
        let text = (1..=9).map(|d| format!("0{}/01/2024", d)).collect::<Vec<_>>().join("\n");
        let options = RuleOptions {
            max_candidates_per_kind: 3,
            ..RuleOptions::default()
        };
        let cands = generate_from_text(&text, &options);
        assert_eq!(of_kind(&cands, FieldKind::Date).len(), 3);
    }

    #[test]
    fn test_grouped_in_field_kind_order() {
        let cands = run(WALMART);
        let kinds: Vec<FieldKind> = cands.iter().map(|c| c.field_kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(run(WALMART), run(WALMART));
    }
}
