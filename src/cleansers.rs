//! Field-level cleansers for hand-typed spreadsheet cells.
//!
//! Every function here is total: bad input produces `None` (or a best-effort
//! value), never a panic or an error.

use std::sync::OnceLock;

use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sheet_parser::Cell;

// ============================================================================
// Strings and numbers
// ============================================================================

pub fn clean_string(cell: &Cell) -> Option<String> {
    cell.as_text()
}

fn leading_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d*\.?\d+").expect("static leading number regex"))
}

/// Strip everything except digits, `.` and `-`, then read the leading number.
///
/// "1.5 has." strips to "1.5." and still yields 1.5.
pub fn clean_number(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(n) if n.is_finite() => Some(*n),
        Cell::Number(_) | Cell::Empty => None,
        Cell::Text(s) => {
            let stripped: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            leading_number_regex()
                .find(&stripped)?
                .as_str()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
        }
    }
}

pub fn clean_gender(cell: &Cell) -> Option<String> {
    let raw = cell.as_text()?;
    match raw.to_lowercase().as_str() {
        "m" | "male" => Some("Male".to_string()),
        "f" | "female" => Some("Female".to_string()),
        _ => Some(title_case(&raw)),
    }
}

/// Keep digits (and a leading `+`). Excel drops the leading zero of `09…` numbers.
pub fn clean_cellphone(cell: &Cell) -> Option<String> {
    let raw = cell.as_text()?;
    let plus = raw.starts_with('+');
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if plus {
        Some(format!("+{}", digits))
    } else if digits.len() == 10 && digits.starts_with('9') {
        Some(format!("0{}", digits))
    } else {
        Some(digits)
    }
}

pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a purok/sitio label.
pub fn clean_purok(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("Purok {}", trimmed));
    }
    // Both "PUROK 3" and named sitios end up Title Case.
    Some(title_case(trimmed))
}

// ============================================================================
// Dates
// ============================================================================

/// Serial day 0 of the 1900 date system (absorbs the fake 1900-02-29).
fn excel_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

/// Largest serial Excel can display (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;
/// Serials typed as text below this (early 1908) are treated as noise.
const MIN_TEXT_SERIAL: f64 = 2958.0;

const TEXT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d-%b-%y",
    "%d-%b-%Y",
];

/// Normalize an Excel serial or free-text date to `YYYY-MM-DD`.
pub fn clean_date(cell: &Cell) -> Option<String> {
    let date = match cell {
        Cell::Empty => None,
        Cell::Number(serial) => excel_serial_to_date(*serial),
        Cell::Text(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                // A bare "1980" is a year, not serial 1980 (1905-06-02).
                Ok(serial) if serial > MIN_TEXT_SERIAL => excel_serial_to_date(serial),
                Ok(_) => None,
                Err(_) => parse_text_date(s),
            }
        }
    }?;

    Some(date.format("%Y-%m-%d").to_string())
}

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    excel_epoch()?.checked_add_days(Days::new(serial.trunc() as u64))
}

fn parse_text_date(s: &str) -> Option<NaiveDate> {
    // "2025-01-19 00:00:00" / "2025-01-19T00:00:00Z"
    let candidate = match s.get(..10) {
        Some(prefix) if s.len() > 10 && prefix.as_bytes()[4] == b'-' => prefix,
        _ => s,
    };

    TEXT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
        .filter(|d| (1900..=2100).contains(&d.year()))
}

/// Planting window parsed out of free text like "Jan 19-25, 2025".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn date_range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z]+)\.?\s+(\d{1,2})\s*[-–]\s*(\d{1,2})(?:\s*,?\s*(\d{4}))?$")
            .expect("static date range regex")
    })
}

fn single_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z]+)\.?\s+(\d{1,2})(?:\s*,?\s*(\d{4}))?$")
            .expect("static single date regex")
    })
}

fn iso_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static iso date regex"))
}

/// Parse a planting date range; a missing year means the current year.
pub fn parse_date_range(raw: &str) -> DateRange {
    parse_date_range_in_year(raw, chrono::Local::now().year())
}

pub fn parse_date_range_in_year(raw: &str, default_year: i32) -> DateRange {
    let raw = raw.trim();

    if iso_date_regex().is_match(raw) {
        return match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => same_day(d),
            Err(_) => DateRange::default(),
        };
    }

    if let Some(caps) = date_range_regex().captures(raw) {
        let month = month_number(&caps[1]);
        let year = caps.get(4).and_then(|y| y.as_str().parse().ok()).unwrap_or(default_year);
        let start = month.and_then(|m| ymd(year, m, &caps[2]));
        let end = month.and_then(|m| ymd(year, m, &caps[3]));
        return match (start, end) {
            (Some(s), Some(e)) if s <= e => DateRange {
                start_date: Some(iso(s)),
                end_date: Some(iso(e)),
            },
            _ => DateRange::default(),
        };
    }

    if let Some(caps) = single_date_regex().captures(raw) {
        let year = caps.get(3).and_then(|y| y.as_str().parse().ok()).unwrap_or(default_year);
        return month_number(&caps[1])
            .and_then(|m| ymd(year, m, &caps[2]))
            .map(same_day)
            .unwrap_or_default();
    }

    DateRange::default()
}

fn same_day(d: NaiveDate) -> DateRange {
    DateRange {
        start_date: Some(iso(d)),
        end_date: Some(iso(d)),
    }
}

fn iso(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn ymd(year: i32, month: u32, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day.parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_lowercase();
    let prefix = lower.get(..3)?;
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
}

// ============================================================================
// Names
// ============================================================================

/// A full name split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonName {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
}

/// Strategy for splitting a single "Name" cell.
pub trait NameParser: Send + Sync {
    fn parse(&self, full_name: &str) -> PersonName;
}

/// 1 → first; 2 → first last; 3 → first middle last;
/// 4+ → the first two tokens form the given name, the last token is the surname.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCountNameParser;

impl NameParser for TokenCountNameParser {
    fn parse(&self, full_name: &str) -> PersonName {
        parse_name(full_name)
    }
}

/// First token is the given name, last token the surname, the rest middle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleGivenNameParser;

impl NameParser for SingleGivenNameParser {
    fn parse(&self, full_name: &str) -> PersonName {
        let tokens = name_tokens(full_name);
        match tokens.len() {
            0 => PersonName::default(),
            1 => PersonName {
                first_name: Some(tokens[0].clone()),
                ..Default::default()
            },
            n => PersonName {
                first_name: Some(tokens[0].clone()),
                middle_name: if n > 2 {
                    Some(tokens[1..n - 1].join(" "))
                } else {
                    None
                },
                last_name: Some(tokens[n - 1].clone()),
            },
        }
    }
}

/// `/` and `+` are dropped outright ("Juan/Pedro" is one token).
fn name_tokens(full_name: &str) -> Vec<String> {
    full_name
        .replace(['/', '+'], "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Which [`NameParser`] an import template uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameStrategy {
    #[default]
    TwoGivenNames,
    SingleGivenName,
}

impl NameStrategy {
    pub fn parser(self) -> &'static dyn NameParser {
        static TOKEN_COUNT: TokenCountNameParser = TokenCountNameParser;
        static SINGLE_GIVEN: SingleGivenNameParser = SingleGivenNameParser;
        match self {
            NameStrategy::TwoGivenNames => &TOKEN_COUNT,
            NameStrategy::SingleGivenName => &SINGLE_GIVEN,
        }
    }
}

/// Split a full name with the default token-count heuristic.
pub fn parse_name(full_name: &str) -> PersonName {
    let tokens = name_tokens(full_name);
    match tokens.len() {
        0 => PersonName::default(),
        1 => PersonName {
            first_name: Some(tokens[0].clone()),
            ..Default::default()
        },
        2 => PersonName {
            first_name: Some(tokens[0].clone()),
            middle_name: None,
            last_name: Some(tokens[1].clone()),
        },
        3 => PersonName {
            first_name: Some(tokens[0].clone()),
            middle_name: Some(tokens[1].clone()),
            last_name: Some(tokens[2].clone()),
        },
        n => PersonName {
            first_name: Some(tokens[..2].join(" ")),
            middle_name: Some(tokens[2..n - 1].join(" ")),
            last_name: Some(tokens[n - 1].clone()),
        },
    }
}

// ============================================================================
// Numeric expressions ("500 + 500" in a quantity cell)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Add,
    Sub,
    Mul,
    Div,
}

/// Evaluate a quantity cell that may hold simple arithmetic.
///
/// Only numbers, whitespace and `+ - * / x X` are accepted; anything else
/// (letters, parentheses, punctuation) yields `None` without evaluating.
pub fn sum_numeric_expression(raw: &str) -> Option<f64> {
    let tokens = tokenize(raw)?;
    let mut parser = ExprParser { tokens: &tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != tokens.len() || !value.is_finite() {
        return None;
    }
    Some(value)
}

fn tokenize(raw: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = raw.trim().chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                    } else if d != ',' {
                        break;
                    }
                    chars.next();
                }
                tokens.push(Token::Num(literal.parse().ok()?));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Add);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Sub);
            }
            '*' | 'x' | 'X' | '×' => {
                chars.next();
                tokens.push(Token::Mul);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Div);
            }
            _ => return None,
        }
    }

    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl ExprParser<'_> {
    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).copied();
        self.pos += 1;
        t
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Option<f64> {
        let mut acc = self.term()?;
        while let Some(op @ (Token::Add | Token::Sub)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == Token::Add { acc + rhs } else { acc - rhs };
        }
        Some(acc)
    }

    // term := operand (('*' | '/') operand)*
    fn term(&mut self) -> Option<f64> {
        let mut acc = self.operand()?;
        while let Some(op @ (Token::Mul | Token::Div)) = self.peek() {
            self.pos += 1;
            let rhs = self.operand()?;
            acc = if op == Token::Mul {
                acc * rhs
            } else if rhs == 0.0 {
                return None;
            } else {
                acc / rhs
            };
        }
        Some(acc)
    }

    // operand := '-'? number
    fn operand(&mut self) -> Option<f64> {
        match self.next()? {
            Token::Num(n) => Some(n),
            Token::Sub => match self.next()? {
                Token::Num(n) => Some(-n),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Quantity cell: arithmetic expression first, then lenient number stripping.
pub fn clean_quantity(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Text(s) => sum_numeric_expression(s).or_else(|| clean_number(cell)),
        other => clean_number(other),
    }
}
