use std::sync::LazyLock;

use regex::Regex;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DISCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\d+\s*%\s*OFF!?").unwrap());
static YEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9][0-9,]*)\s*円").unwrap());
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9][0-9,]*(?:\.[0-9]+)?").unwrap());

static BRACKETS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【[^】]*】|《[^》]*》|\[[^\]]*\]").unwrap());
static PARENS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(([^)]*)\)").unwrap());
static VARIANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:ver(?:sion)?|dx|v2|2\.0|衣装|カラー|色|コスチューム|アウトフィット)").unwrap()
});
static TAIL_VARIANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:ver(?:sion)?$|dx$|v2$|2\.0$|衣装|カラー|色|コスチューム|アウトフィット)").unwrap()
});
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"再販|予約|送料無料|限定販売|限定|特典|アクションフィギュア|ノンスケール|塗装済み可動フィギュア|プラスチック製|フィギュア",
    )
    .unwrap()
});
static FULL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*(?:[\\/\-.]|年)\s*(\d{1,2})\s*(?:[\\/\-.]|月)\s*(\d{1,2})\s*日?").unwrap()
});
static MONTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})\s*(?:[\\/\-.]|年)\s*(\d{1,2})\s*月").unwrap());
static SHORT_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})\s*年\s*(\d{1,2})\s*月").unwrap());
static JAN_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)JAN[^\n\r]{0,80}").unwrap());
static JAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\D)(\d{13})(?:\D|$)").unwrap());

static CJK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{3040}-\x{30FF}\x{4E00}-\x{9FFF}]").unwrap());

// Longest first so "POP UP PARADE L" wins over "POP UP PARADE".
const SERIES: &[&str] = &[
    "POP UP PARADE XLサイズ",
    "POP UP PARADE XL",
    "POP UP PARADE L",
    "POP UP PARADE",
    "ねんどろいど",
    "ARTFX J",
    "ARTFX",
    "BISHOUJO",
    "BISHOJO",
    "KDcolle",
    "figma",
];
const BRAND_WORDS: &[&str] = &["ホロライブプロダクション"];

/// Collapse runs of whitespace and trim.
pub fn normalize_text(s: &str) -> String {
    WS_RE.replace_all(s.trim(), " ").into_owned()
}

/// Fold full-width ASCII and the ideographic space to their half-width forms.
pub fn fold_width(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Case-insensitive substring match against any keyword. No keywords matches everything.
pub fn title_matches(title: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let t = normalize_text(title).to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .any(|k| t.contains(&k.to_lowercase()))
}

/// Reduce a displayed price to its digits: "12,800円(税込)" -> "12800", "1200.00" -> "1200".
pub fn price_digits(raw: &str) -> String {
    let folded = fold_width(raw);
    let cleaned = DISCOUNT_RE.replace_all(&folded, "");

    if let Some(caps) = YEN_RE.captures(&cleaned) {
        return digits_only(&caps[1]);
    }
    let Some(m) = NUMBER_RE.find(&cleaned) else {
        return String::new();
    };
    let number = m.as_str();
    let whole = match number.split_once('.') {
        Some((whole, frac)) if frac.trim_matches('0').is_empty() => whole,
        _ => number,
    };
    digits_only(whole)
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Japanese release wording to `YYYY-MM-DD`, or `YYYY-MM` when only the
/// month is known ("2025年8月発売予定" -> "2025-08"). Anything else comes back
/// whitespace-normalized.
pub fn release_date(raw: &str) -> String {
    let s = normalize_text(&fold_width(raw));
    let num = |m: &str| m.parse::<u32>().unwrap_or_default();

    if let Some(c) = FULL_DATE_RE.captures(&s) {
        return format!("{}-{:02}-{:02}", &c[1], num(&c[2]), num(&c[3]));
    }
    if let Some(c) = MONTH_RE.captures(&s) {
        return format!("{}-{:02}", &c[1], num(&c[2]));
    }
    if let Some(c) = SHORT_YEAR_RE.captures(&s) {
        let yy = num(&c[1]);
        let year = if yy >= 70 { 1900 + yy } else { 2000 + yy };
        return format!("{}-{:02}", year, num(&c[2]));
    }
    s
}

/// A 13-digit JAN code, preferring one that follows a "JAN" label.
pub fn jan_code(text: &str) -> Option<String> {
    let folded = fold_width(text);
    let near_label = JAN_LABEL_RE
        .find(&folded)
        .and_then(|m| JAN_RE.captures(m.as_str()));
    near_label
        .or_else(|| JAN_RE.captures(&folded))
        .map(|c| c[1].to_string())
}

/// Build a coarse `series|character|variant` key from a product title so
/// re-listed variants of one figure can be grouped downstream.
pub fn title_key(title: &str) -> String {
    let t = normalize_text(&fold_width(title));
    if t.is_empty() {
        return String::new();
    }
    let t = BRACKETS_RE.replace_all(&t, " ");

    let mut variant = PARENS_RE
        .captures_iter(&t)
        .map(|c| normalize_text(&c[1]))
        .find(|p| p.chars().count() <= 30 && VARIANT_RE.is_match(p))
        .unwrap_or_default();

    let t = PARENS_RE.replace_all(&t, " ");
    let t = NOISE_RE.replace_all(&t, " ");
    let t = normalize_text(&t);

    let series = SERIES
        .iter()
        .find(|s| t.contains(*s))
        .map(|s| s.to_string())
        .or_else(|| t.split(' ').next().map(str::to_string))
        .unwrap_or_default();

    let rest = t.replacen(&series, " ", 1);
    let tokens: Vec<&str> = rest
        .split(' ')
        .filter(|tok| !tok.is_empty() && !BRAND_WORDS.contains(tok))
        .collect();
    let character = tokens
        .iter()
        .find(|tok| CJK_RE.is_match(tok))
        .or_else(|| tokens.first())
        .map(|s| s.to_string())
        .unwrap_or_default();

    if variant.is_empty() {
        let all: Vec<&str> = t.split(' ').collect();
        let tail = &all[all.len().saturating_sub(4)..];
        if let Some(tok) = tail.iter().rev().find(|tok| TAIL_VARIANT_RE.is_match(tok)) {
            variant = tok.to_string();
        }
    }

    format!("{series}|{character}|{variant}")
        .trim_matches('|')
        .to_string()
}
