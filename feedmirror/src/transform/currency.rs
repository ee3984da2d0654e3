//! Deterministic reformatting of market-rate bulletins.
//!
//! Only messages opening with [`SENTINEL`] are handled. Each entry looks like
//! `💵 دلار آمریکا: 59000 تومان 500🔼 %0.8` and is re-rendered inside a fixed
//! heading/footer block, grouped by category.

use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;

pub const SENTINEL: &str = "نرخ فروش #دلار، #ارز، #سکه و #طلا در بازار";

const TOMAN: &str = "تومان";

static RE_FIAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:💵|💶|💷|🇨🇦|🇦🇺|💴|🇦🇪|🇹🇷|🇮🇶|🇦🇿|🇦🇫)\s*([^:\n]+):\s*([\d,]+)\s*تومان\s*([\d,]+)?\s*(🔼|🔻|➖)\s*%([\d.+-]+)",
    )
    .unwrap()
});
static RE_COIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:🌕|🌟|💫)\s*([^:\n]+):\s*([\d,]+)\s*تومان\s*([\d,]+)?\s*(🔼|🔻|➖)\s*%([\d.+-]+)")
        .unwrap()
});
static RE_CRYPTO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:💲|💸|♦️|♦|✖️|✖|🔶|⛓️|⛓|💎|💥)\s*([^:\n]+):\s*([\d,.]+)\s*(تومان|🔻|🔼)?\s*([\d,]+)?\s*(🔼|🔻|➖)\s*%([\d.+-]+)",
    )
    .unwrap()
});
static RE_UPDATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"⌚آخرین بروزرسانی:\s*(.*)").unwrap());

const FLAGS: &[(&str, &str)] = &[
    ("دلار آمریکا", "🇺🇸"),
    ("یورو", "🇪🇺"),
    ("پوند", "🇬🇧"),
    ("دلار کانادا", "🇨🇦"),
    ("دلار استرالیا", "🇦🇺"),
    ("ین ژاپن", "🇯🇵"),
    ("درهم امارات", "🇦🇪"),
    ("لیر ترکیه", "🇹🇷"),
    ("دینار عراق", "🇮🇶"),
    ("منات آذربایجان", "🇦🇿"),
    ("افغانی", "🇦🇫"),
    ("سکه امامی", "🌕"),
    ("سکه طرح قدیم", "🌟"),
    ("گرم طلا 18 عیار", "💫"),
    ("بیت\u{200c}کوین", "💰"),
    ("اتریوم", "💎"),
    ("تتر", "💲"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Fiat,
    Coin,
    Crypto,
}

impl Category {
    fn default_flag(self) -> &'static str {
        match self {
            Category::Fiat => "💵",
            Category::Coin => "🌕",
            Category::Crypto => "💰",
        }
    }

    fn heading(self) -> &'static str {
        match self {
            Category::Fiat => "<b>💸 ارزها:</b>",
            Category::Coin => "<b>🌟 سکه و طلا:</b>",
            Category::Crypto => "<b>💰 ارزهای دیجیتال:</b>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RateEntry<'a> {
    name: &'a str,
    rate: &'a str,
    unit: &'a str,
    change: &'a str,
    direction: &'a str,
    percent: &'a str,
}

fn flag_for(name: &str, category: Category) -> &'static str {
    FLAGS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, flag)| *flag)
        .unwrap_or_else(|| category.default_flag())
}

fn non_empty<'a>(m: Option<regex::Match<'a>>) -> Option<&'a str> {
    m.map(|m| m.as_str()).filter(|s| !s.is_empty())
}

fn parse_toman_entries<'a>(re: &Regex, text: &'a str) -> Vec<RateEntry<'a>> {
    re.captures_iter(text)
        .map(|c| RateEntry {
            name: c.get(1).map_or("", |m| m.as_str().trim()),
            rate: c.get(2).map_or("", |m| m.as_str()),
            unit: TOMAN,
            change: non_empty(c.get(3)).unwrap_or("0"),
            direction: c.get(4).map_or("", |m| m.as_str()),
            percent: c.get(5).map_or("", |m| m.as_str()),
        })
        .collect()
}

fn parse_crypto_entries(text: &str) -> Vec<RateEntry<'_>> {
    RE_CRYPTO
        .captures_iter(text)
        .map(|c| RateEntry {
            name: c.get(1).map_or("", |m| m.as_str().trim()),
            rate: c.get(2).map_or("", |m| m.as_str()),
            unit: non_empty(c.get(3)).unwrap_or(TOMAN),
            change: non_empty(c.get(4)).unwrap_or("0"),
            direction: c.get(5).map_or("", |m| m.as_str()),
            percent: c.get(6).map_or("", |m| m.as_str()),
        })
        .collect()
}

fn render_section(out: &mut String, category: Category, entries: &[RateEntry<'_>]) {
    out.push_str(category.heading());
    out.push('\n');
    for e in entries {
        let _ = writeln!(
            out,
            "{} {}: {} {} {}{} ({}%)",
            flag_for(e.name, category),
            e.name,
            e.rate,
            e.unit,
            e.change,
            e.direction,
            e.percent
        );
    }
}

/// Pure formatter; no state, no I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrencyFormatter;

impl CurrencyFormatter {
    /// `None` when `text` is not a rate bulletin.
    pub fn format(&self, text: &str) -> Option<String> {
        if !text.starts_with(SENTINEL) {
            return None;
        }

        let fiat = parse_toman_entries(&RE_FIAT, text);
        let coins = parse_toman_entries(&RE_COIN, text);
        let crypto = parse_crypto_entries(text);

        let mut out = String::from("\u{200f}<pre>\n📊 <b>نرخ لحظه\u{200c}ای بازار</b>\n\n");
        let mut first = true;
        for (category, entries) in [
            (Category::Fiat, &fiat),
            (Category::Coin, &coins),
            (Category::Crypto, &crypto),
        ] {
            if entries.is_empty() {
                continue;
            }
            if !first {
                out.push('\n');
            }
            render_section(&mut out, category, entries);
            first = false;
        }

        if let Some(updated) = RE_UPDATED.captures(text).and_then(|c| c.get(1)) {
            let _ = write!(out, "\n⌚ <b>به\u{200c}روزرسانی:</b> {}", updated.as_str());
        }
        out.push_str("\n📈 نظرتون چیه؟\n</pre>");
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BULLETIN: &str = "نرخ فروش #دلار، #ارز، #سکه و #طلا در بازار\n\
        💵 دلار آمریکا: 59000 تومان 500🔼 %0.8\n\
        💶 یورو: 64000 تومان ➖ %0\n\
        💷 پوند ناشناخته: 75000 تومان 300🔻 %-0.4\n\
        🌕 سکه امامی: 38000000 تومان 200000🔼 %0.5\n\
        💎 اتریوم: 180000000 تومان 1000🔻 %-1.2\n\
        ⌚آخرین بروزرسانی: 14:30";

    #[test]
    fn single_line_bulletin_renders_fiat_entry() {
        let input = "نرخ فروش #دلار، #ارز، #سکه و #طلا در بازار 💵 دلار آمریکا: 59000 تومان 500🔼 %0.8";
        let out = CurrencyFormatter.format(input).expect("bulletin");
        assert!(out.contains("🇺🇸 دلار آمریکا: 59000 تومان 500🔼 (0.8%)"));
        assert!(out.contains("<b>💸 ارزها:</b>"));
        assert!(!out.contains("سکه و طلا"));
    }

    #[test]
    fn every_category_gets_its_section() {
        let out = CurrencyFormatter.format(BULLETIN).expect("bulletin");
        assert!(out.starts_with("\u{200f}<pre>\n📊"));
        assert!(out.ends_with("\n📈 نظرتون چیه؟\n</pre>"));
        assert!(out.contains("🇪🇺 یورو: 64000 تومان 0➖ (0%)"));
        // unknown name falls back to the category default
        assert!(out.contains("💵 پوند ناشناخته: 75000 تومان 300🔻 (-0.4%)"));
        assert!(out.contains("<b>🌟 سکه و طلا:</b>\n🌕 سکه امامی: 38000000 تومان 200000🔼 (0.5%)"));
        assert!(out.contains("<b>💰 ارزهای دیجیتال:</b>\n💎 اتریوم: 180000000 تومان 1000🔻 (-1.2%)"));
        assert!(out.contains("⌚ <b>به\u{200c}روزرسانی:</b> 14:30"));
    }

    #[test]
    fn output_is_deterministic() {
        let a = CurrencyFormatter.format(BULLETIN);
        let b = CurrencyFormatter.format(BULLETIN);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn text_without_sentinel_is_not_applicable() {
        assert!(CurrencyFormatter.format("💵 دلار آمریکا: 59000 تومان 500🔼 %0.8").is_none());
        assert!(CurrencyFormatter.format("").is_none());
    }

    #[test]
    fn crypto_unit_defaults_to_toman() {
        let input = format!("{}\n💲 تتر: 61000 ➖ %0.1", SENTINEL);
        let out = CurrencyFormatter.format(&input).expect("bulletin");
        assert!(out.contains("💲 تتر: 61000 تومان 0➖ (0.1%)"));
    }
}
