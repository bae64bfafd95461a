use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// A structured expense candidate parsed out of one chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedExpense {
    pub amount: f64,
    pub category: String,
    pub subcategory: Option<String>,
    pub description: String,
    pub expense_date: Option<NaiveDate>,
    pub vendor: Option<String>,
    pub payment_method: String,
    pub original_message: String,
}

/// One amount-extraction pattern, tried in order from most to least specific.
struct AmountRule {
    name: &'static str,
    re: Regex,
}

static AMOUNT_RULES: Lazy<Vec<AmountRule>> = Lazy::new(|| {
    vec![
        AmountRule {
            name: "currency-suffixed",
            re: Regex::new(r"(?i)([0-9][0-9,]*(?:\.[0-9]+)?)\s*(?:บาท|baht|bath|฿)").unwrap(),
        },
        AmountRule {
            name: "currency-prefixed",
            re: Regex::new(r"฿\s*([0-9][0-9,]*(?:\.[0-9]+)?)").unwrap(),
        },
        AmountRule {
            name: "bare-number",
            re: Regex::new(r"([0-9][0-9,]*(?:\.[0-9]+)?)").unwrap(),
        },
    ]
});

static DATE_DMY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{1,2})/([0-9]{1,2})/([0-9]{4})").unwrap());
static DATE_YMD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{4})-([0-9]{1,2})-([0-9]{1,2})").unwrap());

// Vendor phrase after a preposition, e.g. "ซื้อของที่แม็คโคร". Longest
// alternative first so ที่ร้าน is not split into ที่ + ร้าน...
static VENDOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:ที่ร้าน|ร้าน|จาก|ที่)\s*([^\s0-9]+)").unwrap());

/// Words that mark a message as expense-like. Deliberately over-inclusive;
/// messages that pass here but yield no positive amount are still dropped.
const EXPENSE_KEYWORDS: &[&str] = &[
    "ค่า", "จ่าย", "ซื้อ", "บาท", "฿", "ราคา", "เติม", "โอน",
];

struct CategoryRule {
    keyword: &'static str,
    category: &'static str,
    subcategory: Option<&'static str>,
}

/// Keyword-to-category table. Matching picks the longest keyword present
/// in the message, so ค่าน้ำแข็ง wins over ค่าน้ำ.
const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule { keyword: "ค่าไฟฟ้า", category: "utility", subcategory: Some("electric") },
    CategoryRule { keyword: "ค่าไฟ", category: "utility", subcategory: Some("electric") },
    CategoryRule { keyword: "ค่าน้ำแข็ง", category: "ingredient", subcategory: Some("ice") },
    CategoryRule { keyword: "ค่าน้ำประปา", category: "utility", subcategory: Some("water") },
    CategoryRule { keyword: "ค่าน้ำมัน", category: "transport", subcategory: Some("fuel") },
    CategoryRule { keyword: "ค่าน้ำ", category: "utility", subcategory: Some("water") },
    CategoryRule { keyword: "ค่าเช่า", category: "rental", subcategory: None },
    CategoryRule { keyword: "ค่าเน็ต", category: "utility", subcategory: Some("internet") },
    CategoryRule { keyword: "อินเทอร์เน็ต", category: "utility", subcategory: Some("internet") },
    CategoryRule { keyword: "ค่าแก๊ส", category: "utility", subcategory: Some("gas") },
    CategoryRule { keyword: "แก๊ส", category: "utility", subcategory: Some("gas") },
    CategoryRule { keyword: "ค่าแรง", category: "labor", subcategory: None },
    CategoryRule { keyword: "เงินเดือน", category: "labor", subcategory: Some("salary") },
    CategoryRule { keyword: "วัตถุดิบ", category: "ingredient", subcategory: None },
    CategoryRule { keyword: "กุ้ง", category: "ingredient", subcategory: Some("seafood") },
    CategoryRule { keyword: "ปลาหมึก", category: "ingredient", subcategory: Some("seafood") },
    CategoryRule { keyword: "ปลา", category: "ingredient", subcategory: Some("seafood") },
    CategoryRule { keyword: "หมู", category: "ingredient", subcategory: Some("meat") },
    CategoryRule { keyword: "ไก่", category: "ingredient", subcategory: Some("meat") },
    CategoryRule { keyword: "ผัก", category: "ingredient", subcategory: Some("vegetable") },
    CategoryRule { keyword: "ข้าวสาร", category: "ingredient", subcategory: None },
    CategoryRule { keyword: "ค่าส่ง", category: "transport", subcategory: Some("delivery") },
    CategoryRule { keyword: "ขนส่ง", category: "transport", subcategory: None },
    CategoryRule { keyword: "โฆษณา", category: "marketing", subcategory: None },
    CategoryRule { keyword: "อุปกรณ์", category: "equipment", subcategory: None },
    CategoryRule { keyword: "ซ่อม", category: "maintenance", subcategory: None },
];

/// Fallback description when the text left after stripping the amount is
/// too short to be useful.
fn default_description(category: &str) -> String {
    match category {
        "utility" => "ค่าสาธารณูปโภค".to_string(),
        "rental" => "ค่าเช่า".to_string(),
        "ingredient" => "ซื้อวัตถุดิบ".to_string(),
        "labor" => "ค่าแรงงาน".to_string(),
        "transport" => "ค่าขนส่ง".to_string(),
        _ => "ค่าใช้จ่ายทั่วไป".to_string(),
    }
}

/// Classify a message and extract a structured expense, or return `None`
/// when the message is not expense-like. Pure and deterministic: same
/// input, same output, no I/O.
pub fn extract(text: &str) -> Option<ExtractedExpense> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !looks_like_expense(trimmed) {
        return None;
    }

    let (amount, amount_span) = extract_amount(trimmed)?;

    let (category, subcategory) = match_category(trimmed);

    // Description is whatever remains once the amount phrase is removed.
    let mut description = String::with_capacity(trimmed.len());
    description.push_str(&trimmed[..amount_span.0]);
    description.push_str(&trimmed[amount_span.1..]);
    let description = description.trim().to_string();
    let description = if description.chars().count() < 2 {
        default_description(category)
    } else {
        description
    };

    Some(ExtractedExpense {
        amount,
        category: category.to_string(),
        subcategory: subcategory.map(str::to_string),
        expense_date: extract_date(trimmed),
        vendor: extract_vendor(&description),
        payment_method: if trimmed.contains("โอน") {
            "transfer".to_string()
        } else {
            "cash".to_string()
        },
        description,
        original_message: text.to_string(),
    })
}

fn looks_like_expense(text: &str) -> bool {
    EXPENSE_KEYWORDS.iter().any(|k| text.contains(k))
        || AMOUNT_RULES[0].re.is_match(text)
}

/// Try the amount rules in order; the first pattern yielding a value > 0
/// wins. Returns the amount and the byte span of the matched phrase.
fn extract_amount(text: &str) -> Option<(f64, (usize, usize))> {
    for rule in AMOUNT_RULES.iter() {
        let Some(caps) = rule.re.captures(text) else {
            continue;
        };
        let raw = caps.get(1)?.as_str().replace(',', "");
        let Ok(amount) = raw.parse::<f64>() else {
            continue;
        };
        if amount > 0.0 {
            let span = caps.get(0)?;
            tracing::trace!(rule = rule.name, amount, "amount rule matched");
            return Some((amount, (span.start(), span.end())));
        }
    }
    None
}

fn match_category(text: &str) -> (&'static str, Option<&'static str>) {
    CATEGORY_RULES
        .iter()
        .filter(|rule| text.contains(rule.keyword))
        .max_by_key(|rule| rule.keyword.chars().count())
        .map(|rule| (rule.category, rule.subcategory))
        .unwrap_or(("other", None))
}

/// Two supported formats: D/M/YYYY and YYYY-M-D. Calendar-invalid values
/// fall through to `None`.
fn extract_date(text: &str) -> Option<NaiveDate> {
    if let Some(caps) = DATE_DMY.captures(text) {
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(caps) = DATE_YMD.captures(text) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    None
}

fn extract_vendor(text: &str) -> Option<String> {
    VENDOR
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
