//! Value estimation engine.
//!
//! `estimate` is a pure function of the listing and the clock reading it is
//! handed. Each stage is a small public function so it can be tuned and
//! tested on its own; `Estimator::estimate_with` only chains them.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::identify::Identification;
use crate::listing::{NormalizedListing, ValuationRecord};
use crate::model::{Condition, ListingStatus, ResaleDifficulty};

pub mod tables;

use tables::*;

fn phrase_regex(phrase: &str) -> Regex {
    let pattern = regex::escape(phrase).replace(' ', r"\s+");
    Regex::new(&format!(r"(?i)\b{pattern}\b")).expect("static keyword pattern")
}

fn raw_regex(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("static keyword pattern")
}

static CATEGORY_MATCHERS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    CATEGORY_KEYWORDS
        .iter()
        .map(|(category, words)| (*category, words.iter().map(|w| phrase_regex(w)).collect()))
        .collect()
});

static BRAND_MATCHERS: Lazy<Vec<(&'static str, f64, Regex)>> = Lazy::new(|| {
    BRANDS
        .iter()
        .map(|(name, mult)| (*name, *mult, phrase_regex(name)))
        .collect()
});

static CONDITION_MATCHERS: Lazy<Vec<(Regex, Condition)>> = Lazy::new(|| {
    CONDITION_KEYWORDS
        .iter()
        .map(|(phrase, condition)| (phrase_regex(phrase), *condition))
        .collect()
});

static RISK_MATCHERS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    RISK_KEYWORDS
        .iter()
        .map(|phrase| (*phrase, phrase_regex(phrase)))
        .collect()
});

static LOCAL_PICKUP: Lazy<Vec<Regex>> =
    Lazy::new(|| LOCAL_PICKUP_PATTERNS.iter().map(|p| raw_regex(p)).collect());

static NEGOTIABLE: Lazy<Vec<Regex>> =
    Lazy::new(|| NEGOTIABLE_PATTERNS.iter().map(|p| raw_regex(p)).collect());

/// Knobs that come from configuration rather than the keyword tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuationSettings {
    pub platform_fee_rate: f64,
    pub spread_low: f64,
    pub spread_high: f64,
}

impl Default for ValuationSettings {
    fn default() -> Self {
        Self {
            platform_fee_rate: PLATFORM_FEE_RATE,
            spread_low: SPREAD_LOW,
            spread_high: SPREAD_HIGH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Estimator {
    settings: ValuationSettings,
}

/// Score a listing with default settings and no identification input.
pub fn estimate(listing: &NormalizedListing, now: DateTime<Utc>) -> ValuationRecord {
    Estimator::default().estimate_with(listing, now, None)
}

impl Estimator {
    pub fn with_settings(settings: ValuationSettings) -> Self {
        Self { settings }
    }

    pub fn estimate(&self, listing: &NormalizedListing, now: DateTime<Utc>) -> ValuationRecord {
        self.estimate_with(listing, now, None)
    }

    pub fn estimate_with(
        &self,
        listing: &NormalizedListing,
        now: DateTime<Utc>,
        identification: Option<&Identification>,
    ) -> ValuationRecord {
        let identification =
            identification.filter(|i| i.confidence >= IDENTIFICATION_MIN_CONFIDENCE);
        let text = format!("{} {}", listing.title, listing.description);
        let asking = listing.asking_price;

        // 1-2: category and base value
        let category = resolve_category(listing.category.as_deref(), &text);
        let mut value = asking * category_multiplier(&category);

        // 3: brands
        let mut brand_text = text.clone();
        if let Some(explicit) = &listing.brand {
            brand_text.push(' ');
            brand_text.push_str(explicit);
        }
        if let Some(brand) = identification.and_then(|i| i.brand.as_deref()) {
            brand_text.push(' ');
            brand_text.push_str(brand);
        }
        let brands = detect_brands(&brand_text);
        value *= brand_multiplier(&brands);
        let mut brand_names: Vec<String> = brands.iter().map(|(name, _)| name.to_string()).collect();
        if let Some(brand) = identification.and_then(|i| i.brand.as_deref()) {
            if !brand_names.iter().any(|b| b.eq_ignore_ascii_case(brand)) {
                brand_names.push(brand.to_string());
            }
        }

        // 4: condition
        let condition = identification
            .and_then(|i| i.condition)
            .unwrap_or_else(|| resolve_condition(listing.condition.as_deref(), &text));
        value *= condition_multiplier(condition);

        // 5: risk
        let risk_flags = detect_risk_flags(&text);
        value *= risk_multiplier(risk_flags.len());
        let estimated_value = round2(value.max(0.0));

        // 6-7: spread and profit; inbound shipping is part of the buy cost
        let estimated_low = round2(estimated_value * self.settings.spread_low);
        let estimated_high = round2(estimated_value * self.settings.spread_high);
        let net = 1.0 - self.settings.platform_fee_rate;
        let cost = asking + listing.shipping_cost.unwrap_or(0.0);
        let profit_potential = round2(estimated_value * net - cost);
        let profit_low = round2(estimated_low * net - cost);
        let profit_high = round2(estimated_high * net - cost);

        // 8-11: score and signals
        let negotiable = is_negotiable(&listing.description);
        let shippable = is_shippable(&listing.description);
        let discount = discount_percent(asking, estimated_value);
        let value_score = value_score(asking, profit_potential, discount, risk_flags.len(), negotiable);
        let resale_difficulty = resale_difficulty(value_score, risk_flags.len());

        // 12-15: outputs
        let comparable_urls = comparable_urls(&listing.title, &category);
        let tags = build_tags(&brand_names, &category, condition);
        let mut scored = listing.clone();
        scored.negotiable = negotiable;
        scored.shippable = shippable;
        let request_to_buy = request_to_buy(&scored);
        let status = listing_status(value_score);

        ValuationRecord {
            listing: scored,
            category,
            condition,
            brands: brand_names,
            risk_flags: risk_flags.into_iter().map(str::to_string).collect(),
            estimated_value,
            estimated_low,
            estimated_high,
            profit_potential,
            profit_low,
            profit_high,
            value_score,
            discount_percent: round2(discount * 100.0),
            resale_difficulty,
            comparable_urls,
            tags,
            request_to_buy,
            status,
            scored_at: now,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Infer a category from free text using the ordered keyword table.
pub fn infer_category(text: &str) -> Option<&'static str> {
    CATEGORY_MATCHERS
        .iter()
        .find(|(_, words)| words.iter().any(|re| re.is_match(text)))
        .map(|(category, _)| *category)
}

/// Explicit categories win. A known table name is used as-is, an unknown
/// label is mapped through the keyword table and kept verbatim otherwise.
pub fn resolve_category(explicit: Option<&str>, text: &str) -> String {
    match explicit.map(str::trim).filter(|c| !c.is_empty()) {
        Some(explicit) => {
            let lowered = explicit.to_lowercase();
            if CATEGORY_MULTIPLIERS.iter().any(|(c, _)| *c == lowered) || lowered == DEFAULT_CATEGORY {
                lowered
            } else {
                infer_category(explicit).map(str::to_string).unwrap_or(lowered)
            }
        }
        None => infer_category(text).unwrap_or(DEFAULT_CATEGORY).to_string(),
    }
}

pub fn category_multiplier(category: &str) -> f64 {
    CATEGORY_MULTIPLIERS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, m)| *m)
        .unwrap_or(DEFAULT_CATEGORY_MULTIPLIER)
}

/// Known brands mentioned in `text`, in table order.
pub fn detect_brands(text: &str) -> Vec<(&'static str, f64)> {
    BRAND_MATCHERS
        .iter()
        .filter(|(_, _, re)| re.is_match(text))
        .map(|(name, mult, _)| (*name, *mult))
        .collect()
}

/// First brand found in the text, used by adapters that expose no brand field.
pub fn first_brand(text: &str) -> Option<&'static str> {
    BRAND_MATCHERS
        .iter()
        .find(|(_, _, re)| re.is_match(text))
        .map(|(name, _, _)| *name)
}

pub fn brand_multiplier(brands: &[(&str, f64)]) -> f64 {
    brands
        .iter()
        .map(|(_, m)| *m)
        .product::<f64>()
        .min(BRAND_MULTIPLIER_CEILING)
}

pub fn map_condition(text: &str) -> Option<Condition> {
    CONDITION_MATCHERS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, c)| *c)
}

/// Condition text first, then the listing text, then the default.
pub fn resolve_condition(condition_text: Option<&str>, listing_text: &str) -> Condition {
    condition_text
        .and_then(map_condition)
        .or_else(|| map_condition(listing_text))
        .unwrap_or(DEFAULT_CONDITION)
}

pub fn detect_risk_flags(text: &str) -> Vec<&'static str> {
    RISK_MATCHERS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(phrase, _)| *phrase)
        .collect()
}

pub fn risk_multiplier(flag_count: usize) -> f64 {
    RISK_FACTOR
        .powi(flag_count.min(i32::MAX as usize) as i32)
        .max(RISK_PENALTY_FLOOR)
}

pub fn discount_percent(asking: f64, estimated_value: f64) -> f64 {
    if estimated_value <= 0.0 {
        return 0.0;
    }
    (1.0 - asking / estimated_value).max(0.0)
}

pub fn value_score(
    asking: f64,
    profit: f64,
    discount: f64,
    risk_count: usize,
    negotiable: bool,
) -> u8 {
    let ratio = if asking > 0.0 {
        profit / asking
    } else if profit > 0.0 {
        PROFIT_RATIO_TARGET
    } else {
        0.0
    };
    let profit_part = (ratio / PROFIT_RATIO_TARGET).clamp(0.0, 1.0) * PROFIT_WEIGHT;
    let discount_part = (discount / DISCOUNT_TARGET).clamp(0.0, 1.0) * DISCOUNT_WEIGHT;
    let mut adjustment = RISK_ADJUSTMENT_BASE - RISK_FLAG_PENALTY * risk_count as f64;
    if negotiable {
        adjustment += NEGOTIABLE_BONUS;
    }
    (profit_part + discount_part + adjustment).round().clamp(0.0, 100.0) as u8
}

pub fn resale_difficulty(score: u8, risk_count: usize) -> ResaleDifficulty {
    if risk_count >= 2 || score < MODERATE_SCORE_MIN {
        ResaleDifficulty::Hard
    } else if risk_count == 1 || score < EASY_SCORE_MIN {
        ResaleDifficulty::Moderate
    } else {
        ResaleDifficulty::Easy
    }
}

pub fn listing_status(score: u8) -> ListingStatus {
    if score >= OPPORTUNITY_THRESHOLD {
        ListingStatus::Opportunity
    } else {
        ListingStatus::New
    }
}

pub fn is_shippable(description: &str) -> bool {
    !LOCAL_PICKUP.iter().any(|re| re.is_match(description))
}

pub fn is_negotiable(description: &str) -> bool {
    NEGOTIABLE.iter().any(|re| re.is_match(description))
}

/// Search keywords pulled from a title: lowercase alphanumeric words with
/// condition filler removed.
pub fn title_keywords(title: &str) -> Vec<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| !w.is_empty() && !QUERY_STOPWORDS.contains(&w.as_str()))
        .take(MAX_QUERY_KEYWORDS)
        .collect()
}

pub fn comparable_urls(title: &str, category: &str) -> [String; 4] {
    let keywords = title_keywords(title);
    let query = if keywords.is_empty() {
        category.to_string()
    } else {
        keywords.join(" ")
    };
    let q = query.as_str();
    [
        search_url(
            "https://www.ebay.com/sch/i.html",
            &[("_nkw", q), ("LH_Sold", "1"), ("LH_Complete", "1")],
        ),
        search_url(
            "https://www.mercari.com/search/",
            &[("keyword", q), ("itemStatuses", "2")],
        ),
        search_url(
            "https://poshmark.com/search",
            &[("query", q), ("availability", "sold_out")],
        ),
        search_url("https://www.facebook.com/marketplace/search/", &[("query", q)]),
    ]
}

fn search_url(base: &str, params: &[(&str, &str)]) -> String {
    match Url::parse_with_params(base, params) {
        Ok(url) => url.to_string(),
        Err(_) => base.to_string(),
    }
}

/// Brands, then category, then condition label; case-insensitively unique.
pub fn build_tags(brands: &[String], category: &str, condition: Condition) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let candidates = brands
        .iter()
        .map(|b| b.to_lowercase())
        .chain([category.to_lowercase(), condition.label().to_string()]);
    for tag in candidates {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Seller name stored when a source does not report one.
pub const UNKNOWN_SELLER: &str = "Unknown";

pub fn request_to_buy(listing: &NormalizedListing) -> String {
    let greeting = match listing.seller_name.as_deref() {
        Some(name) if !name.eq_ignore_ascii_case(UNKNOWN_SELLER) => format!("Hi {name},"),
        _ => "Hi there,".to_string(),
    };
    if listing.negotiable {
        let offer = (listing.asking_price * OFFER_RATIO).round();
        format!(
            "{greeting} I'm interested in your {}. I saw the price is negotiable. \
             Would you accept ${offer:.0}? I can pick it up quickly and pay cash. Thanks!",
            listing.title
        )
    } else {
        format!(
            "{greeting} I'm interested in your {} listed at ${:.0}. Is it still available? \
             I can pick it up at a time that works for you. Thanks!",
            listing.title, listing.asking_price
        )
    }
}
