//! Tunable tables and constants for the estimation stages. Tables are
//! ordered: for first-match lookups earlier rows win.

use crate::model::Condition;

pub const DEFAULT_CATEGORY: &str = "general";

/// Ordered category keyword table. The first category with any matching
/// keyword wins.
pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "electronics",
        &[
            "iphone", "ipad", "macbook", "laptop", "computer", "smartphone", "phone", "tablet",
            "camera", "lens", "headphones", "earbuds", "airpods", "speaker", "tv", "television",
            "monitor", "playstation", "ps4", "ps5", "xbox", "nintendo", "switch", "console",
            "drone", "kindle", "smartwatch", "apple watch",
        ],
    ),
    (
        "appliances",
        &[
            "refrigerator", "fridge", "washer", "dryer", "dishwasher", "microwave", "oven",
            "stove", "vacuum", "air fryer", "blender", "stand mixer", "espresso machine",
            "coffee maker",
        ],
    ),
    (
        "tools",
        &[
            "drill", "impact driver", "saw", "sander", "grinder", "compressor", "generator",
            "pressure washer", "toolbox", "wrench", "socket set", "lawn mower", "chainsaw",
            "leaf blower",
        ],
    ),
    (
        "furniture",
        &[
            "sofa", "couch", "sectional", "loveseat", "table", "chair", "desk", "dresser",
            "bookshelf", "bookcase", "cabinet", "nightstand", "bed frame", "headboard",
            "ottoman", "recliner",
        ],
    ),
    (
        "sports",
        &[
            "bike", "bicycle", "treadmill", "elliptical", "kayak", "paddle board", "golf",
            "skis", "snowboard", "skateboard", "dumbbells", "weights", "tent",
        ],
    ),
    (
        "clothing",
        &[
            "jacket", "coat", "shoes", "sneakers", "boots", "dress", "jeans", "handbag", "purse",
            "backpack", "hoodie",
        ],
    ),
    (
        "collectibles",
        &[
            "vintage", "antique", "collectible", "signed", "lego", "pokemon", "trading card",
            "vinyl", "comic",
        ],
    ),
];

pub const CATEGORY_MULTIPLIERS: &[(&str, f64)] = &[
    ("electronics", 1.5),
    ("appliances", 1.2),
    ("tools", 1.4),
    ("furniture", 1.3),
    ("sports", 1.3),
    ("clothing", 1.25),
    ("collectibles", 1.6),
];

pub const DEFAULT_CATEGORY_MULTIPLIER: f64 = 1.2;

/// Known brands and their resale multipliers. Matched case-insensitively on
/// word boundaries.
pub const BRANDS: &[(&str, f64)] = &[
    ("Apple", 1.35),
    ("Samsung", 1.2),
    ("Sony", 1.2),
    ("Nintendo", 1.25),
    ("Bose", 1.25),
    ("Canon", 1.2),
    ("Nikon", 1.2),
    ("GoPro", 1.1),
    ("Dyson", 1.3),
    ("KitchenAid", 1.2),
    ("Vitamix", 1.25),
    ("DeWalt", 1.25),
    ("Milwaukee", 1.25),
    ("Makita", 1.2),
    ("Herman Miller", 1.5),
    ("West Elm", 1.15),
    ("Pottery Barn", 1.15),
    ("IKEA", 0.9),
    ("Nike", 1.2),
    ("Adidas", 1.15),
    ("Patagonia", 1.25),
    ("The North Face", 1.2),
    ("Lululemon", 1.2),
    ("Louis Vuitton", 1.5),
    ("Gucci", 1.45),
    ("Rolex", 1.6),
    ("Lego", 1.2),
    ("Yeti", 1.15),
    ("Specialized", 1.25),
    ("Trek", 1.2),
];

pub const BRAND_MULTIPLIER_CEILING: f64 = 1.6;

/// Ordered condition vocabulary. "like new" sits before "new" and the
/// damage phrases sit before plain "good"/"used".
pub const CONDITION_KEYWORDS: &[(&str, Condition)] = &[
    ("like new", Condition::LikeNew),
    ("open box", Condition::LikeNew),
    ("barely used", Condition::LikeNew),
    ("mint", Condition::LikeNew),
    ("brand new", Condition::New),
    ("new with tags", Condition::New),
    ("nwt", Condition::New),
    ("new in box", Condition::New),
    ("nib", Condition::New),
    ("sealed", Condition::New),
    ("unopened", Condition::New),
    ("new", Condition::New),
    ("excellent", Condition::Excellent),
    ("very good", Condition::Excellent),
    ("great condition", Condition::Excellent),
    ("poor", Condition::Poor),
    ("has flaws", Condition::Poor),
    ("for parts", Condition::Poor),
    ("parts only", Condition::Poor),
    ("damaged", Condition::Poor),
    ("broken", Condition::Poor),
    ("fair", Condition::Fair),
    ("acceptable", Condition::Fair),
    ("heavily used", Condition::Fair),
    ("well used", Condition::Fair),
    ("worn", Condition::Fair),
    ("good", Condition::Good),
    ("used", Condition::Good),
];

pub const DEFAULT_CONDITION: Condition = Condition::Good;

pub fn condition_multiplier(condition: Condition) -> f64 {
    match condition {
        Condition::New => 1.15,
        Condition::LikeNew => 1.05,
        Condition::Excellent => 1.0,
        Condition::Good => 0.9,
        Condition::Fair => 0.75,
        Condition::Poor => 0.55,
    }
}

pub const RISK_KEYWORDS: &[&str] = &[
    "broken",
    "parts only",
    "for parts",
    "needs repair",
    "needs work",
    "as-is",
    "sold as is",
    "not working",
    "doesn't work",
    "does not work",
    "won't turn on",
    "cracked",
    "water damage",
    "missing parts",
    "untested",
];

/// Each matched risk keyword multiplies the running value by this factor.
pub const RISK_FACTOR: f64 = 0.6;

/// Lower bound of the cumulative risk multiplier.
pub const RISK_PENALTY_FLOOR: f64 = 0.2;

pub const LOCAL_PICKUP_PATTERNS: &[&str] = &[
    r"\blocal\s+pick\s*-?\s*up\s+only\b",
    r"\bpick\s*-?\s*up\s+only\b",
    r"\bno\s+shipping\b",
    r"\b(will\s+not|won'?t|do\s+not|don'?t)\s+ship\b",
    r"\bcash\s+and\s+carry\b",
    r"\blocal\s+only\b",
];

pub const NEGOTIABLE_PATTERNS: &[&str] = &[
    r"\bobo\b",
    r"\bor\s+best\s+offer\b",
    r"\bnegotiable\b",
    r"\bmake\s+(me\s+)?an\s+offer\b",
    r"\bopen\s+to\s+offers\b",
    r"\$?\d[\d,]*(\.\d+)?\s*/\s*(obo|offer|best|\$?\d)",
];

pub const PLATFORM_FEE_RATE: f64 = 0.13;
pub const SPREAD_LOW: f64 = 0.85;
pub const SPREAD_HIGH: f64 = 1.15;

pub const PROFIT_RATIO_TARGET: f64 = 1.0;
pub const PROFIT_WEIGHT: f64 = 50.0;
pub const DISCOUNT_TARGET: f64 = 0.6;
pub const DISCOUNT_WEIGHT: f64 = 35.0;
pub const RISK_ADJUSTMENT_BASE: f64 = 15.0;
pub const RISK_FLAG_PENALTY: f64 = 12.0;
pub const NEGOTIABLE_BONUS: f64 = 5.0;

pub const OPPORTUNITY_THRESHOLD: u8 = 70;
pub const EASY_SCORE_MIN: u8 = 70;
pub const MODERATE_SCORE_MIN: u8 = 40;

/// Opening offer as a fraction of the asking price when the seller is open
/// to negotiation.
pub const OFFER_RATIO: f64 = 0.85;

pub const MAX_QUERY_KEYWORDS: usize = 6;

pub const QUERY_STOPWORDS: &[&str] = &[
    "a", "an", "and", "the", "or", "for", "with", "in", "of", "to", "on", "at", "by", "new",
    "used", "sealed", "like", "mint", "obo", "firm", "great", "excellent", "good", "condition",
    "works", "working", "only", "must", "go", "sale",
];

/// Identification results below this confidence are ignored.
pub const IDENTIFICATION_MIN_CONFIDENCE: f64 = 0.7;
