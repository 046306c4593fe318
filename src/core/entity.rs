//! Entity & event classifier (C3): dictionary/pattern-based entity extraction
//! (substituting for the closed-dictionary fallback of a general NER model, per
//! the design note in the expanded spec), event-type scoring, sport-subtype
//! detection, parlay detection, and geo-scope inference.

use crate::core::contract::EntitySets;
use std::collections::HashSet;

const KNOWN_TICKERS: &[&str] = &[
    "btc", "bitcoin", "eth", "ethereum", "aapl", "apple", "tsla", "tesla", "googl", "google",
    "msft", "microsoft", "amzn", "amazon", "meta", "nvda", "nvidia", "spy", "qqq", "dow", "s&p",
    "sp500", "nasdaq",
];

const KNOWN_ORGANIZATIONS: &[&str] = &[
    "fed",
    "federal reserve",
    "fomc",
    "federal open market committee",
    "bls",
    "bureau of labor statistics",
    "treasury",
    "sec",
    "securities and exchange commission",
    "cpi",
    "consumer price index",
    "gdp",
    "unemployment",
    "ecb",
    "european central bank",
];

const KNOWN_COUNTRIES: &[&str] = &[
    "us",
    "usa",
    "united states",
    "america",
    "china",
    "russia",
    "ukraine",
    "uk",
    "united kingdom",
    "eu",
    "europe",
    "japan",
    "germany",
    "france",
    "canada",
    "mexico",
    "brazil",
    "india",
    "israel",
    "iran",
    "north korea",
    "south korea",
];

fn word_boundary_contains(haystack_lower: &str, needle: &str) -> bool {
    // Cheap word-boundary check: surrounded by non-alphanumeric or string edges.
    let mut start = 0;
    while let Some(pos) = haystack_lower[start..].find(needle) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack_lower[..abs]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let after = abs + needle.len();
        let after_ok = after >= haystack_lower.len()
            || !haystack_lower[after..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
        start = abs + needle.len().max(1);
        if start >= haystack_lower.len() {
            break;
        }
    }
    false
}

fn extract_tickers(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    let mut out = HashSet::new();
    for ticker in KNOWN_TICKERS {
        if word_boundary_contains(&lower, ticker) {
            out.insert(ticker.to_uppercase());
        }
    }
    // $XXX pattern.
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '$' {
            let rest = &text[i + 1..];
            let symbol: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphabetic())
                .collect();
            if (2..=5).contains(&symbol.len()) {
                out.insert(symbol.to_uppercase());
            }
        }
    }
    out
}

fn extract_organizations(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    KNOWN_ORGANIZATIONS
        .iter()
        .filter(|org| word_boundary_contains(&lower, org))
        .map(|org| org.to_string())
        .collect()
}

fn extract_countries(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    KNOWN_COUNTRIES
        .iter()
        .filter(|country| word_boundary_contains(&lower, country))
        .map(|country| country.to_string())
        .collect()
}

/// Capitalized multi-word run heuristic, substituting for NER-based person extraction.
/// Two or more consecutive capitalized words, none of which is a known ticker/org/country
/// token and none of which is the first word of the (unstripped) sentence, are treated as
/// a person name.
fn extract_people(raw_text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let words: Vec<&str> = raw_text.split_whitespace().collect();
    let mut run: Vec<&str> = Vec::new();

    let is_capitalized = |w: &str| {
        w.chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false)
            && w.chars().skip(1).any(|c| c.is_lowercase())
    };

    for (idx, word) in words.iter().enumerate() {
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
        let is_sentence_start = idx == 0;
        if !is_sentence_start && !trimmed.is_empty() && is_capitalized(trimmed) {
            run.push(trimmed);
        } else {
            if run.len() >= 2 {
                out.insert(run.join(" "));
            }
            run.clear();
        }
    }
    if run.len() >= 2 {
        out.insert(run.join(" "));
    }
    out
}

const EVENT_PATTERNS: &[&str] = &[
    "super bowl",
    "world cup",
    "olympics",
    "election",
    "q1",
    "q2",
    "q3",
    "q4",
];

fn extract_misc(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    EVENT_PATTERNS
        .iter()
        .filter(|pattern| lower.contains(**pattern))
        .map(|pattern| pattern.to_string())
        .collect()
}

/// Extracts all five entity sets from raw (pre-clean) text, per §4.5.
pub fn extract_entities(raw_text: &str) -> EntitySets {
    EntitySets {
        tickers: extract_tickers(raw_text),
        people: extract_people(raw_text),
        organizations: extract_organizations(raw_text),
        countries: extract_countries(raw_text),
        misc: extract_misc(raw_text),
    }
}

struct EventRule {
    event_type: &'static str,
    keywords: &'static [&'static str],
    categories: &'static [&'static str],
    required_entities: &'static [EntityKind],
    boost: i32,
    exclusions: &'static [&'static str],
}

#[derive(Clone, Copy)]
enum EntityKind {
    Tickers,
    People,
    Organizations,
    Countries,
}

const EVENT_RULES: &[EventRule] = &[
    EventRule {
        event_type: "entertainment",
        keywords: &[
            "oscars",
            "academy awards",
            "golden globes",
            "emmy",
            "emmys",
            "grammy",
            "grammys",
            "tony awards",
            "bafta",
            "sag awards",
            "cannes",
            "sundance",
            "best actor",
            "best actress",
            "best director",
            "best picture",
            "best film",
            "nominated",
            "nomination",
            "box office",
            "rotten tomatoes",
        ],
        categories: &["entertainment", "culture"],
        required_entities: &[EntityKind::People],
        boost: 3,
        exclusions: &[],
    },
    EventRule {
        event_type: "sports",
        keywords: &[
            "yards", "touchdowns", "rushing", "passing", "receiving", "rebounds", "assists",
            "goals", "saves", "strikeouts", "home runs", "spread", "o/u", "over", "under",
            "moneyline", "super bowl", "world cup", "championship game", "playoffs", "playoff",
            "game", "match", "vs", "vs.", "score", "team", "club", "fc", "united", "nfl", "nba",
            "mlb", "nhl", "mls", "premier league", "champions league", "ncaa", "fifa",
            "quarterback", "running back", "wide receiver", "tight end", "pitcher", "draft pick",
        ],
        categories: &["sports"],
        required_entities: &[EntityKind::People],
        boost: 4,
        exclusions: &[
            "oscars",
            "oscar",
            "golden globe",
            "emmy",
            "grammy",
            "best actor",
            "best actress",
            "best director",
            "best picture",
            "nominated",
            "nomination",
            "screenplay",
            "arrested",
            "charged",
            "indicted",
            "convicted",
            "sentenced",
            "prison",
            "lawsuit",
            "trial",
            "verdict",
            "guilty",
            "acquitted",
            "elected",
            "appointed",
            "cabinet",
            "secretary",
            "ambassador",
        ],
    },
    EventRule {
        event_type: "regulatory",
        keywords: &[
            "arrested", "charged", "indicted", "convicted", "sentenced", "prison", "jail",
            "lawsuit", "trial", "verdict", "guilty", "acquitted", "appeal", "approve", "ban",
            "regulation", "law", "sec", "ftc", "doj", "court", "ruling", "subpoena",
            "investigation", "probe", "felony", "crime", "criminal", "prosecutor", "judge",
        ],
        categories: &["politics", "legal"],
        required_entities: &[EntityKind::Organizations, EntityKind::People],
        boost: 2,
        exclusions: &[],
    },
    EventRule {
        event_type: "election",
        keywords: &[
            "election", "elect", "president", "presidential", "senate", "congress", "vote",
            "ballot", "governor", "mayor", "representative", "democrat", "republican", "primary",
            "caucus", "midterm", "campaign", "electoral",
        ],
        categories: &["politics"],
        required_entities: &[EntityKind::People],
        boost: 1,
        exclusions: &[],
    },
    EventRule {
        event_type: "price_target",
        keywords: &[
            "price", "reach", "hit", "above", "below", "dollar", "usd", "btc", "eth", "bitcoin",
            "ethereum", "crypto", "cryptocurrency", "solana", "xrp", "market cap", "trading at",
            "trades above",
        ],
        categories: &["crypto", "finance", "stocks"],
        required_entities: &[EntityKind::Tickers],
        boost: 1,
        exclusions: &[],
    },
    EventRule {
        event_type: "rate_decision",
        keywords: &[
            "rate", "interest", "fed", "fomc", "basis points", "bps", "hike", "cut",
            "federal reserve", "central bank", "monetary policy", "yield",
        ],
        categories: &["finance", "economics"],
        required_entities: &[EntityKind::Organizations],
        boost: 1,
        exclusions: &[],
    },
    EventRule {
        event_type: "economic_indicator",
        keywords: &[
            "gdp", "inflation", "cpi", "unemployment", "jobs", "nonfarm", "payroll",
            "employment", "retail sales", "manufacturing", "pmi", "ism",
        ],
        categories: &["economics", "finance"],
        required_entities: &[EntityKind::Organizations],
        boost: 1,
        exclusions: &[],
    },
    EventRule {
        event_type: "geopolitical",
        keywords: &[
            "war", "conflict", "invasion", "treaty", "sanctions", "military", "diplomatic",
            "nuclear", "missile", "ceasefire", "annexation",
        ],
        categories: &["politics", "international"],
        required_entities: &[EntityKind::Countries],
        boost: 1,
        exclusions: &[],
    },
    EventRule {
        event_type: "corporate",
        keywords: &[
            "earnings", "revenue", "acquisition", "merger", "ceo", "ipo", "stock split",
            "quarterly", "annual report", "dividend", "layoffs", "restructuring",
        ],
        categories: &["finance", "business"],
        required_entities: &[EntityKind::Organizations, EntityKind::People],
        boost: 1,
        exclusions: &[],
    },
];

fn entity_kind_present(kind: EntityKind, entities: &EntitySets) -> bool {
    match kind {
        EntityKind::Tickers => !entities.tickers.is_empty(),
        EntityKind::People => !entities.people.is_empty(),
        EntityKind::Organizations => !entities.organizations.is_empty(),
        EntityKind::Countries => !entities.countries.is_empty(),
    }
}

/// Classifies event type from (category, entities, cleaned title), per §4.3.
pub fn classify_event_type(category: &str, entities: &EntitySets, cleaned_title: &str) -> String {
    let title_lower = cleaned_title.to_lowercase();
    let category_lower = category.to_lowercase();

    let mut best_type = "general";
    let mut best_score = i32::MIN;

    for rule in EVENT_RULES {
        if rule
            .exclusions
            .iter()
            .any(|excl| title_lower.contains(excl))
        {
            continue;
        }

        let mut score = 0;
        if rule.categories.contains(&category_lower.as_str()) {
            score += 3;
        }
        let keyword_hits = rule
            .keywords
            .iter()
            .filter(|kw| title_lower.contains(**kw))
            .count() as i32;
        score += keyword_hits * 2;

        for kind in rule.required_entities {
            if entity_kind_present(*kind, entities) {
                score += 1;
            }
        }

        score *= rule.boost;

        if score > 0 && score > best_score {
            best_score = score;
            best_type = rule.event_type;
        }
    }

    best_type.to_string()
}

const NFL_MARKERS: &[&str] = &[
    "nfl", "super bowl", "quarterback", "qb", "running back", "wide receiver", "tight end",
    "yards", "touchdowns", "passing yards", "rushing yards", "receiving yards", "field goal",
    "touchdown", "afc", "nfc", "bills", "dolphins", "patriots", "jets", "ravens", "bengals",
    "browns", "steelers", "texans", "colts", "jaguars", "titans", "broncos", "chiefs", "raiders",
    "chargers", "cowboys", "giants", "eagles", "commanders", "bears", "lions", "packers",
    "vikings", "falcons", "panthers", "saints", "buccaneers", "cardinals", "rams", "49ers",
    "seahawks",
];

const NHL_MARKERS: &[&str] = &[
    "nhl", "stanley cup", "hockey", "puck", "goalie", "hat trick", "power play", "shootout",
    "overtime goal", "ice hockey", "avalanche", "flames", "oilers", "canucks", "maple leafs",
    "senators", "canadiens", "bruins", "sabres", "red wings", "blackhawks", "blues", "predators",
    "wild", "penguins", "capitals", "blue jackets", "hurricanes", "devils", "islanders",
    "rangers", "flyers", "sharks", "ducks", "kings", "golden knights", "coyotes", "kraken",
    "lightning",
];

const NBA_MARKERS: &[&str] = &[
    "nba", "basketball", "three-pointer", "free throw", "rebounds", "assists", "blocks",
    "steals", "dunks", "playoff series", "celtics", "nets", "knicks", "76ers", "raptors", "bulls",
    "cavaliers", "pistons", "pacers", "bucks", "hawks", "hornets", "heat", "magic", "wizards",
    "nuggets", "timberwolves", "thunder", "trail blazers", "jazz", "warriors", "clippers",
    "lakers", "suns", "mavericks", "rockets", "grizzlies", "pelicans", "spurs",
];

const MLB_MARKERS: &[&str] = &[
    "mlb", "baseball", "home run", "strikeout", "innings", "pitcher", "batting average", "rbi",
    "world series", "playoff game", "yankees", "red sox", "orioles", "rays", "blue jays",
    "white sox", "guardians", "tigers", "royals", "twins", "astros", "angels", "athletics",
    "mariners", "mets", "phillies", "braves", "marlins", "nationals", "cubs", "brewers",
    "pirates", "reds", "rockies", "dodgers", "padres", "diamondbacks",
];

/// Sport subtype ∈ {NFL, NHL, NBA, MLB}: the set with the most keyword hits, or
/// `None` if no set scores at least one hit.
pub fn classify_sport_type(cleaned_title: &str) -> Option<String> {
    let lower = cleaned_title.to_lowercase();
    let count = |markers: &[&str]| markers.iter().filter(|m| lower.contains(*m)).count();

    let counts = [
        ("NFL", count(NFL_MARKERS)),
        ("NHL", count(NHL_MARKERS)),
        ("NBA", count(NBA_MARKERS)),
        ("MLB", count(MLB_MARKERS)),
    ];

    counts
        .iter()
        .max_by_key(|(_, c)| *c)
        .filter(|(_, c)| *c >= 1)
        .map(|(name, _)| name.to_string())
}

const PARLAY_KEYWORDS: &[&str] = &[
    "parlay",
    "multi-game",
    "multigame",
    "both teams",
    "all teams",
    "combo",
    "combined",
    "multiple games",
];

/// True if the title reads as a parlay/multi-outcome market, per §4.3.
pub fn detect_parlay(cleaned_title: &str) -> bool {
    let lower = cleaned_title.to_lowercase();
    if PARLAY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }

    let separators =
        lower.matches(",yes").count() + lower.matches(", yes").count() + lower.matches(",no").count()
            + lower.matches(", no").count();
    if separators >= 2 {
        return true;
    }

    let vs_count = lower.matches(" vs ").count() + lower.matches(" vs. ").count();
    vs_count >= 2
}

/// Geographic scope, per §4.3.
pub fn determine_geo_scope(entities: &EntitySets, cleaned_title: &str) -> String {
    let lower = cleaned_title.to_lowercase();
    let countries_lower: Vec<String> = entities
        .countries
        .iter()
        .map(|c| c.to_lowercase())
        .collect();

    if ["us", "usa", "united states", "america", "american"]
        .iter()
        .any(|w| lower.contains(w))
        || countries_lower
            .iter()
            .any(|c| matches!(c.as_str(), "us" | "usa" | "united states"))
    {
        return "US".to_string();
    }

    if ["eu", "europe", "european"].iter().any(|w| lower.contains(w)) {
        return "EU".to_string();
    }

    if countries_lower.len() == 1 {
        return countries_lower[0].to_uppercase();
    }
    if countries_lower.len() > 1 {
        return "multi_country".to_string();
    }

    if ["global", "world", "worldwide", "international"]
        .iter()
        .any(|w| lower.contains(w))
    {
        return "global".to_string();
    }

    "US".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_known_ticker() {
        let entities = extract_entities("Will Bitcoin reach $100,000 by end of 2025?");
        assert!(entities.tickers.contains("BITCOIN") || entities.tickers.contains("BTC"));
    }

    #[test]
    fn classifies_sports_over_entertainment_with_exclusion() {
        let entities = EntitySets::default();
        let event_type = classify_event_type("entertainment", &entities, "best actor oscars 2026");
        assert_eq!(event_type, "entertainment");
    }

    #[test]
    fn sports_rule_is_excluded_by_awards_keywords() {
        let entities = EntitySets {
            people: HashSet::from(["Some Actor".to_string()]),
            ..Default::default()
        };
        // "wins" appears in sports keywords, but "best actor" should still win via exclusion.
        let event_type = classify_event_type("sports", &entities, "best actor wins award");
        assert_eq!(event_type, "entertainment");
    }

    #[test]
    fn sport_subtype_distinguishes_nfl_and_nhl() {
        assert_eq!(
            classify_sport_type("chiefs make the playoffs").as_deref(),
            Some("NFL")
        );
        assert_eq!(
            classify_sport_type("avalanche win the stanley cup").as_deref(),
            Some("NHL")
        );
    }

    #[test]
    fn parlay_detection_via_multiple_vs() {
        assert!(detect_parlay("team a vs team b and team c vs team d"));
        assert!(!detect_parlay("team a vs team b"));
    }

    #[test]
    fn geo_scope_defaults_to_us() {
        let entities = EntitySets::default();
        assert_eq!(determine_geo_scope(&entities, "will it rain tomorrow"), "US");
    }
}
